//! Job-status store: the external record of where each accepted file is in
//! its lifecycle, keyed by the file's storage key.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::JobStoreError;
pub use memory::MemoryJobStore;
pub use postgres::{PgJobStore, TableLayout};
pub use store::JobStore;
