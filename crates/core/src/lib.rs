pub mod candidate;
pub mod config;
pub mod error;
pub mod job;

pub use candidate::CandidateFile;
pub use config::Config;
pub use error::*;
pub use job::JobStatus;
