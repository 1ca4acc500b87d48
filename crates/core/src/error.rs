use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnqueuerError {
    #[error("Invalid configuration: {0}")]
    Config(String),
}
