use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Avatar error: {0}")]
    Avatar(String),

    #[error("Speech error: {0}")]
    Speech(String),
}

pub type Result<T> = std::result::Result<T, Error>;
