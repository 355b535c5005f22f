use thiserror::Error;

#[derive(Error, Debug)]
pub enum FocusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credentials(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Classifier error: {message}")]
    Classifier { message: String, stderr: String },

    #[error("Classifier output could not be parsed: {message}")]
    ClassifierOutput { message: String, output: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Token signing error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FocusError>;
