use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Signaling transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, AppError>;
