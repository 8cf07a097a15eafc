//! Error types for autorejoin

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Launch failed: {0}")]
    Launch(String),

    #[error("Device gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Signal handler error: {0}")]
    Signal(String),

    #[error("Interrupted by shutdown")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;
