use thiserror::Error;

/// Errors surfaced by the federation core.
///
/// Almost everything in the core is absorbed locally (a bad tag degrades a
/// field, a dead coordinator stays offline); these variants cover the few
/// operations where the caller has to know something went wrong.
#[derive(Error, Debug)]
pub enum FederationError {
    #[error("Unknown coordinator: {0}")]
    UnknownCoordinator(String),

    #[error("Coordinator {0} has no endpoint for the current network and origin")]
    MissingEndpoint(String),

    #[error("Invalid relay message: {0}")]
    InvalidRelayMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FederationError>;
