use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid relay URL: {0}")]
    InvalidUrl(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Relay handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Response message cannot be empty")]
    EmptyResponse,

    #[error("Response meta property is missing")]
    MissingMeta,

    #[error("Response meta.id cannot be empty")]
    MissingMetaId,

    #[error("Unexpected response ({status}): {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl From<url::ParseError> for RelayError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}
