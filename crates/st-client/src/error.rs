use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the studio API client and the session handle.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection failure, DNS, TLS, or a broken body stream.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The session actor has shut down.
    #[error("session closed")]
    SessionClosed,
}

impl ClientError {
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Http(msg) if msg.starts_with("connect"))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Http(format!("connect: {err}"))
        } else if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Http(err.to_string())
        }
    }
}
