use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in the chat core.
///
/// Lookup misses are a distinct kind so callers can fall back (e.g. to the
/// legacy preference store) instead of treating them as storage failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("network failure: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("decode failure: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

// Dropped streams and plain transport errors both end up here, so the
// variant holds the rendered message rather than the reqwest error.
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl Error {
    /// True when the user can fix this by filling in API settings.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::ConfigurationMissing(_))
    }
}
