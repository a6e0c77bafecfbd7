use thiserror::Error;

/// Every failure the pipeline can surface.
///
/// Retry decisions never inspect these variants directly; the fetch and
/// analysis layers wrap them in [`crate::api::retry::Attempt`] instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed dates, negative lookbacks and similar caller mistakes.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Provider answered 429.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Any other non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Provider-level failure that is not an HTTP status (empty candidates, missing fields).
    #[error("Provider error: {0}")]
    Provider(String),

    /// A payload parsed as JSON but did not have any recognised shape.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
