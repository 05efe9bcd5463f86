//! Error taxonomy shared by the fetch, render and encode stages.

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Network fetch returned a non-success status or failed in transport.
    #[error("fetch failed for {url} (status {status:?}): {reason}")]
    FetchFailed {
        url: String,
        status: Option<u16>,
        reason: String,
    },
    /// Bytes were retrieved but do not decode as an image.
    #[error("could not decode image from {url}")]
    DecodeFailed { url: String },
    #[error("batch render requested with no items")]
    EmptyInput,
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub fn fetch_failed(url: &str, status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            url: url.to_string(),
            status,
            reason: reason.into(),
        }
    }
}
