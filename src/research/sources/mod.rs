//! External evidence connectors.
//!
//! Each connector queries one public API and maps its hits to
//! [`ContextItem`]s. Connectors are independent: the
//! [`SourceRetriever`](crate::research::retrieval::SourceRetriever) runs them
//! concurrently and a failing one only loses its own items.
//!
//! Parsing is split from transport (`parse_*` functions) so response handling
//! is testable without the network.

pub mod arxiv;
pub mod github;
pub mod websearch;

use crate::research::context::{ContextItem, ContextSource};
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

pub use arxiv::ArxivConnector;
pub use github::GithubConnector;
pub use websearch::WebSearchConnector;

/// Upper bound on items requested from any single source.
pub const MAX_RESULTS_PER_SOURCE: usize = 5;

/// Failure of one connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The request never produced a response.
    Http(String),
    /// The service answered with a non-success status.
    Status { status: u16, message: String },
    /// The body could not be decoded.
    Parse(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Http(msg) => write!(f, "HTTP error: {}", msg),
            SourceError::Status { status, message } => {
                write!(f, "Unexpected status {}: {}", status, message)
            }
            SourceError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl Error for SourceError {}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        SourceError::Http(err.to_string())
    }
}

/// One searchable evidence source.
#[async_trait]
pub trait ContextSourceConnector: Send + Sync {
    fn source(&self) -> ContextSource;

    /// Search for `query`, returning at most [`MAX_RESULTS_PER_SOURCE`] items.
    async fn search(&self, query: &str) -> Result<Vec<ContextItem>, SourceError>;
}

/// Turn a non-success response into [`SourceError::Status`].
pub(crate) async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        message: message.chars().take(200).collect(),
    })
}

/// Collapse runs of whitespace (including newlines) into single spaces.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
