//! Text-generation provider boundary.
//!
//! A [`TextGenerator`] turns `(model_id, prompt)` into a finite, non-restartable
//! stream of text fragments. Concrete HTTP implementations live in
//! [`providers`](crate::research::providers); tests plug in scripted fakes.

use async_trait::async_trait;
use futures_util::Stream;
use std::error::Error;
use std::fmt;
use std::pin::Pin;

/// Failure reported by a text-generation provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient upstream unavailability; the caller may retry.
    Unavailable(String),
    /// Terminal failure; retrying will not help.
    Failed(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            ProviderError::Unavailable(msg) | ProviderError::Failed(msg) => msg,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            ProviderError::Failed(msg) => write!(f, "Provider error: {}", msg),
        }
    }
}

impl Error for ProviderError {}

/// Lazily produced text fragments, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Streaming completion provider.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Start a streamed completion of `prompt` with `model_id`.
    ///
    /// Errors returned here happen before any fragment exists; errors yielded by
    /// the stream happen mid-generation.
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<FragmentStream, ProviderError>;
}
