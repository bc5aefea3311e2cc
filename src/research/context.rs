//! Sessions and retrieved context.
//!
//! A [`Session`] is a correlation key, not a managed resource: every event and
//! agent invocation of one research run carries it. When the run ends the
//! broadcaster is told through
//! [`Broadcaster::end_session`](crate::research::channel::Broadcaster::end_session);
//! nothing else is torn down.
//!
//! Context arrives as a ranked slice of `Option<ContextItem>`. A `None` slot
//! means "retrieval for this slot failed"; renderers print a placeholder for it
//! and never treat it as an error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation key for one end-to-end research run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Mint a session with a random v4 UUID for callers that do not bring their own id.
    pub fn generate(user_id: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), user_id)
    }
}

/// Where a piece of context came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextSource {
    /// Academic papers (arXiv).
    Arxiv,
    /// Code repositories (GitHub).
    Github,
    /// General web search.
    #[serde(rename = "websearch")]
    WebSearch,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSource::Arxiv => "arxiv",
            ContextSource::Github => "github",
            ContextSource::WebSearch => "websearch",
        }
    }
}

impl fmt::Display for ContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of retrieved evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextItem {
    pub source: ContextSource,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    /// Higher is more relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f64>,
}

impl ContextItem {
    pub fn new(source: ContextSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            title: None,
            url: None,
            published: None,
            relevance: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published = Some(published.into());
        self
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = Some(relevance);
        self
    }
}

/// Render contexts as a numbered block for a specialist prompt.
///
/// Entries are 1-based and separated by a blank line; a missing slot renders
/// as `"[i] No context available"`.
///
/// ```rust
/// use fanout_research::context::{render_context_block, ContextItem, ContextSource};
///
/// let block = render_context_block(&[
///     Some(ContextItem::new(ContextSource::Arxiv, "Attention is all you need")),
///     None,
/// ]);
/// assert_eq!(block, "[1] arxiv: Attention is all you need\n\n[2] No context available");
/// ```
pub fn render_context_block(contexts: &[Option<ContextItem>]) -> String {
    contexts
        .iter()
        .enumerate()
        .map(|(i, slot)| match slot {
            Some(item) => format!("[{}] {}: {}", i + 1, item.source, item.text),
            None => format!("[{}] No context available", i + 1),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
