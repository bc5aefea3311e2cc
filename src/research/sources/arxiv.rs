//! arXiv search through the public Atom export API.

use super::{ensure_success, normalize_whitespace, ContextSourceConnector, SourceError, MAX_RESULTS_PER_SOURCE};
use crate::research::context::{ContextItem, ContextSource};
use crate::research::http_client_pool::get_or_create_client;
use async_trait::async_trait;
use serde::Deserialize;

pub const ARXIV_BASE_URL: &str = "http://export.arxiv.org";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    published: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

/// Queries `export.arxiv.org` for papers matching the query in any field.
pub struct ArxivConnector {
    client: reqwest::Client,
    base_url: String,
}

impl ArxivConnector {
    pub fn new() -> Self {
        Self::with_base_url(ARXIV_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: get_or_create_client(&base_url),
            base_url,
        }
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/api/query?search_query=all:{}&max_results={}",
            self.base_url,
            urlencoding::encode(query),
            MAX_RESULTS_PER_SOURCE
        )
    }
}

impl Default for ArxivConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextSourceConnector for ArxivConnector {
    fn source(&self) -> ContextSource {
        ContextSource::Arxiv
    }

    async fn search(&self, query: &str) -> Result<Vec<ContextItem>, SourceError> {
        let response = self.client.get(self.search_url(query)).send().await?;
        let body = ensure_success(response).await?.text().await?;
        parse_feed(&body)
    }
}

/// Map an Atom feed to context items: text is the abstract, title and
/// abstract have their whitespace normalised.
pub fn parse_feed(xml: &str) -> Result<Vec<ContextItem>, SourceError> {
    let feed: Feed = quick_xml::de::from_str(xml).map_err(|e| SourceError::Parse(e.to_string()))?;
    Ok(feed
        .entries
        .into_iter()
        .take(MAX_RESULTS_PER_SOURCE)
        .map(|entry| {
            let url = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .map(|l| l.href.clone())
                .unwrap_or_else(|| entry.id.clone());
            let mut item = ContextItem::new(ContextSource::Arxiv, normalize_whitespace(&entry.summary))
                .with_title(normalize_whitespace(&entry.title))
                .with_url(url);
            if let Some(published) = entry.published {
                item = item.with_published(published);
            }
            item
        })
        .collect())
}
