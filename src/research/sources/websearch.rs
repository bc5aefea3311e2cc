//! Web search through SerpAPI.

use super::{ensure_success, ContextSourceConnector, SourceError, MAX_RESULTS_PER_SOURCE};
use crate::research::context::{ContextItem, ContextSource};
use crate::research::http_client_pool::get_or_create_client;
use async_trait::async_trait;
use serde::Deserialize;

pub const SERPAPI_URL: &str = "https://serpapi.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

pub struct WebSearchConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WebSearchConnector {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, SERPAPI_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: get_or_create_client(&base_url),
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Build from `SERP_API_KEY`; `None` when it is unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("SERP_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(Self::new)
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search?q={}&api_key={}&num={}",
            self.base_url,
            urlencoding::encode(query),
            urlencoding::encode(&self.api_key),
            MAX_RESULTS_PER_SOURCE
        )
    }
}

#[async_trait]
impl ContextSourceConnector for WebSearchConnector {
    fn source(&self) -> ContextSource {
        ContextSource::WebSearch
    }

    async fn search(&self, query: &str) -> Result<Vec<ContextItem>, SourceError> {
        let response = self.client.get(self.search_url(query)).send().await?;
        let body = ensure_success(response).await?.text().await?;
        parse_results(&body)
    }
}

/// Map organic results to items. Results without a snippet carry no evidence
/// and are skipped.
pub fn parse_results(json: &str) -> Result<Vec<ContextItem>, SourceError> {
    let response: SearchResponse =
        serde_json::from_str(json).map_err(|e| SourceError::Parse(e.to_string()))?;
    Ok(response
        .organic_results
        .into_iter()
        .filter_map(|result| {
            let snippet = result.snippet.filter(|s| !s.trim().is_empty())?;
            let mut item = ContextItem::new(ContextSource::WebSearch, snippet);
            if let Some(title) = result.title {
                item = item.with_title(title);
            }
            if let Some(link) = result.link {
                item = item.with_url(link);
            }
            Some(item)
        })
        .take(MAX_RESULTS_PER_SOURCE)
        .collect())
}
