//! GitHub repository search.

use super::{ensure_success, ContextSourceConnector, SourceError, MAX_RESULTS_PER_SOURCE};
use crate::research::context::{ContextItem, ContextSource};
use crate::research::http_client_pool::get_or_create_client;
use async_trait::async_trait;
use serde::Deserialize;

pub const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Repository>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_url: Option<String>,
}

/// Searches repositories by stars. Requires a token.
pub struct GithubConnector {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GithubConnector {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: get_or_create_client(&base_url),
            base_url,
            token: token.into(),
        }
    }

    /// Build from `GITHUB_TOKEN`; `None` when it is unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(Self::new)
    }

    fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/repositories?q={}&per_page={}&sort=stars",
            self.base_url,
            urlencoding::encode(query),
            MAX_RESULTS_PER_SOURCE
        )
    }
}

#[async_trait]
impl ContextSourceConnector for GithubConnector {
    fn source(&self) -> ContextSource {
        ContextSource::Github
    }

    async fn search(&self, query: &str) -> Result<Vec<ContextItem>, SourceError> {
        let response = self
            .client
            .get(self.search_url(query))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        parse_search(&body)
    }
}

/// Map a repository search body to items: text is the description, or the
/// repository name when there is none.
pub fn parse_search(json: &str) -> Result<Vec<ContextItem>, SourceError> {
    let response: SearchResponse =
        serde_json::from_str(json).map_err(|e| SourceError::Parse(e.to_string()))?;
    Ok(response
        .items
        .into_iter()
        .take(MAX_RESULTS_PER_SOURCE)
        .map(|repo| {
            let text = repo
                .description
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| repo.name.clone());
            let mut item = ContextItem::new(ContextSource::Github, text)
                .with_title(repo.full_name.unwrap_or(repo.name));
            if let Some(url) = repo.html_url {
                item = item.with_url(url);
            }
            item
        })
        .collect())
}
