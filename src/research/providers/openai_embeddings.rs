//! [`Embedder`] backed by an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! All texts go out in one request. The response's `data[].index` decides
//! order, so servers that reorder entries still yield one vector per input in
//! input order.

use crate::research::config::ProviderConfig;
use crate::research::http_client_pool::get_or_create_client;
use crate::research::retrieval::{Embedder, RetrievalError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const EMBEDDINGS_PATH: &str = "/v1/embeddings";

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiCompatibleEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleEmbedder {
    pub fn new(config: &ProviderConfig) -> Self {
        Self::new_with_base_url(&config.api_key, &config.base_url)
    }

    pub fn new_with_base_url(api_key: &str, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            client: get_or_create_client(&base_url),
            base_url,
            api_key: api_key.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }

    /// Use `model` instead of [`DEFAULT_EMBEDDING_MODEL`] (builder pattern).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiCompatibleEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}{}", self.base_url, EMBEDDINGS_PATH);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                log::error!(
                    "OpenAiCompatibleEmbedder::embed(...): request to {} failed: {}",
                    url,
                    err
                );
                RetrievalError::Embedding(format!("request failed: {}", err))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAiCompatibleEmbedder::embed(...): HTTP {} from {}",
                status,
                url
            );
            return Err(RetrievalError::Embedding(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| RetrievalError::Embedding(format!("malformed response: {}", err)))?;
        order_vectors(parsed.data, texts.len())
    }
}

fn order_vectors(
    entries: Vec<EmbeddingEntry>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, RetrievalError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for entry in entries {
        match slots.get_mut(entry.index) {
            Some(slot) => *slot = Some(entry.embedding),
            None => {
                return Err(RetrievalError::Embedding(format!(
                    "vector index {} out of range for {} input(s)",
                    entry.index, expected
                )))
            }
        }
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                RetrievalError::Embedding(format!("no vector returned for input {}", index))
            })
        })
        .collect()
}
