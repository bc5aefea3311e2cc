//! Context gathering: concurrent source search, relevance scoring, ranking.
//!
//! [`SourceRetriever`] is the default
//! [`ContextRetriever`](crate::research::pipeline::ContextRetriever). It asks
//! every connector at once, lets a [`RelevanceScorer`] attach scores, ranks
//! with [`rank_by_relevance`] and keeps the top `top_k` slots.
//!
//! Ranking is a stable descending sort on `relevance`. Items without a score
//! and empty slots come after every scored item, keeping their input order.

use crate::research::context::{ContextItem, Session};
use crate::research::pipeline::ContextRetriever;
use crate::research::sources::{
    ArxivConnector, ContextSourceConnector, GithubConnector, WebSearchConnector,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Failure of the context stage as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalError {
    /// Embeddings could not be computed.
    Embedding(String),
    /// Any other retrieval backend failure.
    Backend(String),
}

impl fmt::Display for RetrievalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalError::Embedding(msg) => write!(f, "Embedding failed: {}", msg),
            RetrievalError::Backend(msg) => write!(f, "Retrieval failed: {}", msg),
        }
    }
}

impl Error for RetrievalError {}

/// Attaches relevance scores to retrieved items.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    async fn score(&self, query: &str, items: Vec<ContextItem>) -> Result<Vec<ContextItem>, RetrievalError>;
}

/// Keeps whatever score each source supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceScores;

#[async_trait]
impl RelevanceScorer for SourceScores {
    async fn score(&self, _query: &str, items: Vec<ContextItem>) -> Result<Vec<ContextItem>, RetrievalError> {
        Ok(items)
    }
}

/// Produces one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError>;
}

/// Scores items by cosine similarity between query and item embeddings.
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingScorer {
    async fn score(&self, query: &str, items: Vec<ContextItem>) -> Result<Vec<ContextItem>, RetrievalError> {
        if items.is_empty() {
            return Ok(items);
        }
        let mut texts = Vec::with_capacity(items.len() + 1);
        texts.push(query.to_string());
        texts.extend(items.iter().map(|item| item.text.clone()));

        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(RetrievalError::Embedding(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let (query_vector, item_vectors) = vectors.split_at(1);
        Ok(items
            .into_iter()
            .zip(item_vectors)
            .map(|(item, vector)| item.with_relevance(cosine_similarity(&query_vector[0], vector)))
            .collect())
    }
}

/// Cosine similarity of two vectors; 0.0 when lengths differ or either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        return 0.0;
    }
    dot / denominator
}

fn slot_score(slot: &Option<ContextItem>) -> Option<f64> {
    slot.as_ref()
        .and_then(|item| item.relevance)
        .filter(|score| !score.is_nan())
}

/// Stable descending sort by relevance; unscored items and empty slots last.
pub fn rank_by_relevance(mut slots: Vec<Option<ContextItem>>) -> Vec<Option<ContextItem>> {
    slots.sort_by(|a, b| match (slot_score(a), slot_score(b)) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    slots
}

/// Queries every connector concurrently and ranks the combined items.
pub struct SourceRetriever {
    connectors: Vec<Arc<dyn ContextSourceConnector>>,
    scorer: Arc<dyn RelevanceScorer>,
    top_k: usize,
}

impl SourceRetriever {
    pub fn new(connectors: Vec<Arc<dyn ContextSourceConnector>>) -> Self {
        Self {
            connectors,
            scorer: Arc::new(SourceScores),
            top_k: 10,
        }
    }

    /// arXiv always; GitHub and web search when their credentials are set.
    pub fn from_env() -> Self {
        let mut connectors: Vec<Arc<dyn ContextSourceConnector>> = vec![Arc::new(ArxivConnector::new())];
        match GithubConnector::from_env() {
            Some(github) => connectors.push(Arc::new(github)),
            None => log::info!("fanout_research::retrieval::from_env(): GITHUB_TOKEN not set, skipping GitHub"),
        }
        match WebSearchConnector::from_env() {
            Some(web) => connectors.push(Arc::new(web)),
            None => log::info!("fanout_research::retrieval::from_env(): SERP_API_KEY not set, skipping web search"),
        }
        Self::new(connectors)
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Search all connectors; a failing connector is logged and contributes nothing.
    async fn collect(&self, query: &str) -> Vec<ContextItem> {
        let searches = self.connectors.iter().map(|connector| async move {
            (connector.source(), connector.search(query).await)
        });
        let mut items = Vec::new();
        for (source, outcome) in join_all(searches).await {
            match outcome {
                Ok(found) => {
                    log::debug!(
                        "fanout_research::retrieval::collect(...): {} returned {} item(s)",
                        source,
                        found.len()
                    );
                    items.extend(found);
                }
                Err(err) => log::warn!(
                    "fanout_research::retrieval::collect(...): {} search failed: {}",
                    source,
                    err
                ),
            }
        }
        items
    }
}

#[async_trait]
impl ContextRetriever for SourceRetriever {
    async fn gather_context(
        &self,
        query: &str,
        session: &Session,
    ) -> Result<Vec<Option<ContextItem>>, RetrievalError> {
        let items = self.collect(query).await;
        log::info!(
            "fanout_research::retrieval::gather_context(...): session {} collected {} item(s) from {} source(s)",
            session.session_id,
            items.len(),
            self.connectors.len()
        );
        let scored = self.scorer.score(query, items).await?;
        let mut ranked = rank_by_relevance(scored.into_iter().map(Some).collect());
        ranked.truncate(self.top_k);
        Ok(ranked)
    }
}
