//! Plain configuration values for a research pipeline and its provider.
//!
//! Nothing here parses files. Callers build these structs directly (or start
//! from `Default` and override fields); only the provider endpoint reads the
//! environment, through [`ProviderConfig::from_env`].

use crate::research::substrate::{RateLimit, RetryPolicy};
use std::env;

pub const DEFAULT_PROVIDER_BASE_URL: &str = "http://localhost:4000";
pub const DEFAULT_PROVIDER_API_KEY: &str = "sk-not-needed";

/// Tunables of one [`ResearchPipeline`](crate::research::pipeline::ResearchPipeline).
#[derive(Debug, Clone, PartialEq)]
pub struct ResearchConfig {
    /// Ranked contexts handed to the specialists.
    pub top_k: usize,
    /// Retry policy for availability checks, pre-stream generation failures
    /// and lifecycle publishes.
    pub retry: RetryPolicy,
    /// Generation calls allowed per (role, user) per window.
    pub role_throttle: RateLimit,
    /// Pipeline runs allowed to execute at the same time.
    pub pipeline_concurrency: usize,
    /// Pipeline runs admitted per window, system-wide.
    pub pipeline_rate: RateLimit,
    /// Per-subscriber buffer of a [`BroadcastHub`](crate::research::channel::BroadcastHub).
    pub channel_capacity: usize,
    /// Whether a hub built from this config keeps a per-session event log.
    pub record_history: bool,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            retry: RetryPolicy::default(),
            role_throttle: RateLimit::per_minute(10),
            pipeline_concurrency: 50,
            pipeline_rate: RateLimit::per_minute(100),
            channel_capacity: 1024,
            record_history: false,
        }
    }
}

impl ResearchConfig {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_role_throttle(mut self, rate: RateLimit) -> Self {
        self.role_throttle = rate;
        self
    }

    pub fn with_pipeline_limits(mut self, concurrency: usize, rate: RateLimit) -> Self {
        self.pipeline_concurrency = concurrency;
        self.pipeline_rate = rate;
        self
    }

    /// Build the broadcast hub this config describes.
    pub fn build_hub(&self) -> crate::research::channel::BroadcastHub {
        let hub = crate::research::channel::BroadcastHub::new(self.channel_capacity);
        if self.record_history {
            hub.with_history()
        } else {
            hub
        }
    }
}

/// Endpoint of an OpenAI-compatible generation proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Read `LITELLM_BASE_URL` and `LITELLM_API_KEY`, falling back to a local proxy.
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("LITELLM_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_BASE_URL.to_string()),
            api_key: env::var("LITELLM_API_KEY")
                .unwrap_or_else(|_| DEFAULT_PROVIDER_API_KEY.to_string()),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER_BASE_URL, DEFAULT_PROVIDER_API_KEY)
    }
}
