//! Shared `reqwest` clients, one per base URL.
//!
//! The streaming provider and every context connector talk HTTP. Reusing one
//! pooled client per endpoint keeps TLS sessions and idle connections warm
//! across research runs.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::time::Duration;

static CLIENT_POOL: Lazy<DashMap<String, reqwest::Client>> = Lazy::new(DashMap::new);

/// Return the pooled client for `base_url`, creating it on first use.
///
/// Cloning a `reqwest::Client` is cheap and shares its connection pool.
pub fn get_or_create_client(base_url: &str) -> reqwest::Client {
    CLIENT_POOL
        .entry(base_url.to_string())
        .or_insert_with(create_pooled_client)
        .clone()
}

/// Client settings:
/// - up to 32 idle connections per host, kept for 90 s
/// - TCP keepalive every 60 s
/// - 30 s connect timeout (no overall timeout: streams may run for minutes)
fn create_pooled_client() -> reqwest::Client {
    match reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("fanout-research/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            log::warn!(
                "fanout_research::http_client_pool::create_pooled_client(): falling back to default client: {}",
                err
            );
            reqwest::Client::new()
        }
    }
}
