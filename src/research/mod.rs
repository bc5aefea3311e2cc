// src/research/mod.rs

pub mod agent_task;
pub mod availability;
pub mod channel;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod event;
pub mod http_client_pool;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod retrieval;
pub mod role;
pub mod sources;
pub mod substrate;
pub mod synthesizer;
