//! # fanout-research
//!
//! Concurrent research over several streaming language-model "agents": one
//! query fans out to a fixed set of specialist roles running in parallel, each
//! streams its tokens to observers as they arrive, individual failures are
//! isolated, and the surviving answers fan in to a synthesizer that produces a
//! single consolidated answer.
//!
//! The crate is organised around a few layers:
//!
//! * **Roles**: [`role::AgentRole`] descriptors (model, prompt template, status
//!   phrases) held in an immutable [`role::RoleRegistry`].
//! * **Agent tasks**: [`agent_task::AgentTask`] drives any role through the
//!   same lifecycle: start, availability check with retries, streamed
//!   generation, completion.
//! * **Fan-out / fan-in**: [`dispatcher::FanOutDispatcher`] runs the
//!   specialists concurrently and returns one tagged outcome per role;
//!   [`synthesizer::Synthesizer`] consolidates the successes deterministically.
//! * **Pipeline**: [`pipeline::ResearchPipeline`] is the top-level state
//!   machine (gather context, fan out, fan in, publish) with run admission
//!   control.
//! * **Broadcast**: [`channel::Broadcaster`] is the per-session event sink;
//!   [`channel::BroadcastHub`] is the in-process implementation that
//!   subscribers read [`event::StreamEvent`]s from.
//! * **Collaborators**: [`provider::TextGenerator`] (with an OpenAI-compatible
//!   streaming client in [`providers`]), [`pipeline::ContextRetriever`] (with
//!   [`retrieval::SourceRetriever`] over the [`sources`] connectors, ranked by
//!   [`providers::openai_embeddings::OpenAiCompatibleEmbedder`] or any other
//!   [`retrieval::Embedder`]).
//!
//! ## Event stream of one run
//!
//! ```text
//! progress{orchestration, starting}
//! metadata{"Fanning out to 4 specialized AI agents in parallel"}
//! agent-update{analyst, starting} ... agent-chunk{analyst, ...} ... agent-result{analyst}
//! agent-update{summarizer, starting} ...        (interleaved across roles)
//! metadata{"All agents complete. Synthesizing results with gpt-4o"}
//! agent-chunk{synthesizer, ...} + ai-chunk{...}
//! progress{orchestration, completed}
//! result{answer, model, contextsUsed}
//! ```
//!
//! Within one role's chunk topic events arrive in generation order and end
//! with exactly one `isComplete: true` sentinel. Roles interleave freely, so
//! consumers demultiplex by role.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout_research::{
//!     OpenAiCompatibleGenerator, PipelineOutcome, ProviderConfig, ResearchConfig,
//!     ResearchPipeline, RoleRegistry, Session, SourceRetriever,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     fanout_research::init_logger();
//!
//!     let config = ResearchConfig::default();
//!     let hub = Arc::new(config.build_hub());
//!     let pipeline = ResearchPipeline::new(
//!         config,
//!         RoleRegistry::default(),
//!         Arc::new(OpenAiCompatibleGenerator::new(&ProviderConfig::from_env())),
//!         Arc::new(SourceRetriever::from_env()),
//!         hub,
//!     );
//!
//!     let session = Session::generate("user-1");
//!     if let PipelineOutcome::Completed(report) =
//!         pipeline.run("How do vector databases index embeddings?", &session).await?
//!     {
//!         println!("{}", report.answer);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications pick the verbosity with `RUST_LOG`; later calls are no-ops.
///
/// ```rust
/// fanout_research::init_logger();
/// fanout_research::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod research;

// Re-exporting modules and key items for easier external access.
pub use research::agent_task;
pub use research::agent_task::{AgentResult, AgentTask, AgentTaskError, ChunkMirror};
pub use research::availability;
pub use research::availability::{AlwaysAvailable, AvailabilityCheck, InjectedFailures};
pub use research::channel;
pub use research::channel::{BroadcastHub, Broadcaster, PublishError, SessionSubscription};
pub use research::config;
pub use research::config::{ProviderConfig, ResearchConfig};
pub use research::context;
pub use research::context::{ContextItem, ContextSource, Session};
pub use research::dispatcher;
pub use research::dispatcher::{AgentOutcome, FanOutDispatcher, TaskFailure};
pub use research::event;
pub use research::event::{AgentStatus, Envelope, ProgressStatus, StreamEvent, Topic};
pub use research::http_client_pool;
pub use research::pipeline;
pub use research::pipeline::{
    ContextRetriever, PipelineError, PipelineOutcome, PipelineState, ResearchPipeline,
    ResearchReport,
};
pub use research::provider;
pub use research::provider::{FragmentStream, ProviderError, TextGenerator};
pub use research::providers;
pub use research::providers::openai_compat::OpenAiCompatibleGenerator;
pub use research::providers::openai_embeddings::OpenAiCompatibleEmbedder;
pub use research::retrieval;
pub use research::retrieval::{RetrievalError, SourceRetriever};
pub use research::role;
pub use research::role::{AgentRole, RoleKind, RoleRegistry};
pub use research::sources;
pub use research::substrate;
pub use research::substrate::{RateLimit, RetryPolicy};
pub use research::synthesizer;
pub use research::synthesizer::Synthesizer;
