//! The top-level research run.
//!
//! ```text
//! Idle -> GatheringContext -> EmptyResult                       (no contexts)
//!                          -> FanningOut -> FanningIn -> Completed
//! ```
//!
//! Any stage may instead end in `Failed`: retrieval errors, every specialist
//! failing, or the synthesizer failing. A run that reaches an answer
//! (including the fixed no-context answer) publishes exactly one `result`
//! event; a failed run publishes none.
//!
//! Runs are admitted through a [`RunGate`]: at most
//! `pipeline_concurrency` at once and `pipeline_rate` per window. Excess runs
//! wait for admission.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fanout_research::config::{ProviderConfig, ResearchConfig};
//! use fanout_research::context::Session;
//! use fanout_research::pipeline::{PipelineOutcome, ResearchPipeline};
//! use fanout_research::providers::openai_compat::OpenAiCompatibleGenerator;
//! use fanout_research::retrieval::SourceRetriever;
//! use fanout_research::role::RoleRegistry;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! fanout_research::init_logger();
//!
//! let config = ResearchConfig::default();
//! let hub = Arc::new(config.build_hub());
//! let pipeline = ResearchPipeline::new(
//!     config,
//!     RoleRegistry::default(),
//!     Arc::new(OpenAiCompatibleGenerator::new(&ProviderConfig::from_env())),
//!     Arc::new(SourceRetriever::from_env()),
//!     hub.clone(),
//! );
//!
//! let session = Session::generate("user-42");
//! let mut events = hub.subscribe(&session.session_id);
//! tokio::spawn(async move {
//!     while let Ok(envelope) = events.recv().await {
//!         println!("{}: {:?}", envelope.topic, envelope.event);
//!     }
//! });
//!
//! match pipeline.run("What limits transformer context length?", &session).await? {
//!     PipelineOutcome::NoContext => println!("nothing found"),
//!     PipelineOutcome::Completed(report) => println!("{}", report.answer),
//! }
//! # Ok(())
//! # }
//! ```

use crate::research::agent_task::{AgentResult, AgentTask, AgentTaskError, ThrottleKey};
use crate::research::availability::AvailabilityCheck;
use crate::research::channel::{deliver, Broadcaster};
use crate::research::config::ResearchConfig;
use crate::research::context::{ContextItem, Session};
use crate::research::dispatcher::{partition_outcomes, FanOutDispatcher, TaskFailure};
use crate::research::event::{ProgressStatus, StreamEvent};
use crate::research::provider::TextGenerator;
use crate::research::retrieval::RetrievalError;
use crate::research::role::{RoleKind, RoleRegistry};
use crate::research::substrate::{RollingWindowLimiter, RunGate};
use crate::research::synthesizer::Synthesizer;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Answer published when retrieval finds nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "No context found for the given query. Please try a different search term.";

/// Model reported with the no-context answer.
pub const NO_CONTEXT_MODEL: &str = "none";

const ORCHESTRATION_STEP: &str = "orchestration";

/// Supplies ranked evidence for a query.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Ranked contexts, most relevant first. `None` marks a slot whose
    /// retrieval failed; an empty list means nothing was found.
    async fn gather_context(
        &self,
        query: &str,
        session: &Session,
    ) -> Result<Vec<Option<ContextItem>>, RetrievalError>;
}

/// States of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    GatheringContext,
    /// Terminal: retrieval found nothing.
    EmptyResult,
    FanningOut,
    FanningIn,
    /// Terminal: an answer was published.
    Completed,
    /// Terminal: the run surfaced an error.
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::EmptyResult | PipelineState::Completed | PipelineState::Failed
        )
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, GatheringContext)
                | (GatheringContext, EmptyResult)
                | (GatheringContext, FanningOut)
                | (FanningOut, FanningIn)
                | (FanningIn, Completed)
                | (GatheringContext, Failed)
                | (FanningIn, Failed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::GatheringContext => "gathering-context",
            PipelineState::EmptyResult => "empty-result",
            PipelineState::FanningOut => "fanning-out",
            PipelineState::FanningIn => "fanning-in",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks and logs one run's transitions.
struct RunState<'a> {
    session_id: &'a str,
    current: PipelineState,
}

impl<'a> RunState<'a> {
    fn new(session_id: &'a str) -> Self {
        Self {
            session_id,
            current: PipelineState::Idle,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        if !self.current.can_transition_to(next) {
            log::warn!(
                "fanout_research::pipeline::advance(...): session {} unexpected transition {} -> {}",
                self.session_id,
                self.current,
                next
            );
        }
        log::info!(
            "fanout_research::pipeline::advance(...): session {} {} -> {}",
            self.session_id,
            self.current,
            next
        );
        self.current = next;
    }
}

/// Timing of one role in a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunSummary {
    pub role: RoleKind,
    pub model_id: String,
    pub duration_ms: u64,
}

impl From<&AgentResult> for AgentRunSummary {
    fn from(result: &AgentResult) -> Self {
        Self {
            role: result.role,
            model_id: result.model_id.clone(),
            duration_ms: result.duration_ms,
        }
    }
}

/// A specialist that produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAgent {
    pub role: RoleKind,
    pub model_id: String,
    pub reason: String,
}

impl From<&TaskFailure> for FailedAgent {
    fn from(failure: &TaskFailure) -> Self {
        Self {
            role: failure.role,
            model_id: failure.model_id.clone(),
            reason: failure.error.to_string(),
        }
    }
}

/// Aggregate returned by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchReport {
    pub session_id: String,
    pub answer: String,
    pub model: String,
    /// Slots handed to the specialists, empty ones included.
    pub contexts_used: usize,
    pub top_contexts: Vec<Option<ContextItem>>,
    /// Successful specialists, in dispatch order.
    pub agents: Vec<AgentRunSummary>,
    pub failed_agents: Vec<FailedAgent>,
    pub synthesis: AgentRunSummary,
    pub total_duration_ms: u64,
}

/// How a run that did not error ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Retrieval found nothing; the fixed no-context answer was published.
    NoContext,
    Completed(ResearchReport),
}

/// Errors that end a run without an answer.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The run gate was closed before the run was admitted.
    GateClosed,
    RetrievalFailed(RetrievalError),
    /// Every specialist failed; nothing to synthesize.
    NoAgentResults(Vec<TaskFailure>),
    SynthesisFailed(AgentTaskError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::GateClosed => write!(f, "Pipeline is not admitting runs"),
            PipelineError::RetrievalFailed(err) => write!(f, "Context retrieval failed: {}", err),
            PipelineError::NoAgentResults(failures) => {
                write!(f, "All {} agents failed", failures.len())
            }
            PipelineError::SynthesisFailed(err) => write!(f, "Synthesis failed: {}", err),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineError::RetrievalFailed(err) => Some(err),
            PipelineError::SynthesisFailed(err) => Some(err),
            _ => None,
        }
    }
}

/// Gather, fan out, fan in, publish.
pub struct ResearchPipeline {
    config: ResearchConfig,
    registry: RoleRegistry,
    retriever: Arc<dyn ContextRetriever>,
    broadcaster: Arc<dyn Broadcaster>,
    task: AgentTask,
    gate: RunGate,
}

impl ResearchPipeline {
    pub fn new(
        config: ResearchConfig,
        registry: RoleRegistry,
        generator: Arc<dyn TextGenerator>,
        retriever: Arc<dyn ContextRetriever>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let throttle: Arc<RollingWindowLimiter<ThrottleKey>> =
            Arc::new(RollingWindowLimiter::new(config.role_throttle));
        let task = AgentTask::new(generator, Arc::clone(&broadcaster))
            .with_retry_policy(config.retry.clone())
            .with_throttle(throttle);
        let gate = RunGate::new(config.pipeline_concurrency, config.pipeline_rate);
        Self {
            config,
            registry,
            retriever,
            broadcaster,
            task,
            gate,
        }
    }

    /// Replace the availability hook every agent task runs (builder pattern).
    pub fn with_availability(mut self, availability: Arc<dyn AvailabilityCheck>) -> Self {
        self.task = self.task.with_availability(availability);
        self
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    /// Stop admitting new runs.
    pub fn shutdown(&self) {
        self.gate.close();
    }

    /// Execute one research run for `query` within `session`.
    ///
    /// Once admitted, the run always ends with [`Broadcaster::end_session`]
    /// so the sink can release the session's channel.
    pub async fn run(&self, query: &str, session: &Session) -> Result<PipelineOutcome, PipelineError> {
        let _permit = self
            .gate
            .admit()
            .await
            .map_err(|_| PipelineError::GateClosed)?;
        let outcome = self.run_admitted(query, session).await;
        self.broadcaster.end_session(&session.session_id).await;
        outcome
    }

    async fn run_admitted(
        &self,
        query: &str,
        session: &Session,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started = Instant::now();
        let mut state = RunState::new(&session.session_id);

        self.publish(
            session,
            StreamEvent::progress(
                ORCHESTRATION_STEP,
                ProgressStatus::Starting,
                "Starting multi-agent research orchestration",
            ),
        )
        .await;

        state.advance(PipelineState::GatheringContext);
        let mut contexts = match self.retriever.gather_context(query, session).await {
            Ok(contexts) => contexts,
            Err(err) => {
                log::error!(
                    "fanout_research::pipeline::run(...): session {} retrieval failed: {}",
                    session.session_id,
                    err
                );
                self.fail_run(&mut state, session, "Context retrieval failed").await;
                return Err(PipelineError::RetrievalFailed(err));
            }
        };
        contexts.truncate(self.config.top_k);

        if contexts.is_empty() {
            state.advance(PipelineState::EmptyResult);
            self.publish(
                session,
                StreamEvent::result(NO_CONTEXT_ANSWER, NO_CONTEXT_MODEL, Some(0), 0),
            )
            .await;
            return Ok(PipelineOutcome::NoContext);
        }

        state.advance(PipelineState::FanningOut);
        let specialists = self.registry.specialists();
        let display_names: Vec<&str> = specialists.iter().map(|r| r.display_name.as_str()).collect();
        self.publish(
            session,
            StreamEvent::metadata(
                format!(
                    "Fanning out to {} specialized AI agents in parallel",
                    specialists.len()
                ),
                json!({ "agents": display_names, "parallelExecution": true }),
            ),
        )
        .await;

        let contexts = Arc::new(contexts);
        let outcomes = FanOutDispatcher::new(self.task.clone())
            .dispatch(specialists, query, Arc::clone(&contexts), session)
            .await;
        let (results, failures) = partition_outcomes(outcomes);

        state.advance(PipelineState::FanningIn);
        if results.is_empty() {
            log::error!(
                "fanout_research::pipeline::run(...): session {} every agent failed",
                session.session_id
            );
            self.fail_run(&mut state, session, "All agents failed").await;
            return Err(PipelineError::NoAgentResults(failures));
        }

        let synthesizer = Synthesizer::new(self.task.clone(), self.registry.synthesizer().clone());
        let failed_keys: Vec<&str> = failures.iter().map(|f| f.role.key()).collect();
        self.publish(
            session,
            StreamEvent::metadata(
                format!(
                    "All agents complete. Synthesizing results with {}",
                    synthesizer.role().model_id
                ),
                json!({
                    "completedAgents": results.len(),
                    "failedAgents": failed_keys,
                    "synthesisModel": synthesizer.role().model_id,
                }),
            ),
        )
        .await;

        let synthesis = match synthesizer.synthesize(query, &results, session).await {
            Ok(synthesis) => synthesis,
            Err(err) => {
                log::error!(
                    "fanout_research::pipeline::run(...): session {} synthesis failed: {}",
                    session.session_id,
                    err
                );
                self.fail_run(&mut state, session, "Synthesis failed").await;
                return Err(PipelineError::SynthesisFailed(err));
            }
        };

        state.advance(PipelineState::Completed);
        self.publish(
            session,
            StreamEvent::progress(
                ORCHESTRATION_STEP,
                ProgressStatus::Completed,
                "Multi-agent research orchestration complete",
            ),
        )
        .await;
        self.publish(
            session,
            StreamEvent::result(
                synthesis.response.clone(),
                synthesis.model_id.clone(),
                None,
                contexts.len(),
            ),
        )
        .await;

        Ok(PipelineOutcome::Completed(ResearchReport {
            session_id: session.session_id.clone(),
            answer: synthesis.response.clone(),
            model: synthesis.model_id.clone(),
            contexts_used: contexts.len(),
            top_contexts: contexts.as_ref().clone(),
            agents: results.iter().map(AgentRunSummary::from).collect(),
            failed_agents: failures.iter().map(FailedAgent::from).collect(),
            synthesis: AgentRunSummary::from(&synthesis),
            total_duration_ms: started.elapsed().as_millis() as u64,
        }))
    }

    async fn fail_run(&self, state: &mut RunState<'_>, session: &Session, message: &str) {
        state.advance(PipelineState::Failed);
        self.publish(
            session,
            StreamEvent::progress(ORCHESTRATION_STEP, ProgressStatus::Failed, message),
        )
        .await;
    }

    async fn publish(&self, session: &Session, event: StreamEvent) {
        deliver(
            self.broadcaster.as_ref(),
            &self.config.retry,
            &session.session_id,
            event,
        )
        .await;
    }
}
