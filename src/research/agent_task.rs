//! The parametrised per-role agent lifecycle.
//!
//! One [`AgentTask`] value runs any [`AgentRole`]: specialists through
//! [`AgentTask::run`], the synthesizer through [`AgentTask::execute`] with a
//! pre-built prompt and [`ChunkMirror::Answer`].
//!
//! # Lifecycle
//!
//! ```text
//! throttle (role, user)
//!   -> agent-update{starting}
//!   -> availability check              (retried in place)
//!   -> agent-update{running}
//!   -> generate + agent-chunk per fragment (retried only before the first fragment)
//!   -> agent-chunk{isComplete:true}    (and ai-chunk sentinel when mirroring)
//!   -> agent-update{completed, durationMs}
//!   -> agent-result
//! ```
//!
//! A task that fails after `starting` still closes its chunk stream with the
//! sentinel, then publishes `agent-update{failed}` and no `agent-result`.
//!
//! Lifecycle events and sentinels are retried with the task's
//! [`RetryPolicy`] and logged if they still fail; intermediate chunks are
//! published in order and a failure is only logged. No publish failure ever
//! fails the task.

use crate::research::availability::{AlwaysAvailable, AvailabilityCheck};
use crate::research::channel::{deliver, Broadcaster};
use crate::research::context::{render_context_block, ContextItem, Session};
use crate::research::event::{AgentStatus, StreamEvent};
use crate::research::provider::{ProviderError, TextGenerator};
use crate::research::role::{AgentRole, RoleKind};
use crate::research::substrate::{retry_step, RetryPolicy, RollingWindowLimiter, Transient};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Key of the per-role, per-caller generation throttle.
pub type ThrottleKey = (RoleKind, String);

/// Output of one successful agent task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    pub role: RoleKind,
    pub response: String,
    pub model_id: String,
    pub duration_ms: u64,
}

/// Reasons an agent task produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentTaskError {
    /// Upstream stayed unavailable through every allowed attempt.
    GenerationUnavailable { attempts: u32, message: String },
    /// The provider failed terminally, or failed after output was streamed.
    GenerationError(String),
    /// The task never finished (it panicked or was torn down).
    Aborted(String),
}

impl fmt::Display for AgentTaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentTaskError::GenerationUnavailable { attempts, message } => write!(
                f,
                "Generation unavailable after {} attempt(s): {}",
                attempts, message
            ),
            AgentTaskError::GenerationError(msg) => write!(f, "Generation failed: {}", msg),
            AgentTaskError::Aborted(msg) => write!(f, "Agent task aborted: {}", msg),
        }
    }
}

impl Error for AgentTaskError {}

/// Whether a task's fragments are also mirrored onto the session answer topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkMirror {
    #[default]
    None,
    Answer,
}

/// Failure of one generation attempt, remembering whether any of its
/// fragments already reached the channel.
#[derive(Debug)]
struct AttemptError {
    error: ProviderError,
    published: bool,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl Transient for AttemptError {
    // Re-streaming after a partial output would duplicate chunks.
    fn is_transient(&self) -> bool {
        !self.published && self.error.is_transient()
    }
}

/// Runs roles through the agent lifecycle against shared collaborators.
///
/// Cloning is cheap; the dispatcher hands one clone to every spawned task.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use fanout_research::agent_task::AgentTask;
/// use fanout_research::channel::BroadcastHub;
/// use fanout_research::config::ProviderConfig;
/// use fanout_research::context::{ContextItem, ContextSource, Session};
/// use fanout_research::providers::openai_compat::OpenAiCompatibleGenerator;
/// use fanout_research::role::AgentRole;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let hub = Arc::new(BroadcastHub::default());
/// let generator = Arc::new(OpenAiCompatibleGenerator::new(&ProviderConfig::from_env()));
/// let task = AgentTask::new(generator, hub);
///
/// let contexts = vec![Some(ContextItem::new(ContextSource::Arxiv, "Transformers scale well"))];
/// let session = Session::generate("user-1");
/// let result = task
///     .run(&AgentRole::summarizer(), "How do transformers scale?", &contexts, &session)
///     .await?;
/// println!("{} ms: {}", result.duration_ms, result.response);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AgentTask {
    generator: Arc<dyn TextGenerator>,
    broadcaster: Arc<dyn Broadcaster>,
    availability: Arc<dyn AvailabilityCheck>,
    retry: RetryPolicy,
    throttle: Option<Arc<RollingWindowLimiter<ThrottleKey>>>,
}

impl AgentTask {
    pub fn new(generator: Arc<dyn TextGenerator>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            generator,
            broadcaster,
            availability: Arc::new(AlwaysAvailable),
            retry: RetryPolicy::default(),
            throttle: None,
        }
    }

    pub fn with_availability(mut self, availability: Arc<dyn AvailabilityCheck>) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Gate every task on a shared (role, user) rolling-window limiter.
    pub fn with_throttle(mut self, throttle: Arc<RollingWindowLimiter<ThrottleKey>>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a specialist role over the query and its numbered context block.
    pub async fn run(
        &self,
        role: &AgentRole,
        query: &str,
        contexts: &[Option<ContextItem>],
        session: &Session,
    ) -> Result<AgentResult, AgentTaskError> {
        let prompt = specialist_prompt(role, query, contexts);
        self.execute(role, &prompt, session, ChunkMirror::None).await
    }

    /// Run any role over an already rendered prompt.
    pub async fn execute(
        &self,
        role: &AgentRole,
        prompt: &str,
        session: &Session,
        mirror: ChunkMirror,
    ) -> Result<AgentResult, AgentTaskError> {
        if let Some(throttle) = &self.throttle {
            throttle
                .acquire(&(role.kind, session.user_id.clone()))
                .await;
        }

        let started = Instant::now();
        log::info!(
            "fanout_research::agent_task::execute(...): session {} starting {} on {}",
            session.session_id,
            role.kind,
            role.model_id
        );
        self.emit(
            session,
            StreamEvent::update(
                role.kind,
                AgentStatus::Starting,
                role.status_message(&role.phrases.starting),
            ),
        )
        .await;

        let step = format!("{}-availability", role.kind);
        if let Err(failure) = retry_step(&self.retry, &step, |attempt| {
            self.availability.check(role.kind, attempt)
        })
        .await
        {
            let error = if failure.error.is_transient() {
                AgentTaskError::GenerationUnavailable {
                    attempts: failure.attempts,
                    message: failure.error.message().to_string(),
                }
            } else {
                AgentTaskError::GenerationError(failure.error.message().to_string())
            };
            return Err(self.fail(role, session, mirror, started, error).await);
        }

        self.emit(
            session,
            StreamEvent::update(
                role.kind,
                AgentStatus::Running,
                role.status_message(&role.phrases.running),
            ),
        )
        .await;

        let step = format!("{}-generate", role.kind);
        let response = match retry_step(&self.retry, &step, |_| {
            self.stream_attempt(role, prompt, session, mirror)
        })
        .await
        {
            Ok(response) => response,
            Err(failure) => {
                let AttemptError { error, published } = failure.error;
                let error = if published {
                    AgentTaskError::GenerationError(format!(
                        "stream broke after partial output: {}",
                        error.message()
                    ))
                } else if error.is_transient() {
                    AgentTaskError::GenerationUnavailable {
                        attempts: failure.attempts,
                        message: error.message().to_string(),
                    }
                } else {
                    AgentTaskError::GenerationError(error.message().to_string())
                };
                return Err(self.fail(role, session, mirror, started, error).await);
            }
        };

        self.close_streams(role.kind, session, mirror).await;

        let duration_ms = elapsed_ms(started);
        self.emit(
            session,
            StreamEvent::update_with_duration(
                role.kind,
                AgentStatus::Completed,
                role.status_message(&role.phrases.completed),
                duration_ms,
            ),
        )
        .await;
        self.emit(
            session,
            StreamEvent::agent_result(role.kind, response.clone(), role.model_id.clone()),
        )
        .await;

        log::info!(
            "fanout_research::agent_task::execute(...): session {} {} completed in {} ms ({} chars)",
            session.session_id,
            role.kind,
            duration_ms,
            response.len()
        );

        Ok(AgentResult {
            role: role.kind,
            response,
            model_id: role.model_id.clone(),
            duration_ms,
        })
    }

    /// One generation attempt: forward every fragment as it arrives.
    async fn stream_attempt(
        &self,
        role: &AgentRole,
        prompt: &str,
        session: &Session,
        mirror: ChunkMirror,
    ) -> Result<String, AttemptError> {
        let mut fragments = self
            .generator
            .generate(&role.model_id, prompt)
            .await
            .map_err(|error| AttemptError {
                error,
                published: false,
            })?;

        let mut response = String::new();
        let mut published = false;
        while let Some(item) = fragments.next().await {
            let fragment = item.map_err(|error| AttemptError { error, published })?;
            if fragment.is_empty() {
                continue;
            }
            self.emit(session, StreamEvent::chunk(role.kind, fragment.as_str()))
                .await;
            if mirror == ChunkMirror::Answer {
                self.emit(session, StreamEvent::answer_chunk(fragment.as_str()))
                    .await;
            }
            response.push_str(&fragment);
            published = true;
        }
        Ok(response)
    }

    async fn close_streams(&self, role: RoleKind, session: &Session, mirror: ChunkMirror) {
        self.emit(session, StreamEvent::chunk_sentinel(role)).await;
        if mirror == ChunkMirror::Answer {
            self.emit(session, StreamEvent::answer_sentinel()).await;
        }
    }

    async fn fail(
        &self,
        role: &AgentRole,
        session: &Session,
        mirror: ChunkMirror,
        started: Instant,
        error: AgentTaskError,
    ) -> AgentTaskError {
        log::error!(
            "fanout_research::agent_task::execute(...): session {} {} failed: {}",
            session.session_id,
            role.kind,
            error
        );
        self.close_streams(role.kind, session, mirror).await;
        self.emit(
            session,
            StreamEvent::update_with_duration(
                role.kind,
                AgentStatus::Failed,
                role.status_message(&format!("Failed: {}", error)),
                elapsed_ms(started),
            ),
        )
        .await;
        error
    }

    /// Close the streams of a task that died before it could report back,
    /// and mark the role failed.
    pub(crate) async fn close_abandoned(
        &self,
        role: &AgentRole,
        session: &Session,
        started: Instant,
        error: AgentTaskError,
    ) -> AgentTaskError {
        self.fail(role, session, ChunkMirror::None, started, error).await
    }

    async fn emit(&self, session: &Session, event: StreamEvent) {
        deliver(
            self.broadcaster.as_ref(),
            &self.retry,
            &session.session_id,
            event,
        )
        .await;
    }
}

/// Prompt for a specialist: the role template over the numbered context block.
pub fn specialist_prompt(role: &AgentRole, query: &str, contexts: &[Option<ContextItem>]) -> String {
    role.template.render(query, &render_context_block(contexts))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u64::MAX as u128) as u64
}
