//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use fanout_research::channel::{BroadcastHub, Broadcaster, PublishError};
use fanout_research::context::{ContextItem, Session};
use fanout_research::event::{AgentStatus, Envelope, StreamEvent};
use fanout_research::pipeline::ContextRetriever;
use fanout_research::provider::{FragmentStream, ProviderError, TextGenerator};
use fanout_research::retrieval::RetrievalError;
use fanout_research::role::{RoleKind, RoleRegistry};
use futures_util::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SPECIALISTS: [RoleKind; 4] = [
    RoleKind::Analyst,
    RoleKind::Summarizer,
    RoleKind::FactChecker,
    RoleKind::Classifier,
];

/// Model id bound to `role` by [`distinct_registry`].
pub fn model_for(role: RoleKind) -> String {
    format!("model-{}", role.key())
}

/// Default registry with one distinct model per role, so scripts can target roles.
pub fn distinct_registry() -> RoleRegistry {
    let mut registry = RoleRegistry::default();
    for role in SPECIALISTS.iter().copied().chain([RoleKind::Synthesizer]) {
        registry = registry.with_model(role, model_for(role));
    }
    registry
}

/// What a scripted model does on one call.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Stream these fragments, then end.
    Fragments(Vec<String>),
    /// Stream the prompt back in fixed-size pieces.
    EchoPrompt,
    /// Fail before producing a stream.
    Fail(ProviderError),
    /// Stream these fragments, then yield an error.
    BreakAfter(Vec<String>, ProviderError),
    /// Panic inside the task.
    Panic,
}

impl Reply {
    pub fn text(fragments: &[&str]) -> Self {
        Reply::Fragments(fragments.iter().map(|f| f.to_string()).collect())
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Text generator driven by per-model scripts.
///
/// Each model has a queue of replies; the last reply repeats once the queue
/// is down to one entry. Every call is recorded.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, String)>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every specialist streams `"<Label> says"`, `" hi"`; the synthesizer echoes its prompt.
    pub fn answering_all() -> Self {
        let mut generator = Self::new();
        for role in SPECIALISTS {
            generator = generator.script(
                &model_for(role),
                Reply::Fragments(vec![format!("{} says", role.label()), " hi".to_string()]),
            );
        }
        generator.script(&model_for(RoleKind::Synthesizer), Reply::EchoPrompt)
    }

    pub fn script(self, model: &str, reply: Reply) -> Self {
        self.script_sequence(model, vec![reply])
    }

    pub fn script_sequence(self, model: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), replies.into_iter().collect());
        self
    }

    /// Sleep this long before each fragment of `model`.
    pub fn with_delay(mut self, model: &str, delay: Duration) -> Self {
        self.delays.insert(model.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, model: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == model).count()
    }

    pub fn prompts_for(&self, model: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == model)
            .map(|(_, p)| p)
            .collect()
    }

    /// Highest number of streams that were open at the same time.
    pub fn max_concurrent_streams(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn next_reply(&self, model: &str) -> Option<Reply> {
        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts.get_mut(model)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, model_id: &str, prompt: &str) -> Result<FragmentStream, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((model_id.to_string(), prompt.to_string()));

        let reply = self
            .next_reply(model_id)
            .ok_or_else(|| ProviderError::Failed(format!("no script for {}", model_id)))?;

        let (fragments, tail) = match reply {
            Reply::Fragments(fragments) => (fragments, None),
            Reply::EchoPrompt => (
                prompt
                    .chars()
                    .collect::<Vec<_>>()
                    .chunks(64)
                    .map(|c| c.iter().collect::<String>())
                    .collect(),
                None,
            ),
            Reply::Fail(error) => return Err(error),
            Reply::BreakAfter(fragments, error) => (fragments, Some(error)),
            Reply::Panic => panic!("scripted panic for {}", model_id),
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));

        let delay = self.delays.get(model_id).copied();
        let items = fragments
            .into_iter()
            .map(Ok)
            .chain(tail.map(Err))
            .collect::<Vec<Result<String, ProviderError>>>();

        let stream = stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .map(move |item| {
                let _alive = &guard;
                item
            });
        Ok(Box::pin(stream))
    }
}

/// Hub wrapper that can refuse publishes.
pub struct FlakyBroadcaster {
    pub hub: BroadcastHub,
    drop_best_effort: bool,
    lifecycle_failures: AtomicU32,
    rejected: AtomicU32,
}

impl FlakyBroadcaster {
    pub fn new() -> Self {
        Self {
            hub: BroadcastHub::new(1024).with_history(),
            drop_best_effort: false,
            lifecycle_failures: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
        }
    }

    /// Reject every intermediate chunk and metadata event.
    pub fn dropping_best_effort(mut self) -> Self {
        self.drop_best_effort = true;
        self
    }

    /// Reject the first `n` lifecycle publishes.
    pub fn failing_lifecycle(self, n: u32) -> Self {
        self.lifecycle_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broadcaster for FlakyBroadcaster {
    async fn publish(&self, session_id: &str, event: StreamEvent) -> Result<(), PublishError> {
        let reject = if event.is_best_effort() {
            self.drop_best_effort
        } else {
            self.lifecycle_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        };
        if reject {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(PublishError::new(session_id, "transport unavailable"));
        }
        self.hub.publish(session_id, event).await
    }

    async fn end_session(&self, session_id: &str) {
        self.hub.close_session(session_id);
    }
}

/// Retriever returning a fixed answer.
pub struct StaticRetriever {
    result: Result<Vec<Option<ContextItem>>, RetrievalError>,
    calls: AtomicU32,
}

impl StaticRetriever {
    pub fn new(contexts: Vec<Option<ContextItem>>) -> Self {
        Self {
            result: Ok(contexts),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(error: RetrievalError) -> Self {
        Self {
            result: Err(error),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextRetriever for StaticRetriever {
    async fn gather_context(
        &self,
        _query: &str,
        _session: &Session,
    ) -> Result<Vec<Option<ContextItem>>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub fn events(history: &[Envelope]) -> Vec<StreamEvent> {
    history.iter().map(|e| e.event.clone()).collect()
}

/// `(chunk, is_complete)` pairs of one role, in publish order.
pub fn chunks_for(events: &[StreamEvent], role: RoleKind) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::AgentChunk {
                role: r,
                chunk,
                is_complete,
                ..
            } if *r == role => Some((chunk.clone(), *is_complete)),
            _ => None,
        })
        .collect()
}

/// `(chunk, is_complete)` pairs of the answer topic.
pub fn answer_chunks(events: &[StreamEvent]) -> Vec<(String, bool)> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::AnswerChunk {
                chunk, is_complete, ..
            } => Some((chunk.clone(), *is_complete)),
            _ => None,
        })
        .collect()
}

/// Statuses of one role's `agent-update` events, in publish order.
pub fn statuses_for(events: &[StreamEvent], role: RoleKind) -> Vec<AgentStatus> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::AgentUpdate { role: r, status, .. } if *r == role => Some(*status),
            _ => None,
        })
        .collect()
}

pub fn results_of(events: &[StreamEvent]) -> Vec<StreamEvent> {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Result { .. }))
        .cloned()
        .collect()
}

/// Assert the per-role stream contract: non-terminal chunks, then exactly one
/// empty terminal chunk, and no role-scoped event after it except the
/// closing `agent-update` and `agent-result`.
pub fn assert_stream_closed_once(events: &[StreamEvent], role: RoleKind) {
    let chunks = chunks_for(events, role);
    let (last, body) = chunks.split_last().expect("role published no chunks");
    assert_eq!(last, &(String::new(), true), "{} must end with the sentinel", role);
    assert!(
        body.iter().all(|(_, complete)| !complete),
        "{} has a sentinel before the end",
        role
    );

    let sentinel_at = events
        .iter()
        .position(|e| matches!(e, StreamEvent::AgentChunk { role: r, is_complete: true, .. } if *r == role))
        .unwrap();
    for event in &events[sentinel_at + 1..] {
        if event.role() == Some(role) {
            assert!(
                matches!(
                    event,
                    StreamEvent::AgentUpdate {
                        status: AgentStatus::Completed | AgentStatus::Failed,
                        ..
                    } | StreamEvent::AgentResult { .. }
                ),
                "{} published {:?} after its sentinel",
                role,
                event
            );
        }
    }
}
