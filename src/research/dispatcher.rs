//! Fan-out: one concurrent agent task per role, one tagged outcome per role.
//!
//! The dispatcher spawns every role with `tokio::spawn` and waits for all of
//! them. A failed role never cancels its siblings, and the returned outcomes
//! are in dispatch order regardless of which task finished first.

use crate::research::agent_task::{AgentResult, AgentTask, AgentTaskError};
use crate::research::context::{ContextItem, Session};
use crate::research::role::{AgentRole, RoleKind};
use std::sync::Arc;
use tokio::time::Instant;

/// A role that produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub role: RoleKind,
    pub model_id: String,
    pub error: AgentTaskError,
}

/// What one dispatched role ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentOutcome {
    Completed(AgentResult),
    Failed(TaskFailure),
}

impl AgentOutcome {
    pub fn role(&self) -> RoleKind {
        match self {
            AgentOutcome::Completed(result) => result.role,
            AgentOutcome::Failed(failure) => failure.role,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, AgentOutcome::Completed(_))
    }

    pub fn result(&self) -> Option<&AgentResult> {
        match self {
            AgentOutcome::Completed(result) => Some(result),
            AgentOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            AgentOutcome::Completed(_) => None,
            AgentOutcome::Failed(failure) => Some(failure),
        }
    }
}

/// Split outcomes into successful results and failures, both in dispatch order.
pub fn partition_outcomes(outcomes: Vec<AgentOutcome>) -> (Vec<AgentResult>, Vec<TaskFailure>) {
    let mut results = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            AgentOutcome::Completed(result) => results.push(result),
            AgentOutcome::Failed(failure) => failures.push(failure),
        }
    }
    (results, failures)
}

/// Launches a role set concurrently for one session.
#[derive(Clone)]
pub struct FanOutDispatcher {
    task: AgentTask,
}

impl FanOutDispatcher {
    pub fn new(task: AgentTask) -> Self {
        Self { task }
    }

    /// Run every role in parallel and return exactly one outcome per role,
    /// in the order of `roles`.
    pub async fn dispatch(
        &self,
        roles: &[AgentRole],
        query: &str,
        contexts: Arc<Vec<Option<ContextItem>>>,
        session: &Session,
    ) -> Vec<AgentOutcome> {
        log::info!(
            "fanout_research::dispatcher::dispatch(...): session {} fanning out to {} role(s)",
            session.session_id,
            roles.len()
        );

        let started = Instant::now();
        let mut handles = Vec::with_capacity(roles.len());
        for role in roles {
            let task = self.task.clone();
            let role_owned = role.clone();
            let query = query.to_string();
            let contexts = Arc::clone(&contexts);
            let session = session.clone();
            handles.push(tokio::spawn(async move {
                task.run(&role_owned, &query, &contexts, &session).await
            }));
        }

        let mut outcomes = Vec::with_capacity(roles.len());
        for (role, handle) in roles.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(Ok(result)) => AgentOutcome::Completed(result),
                Ok(Err(error)) => AgentOutcome::Failed(TaskFailure {
                    role: role.kind,
                    model_id: role.model_id.clone(),
                    error,
                }),
                Err(join_error) => {
                    log::error!(
                        "fanout_research::dispatcher::dispatch(...): {} task did not finish: {}",
                        role.kind,
                        join_error
                    );
                    let error = self
                        .task
                        .close_abandoned(
                            role,
                            session,
                            started,
                            AgentTaskError::Aborted(join_error.to_string()),
                        )
                        .await;
                    AgentOutcome::Failed(TaskFailure {
                        role: role.kind,
                        model_id: role.model_id.clone(),
                        error,
                    })
                }
            };
            outcomes.push(outcome);
        }

        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        log::info!(
            "fanout_research::dispatcher::dispatch(...): session {} fan-out done, {}/{} completed",
            session.session_id,
            completed,
            outcomes.len()
        );
        outcomes
    }
}
