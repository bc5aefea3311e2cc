//! Stream events published to per-session broadcast topics.
//!
//! Every observable step of a research run becomes a [`StreamEvent`]. Events
//! are append-only: once published they are never mutated or retracted.
//!
//! # Topics
//!
//! Each session has three kinds of topic (see [`Topic`]):
//!
//! - **lifecycle**: `agent-update`, `agent-result`, `progress`, `metadata`, `result`
//! - **agent-chunk:&lt;role&gt;**: one per role, carrying that role's `agent-chunk` events
//! - **ai-chunk**: the session-wide "primary answer" topic, mirrored only by the synthesizer
//!
//! # Event Flow (one specialist)
//!
//! ```text
//! lifecycle            agent-update { status: starting }
//! lifecycle            agent-update { status: running }
//! agent-chunk:analyst  agent-chunk { chunk: "The", isComplete: false }
//! agent-chunk:analyst  agent-chunk { chunk: " answer", isComplete: false }
//! agent-chunk:analyst  agent-chunk { chunk: "", isComplete: true }     <- terminal sentinel
//! lifecycle            agent-update { status: completed, durationMs }
//! lifecycle            agent-result { response, modelId }
//! ```
//!
//! # Wire format
//!
//! Events serialise as internally tagged JSON with camelCase fields:
//!
//! ```rust
//! use fanout_research::event::{AgentStatus, StreamEvent};
//! use fanout_research::role::RoleKind;
//!
//! let event = StreamEvent::chunk(RoleKind::Analyst, "tok");
//! let json = serde_json::to_value(&event).unwrap();
//! assert_eq!(json["type"], "agent-chunk");
//! assert_eq!(json["role"], "analyst");
//! assert_eq!(json["isComplete"], false);
//! ```

use crate::research::role::RoleKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state carried by `agent-update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Starting,
    Running,
    Completed,
    /// The task gave up after exhausting retries, or hit a terminal error.
    Failed,
}

/// Pipeline-level state carried by `progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Starting,
    Completed,
    Failed,
}

/// A single event on a session's broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    // ── Agent lifecycle ──────────────────────────────────────────────────
    /// A role moved to a new lifecycle status.
    AgentUpdate {
        role: RoleKind,
        status: AgentStatus,
        message: String,
        timestamp: DateTime<Utc>,
        /// Set on `completed` (and `failed`): milliseconds since the task started.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    /// One streamed fragment for a role, or its terminal sentinel
    /// (`is_complete == true`, empty `chunk`).
    AgentChunk {
        role: RoleKind,
        chunk: String,
        is_complete: bool,
        timestamp: DateTime<Utc>,
    },

    /// The full response of a role. Never published before that role's sentinel.
    AgentResult {
        role: RoleKind,
        response: String,
        model_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Synthesizer output mirrored onto the session-wide answer topic.
    #[serde(rename = "ai-chunk")]
    AnswerChunk {
        chunk: String,
        is_complete: bool,
        timestamp: DateTime<Utc>,
    },

    // ── Pipeline ─────────────────────────────────────────────────────────
    /// Coarse progress of the whole run.
    Progress {
        step: String,
        status: ProgressStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Informational payload (fan-out roster, fan-in summary).
    Metadata {
        kind: String,
        message: String,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    },

    /// The final answer of a run. Exactly one per run that reaches a terminal
    /// answer (including the fixed no-context answer).
    Result {
        answer: String,
        model: String,
        tokens_used: Option<u64>,
        contexts_used: usize,
        timestamp: DateTime<Utc>,
    },
}

impl StreamEvent {
    pub fn update(role: RoleKind, status: AgentStatus, message: impl Into<String>) -> Self {
        StreamEvent::AgentUpdate {
            role,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            duration_ms: None,
        }
    }

    pub fn update_with_duration(
        role: RoleKind,
        status: AgentStatus,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        StreamEvent::AgentUpdate {
            role,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            duration_ms: Some(duration_ms),
        }
    }

    pub fn chunk(role: RoleKind, chunk: impl Into<String>) -> Self {
        StreamEvent::AgentChunk {
            role,
            chunk: chunk.into(),
            is_complete: false,
            timestamp: Utc::now(),
        }
    }

    pub fn chunk_sentinel(role: RoleKind) -> Self {
        StreamEvent::AgentChunk {
            role,
            chunk: String::new(),
            is_complete: true,
            timestamp: Utc::now(),
        }
    }

    pub fn answer_chunk(chunk: impl Into<String>) -> Self {
        StreamEvent::AnswerChunk {
            chunk: chunk.into(),
            is_complete: false,
            timestamp: Utc::now(),
        }
    }

    pub fn answer_sentinel() -> Self {
        StreamEvent::AnswerChunk {
            chunk: String::new(),
            is_complete: true,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(step: impl Into<String>, status: ProgressStatus, message: impl Into<String>) -> Self {
        StreamEvent::Progress {
            step: step.into(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn metadata(message: impl Into<String>, details: serde_json::Value) -> Self {
        StreamEvent::Metadata {
            kind: "info".to_string(),
            message: message.into(),
            details,
            timestamp: Utc::now(),
        }
    }

    pub fn agent_result(
        role: RoleKind,
        response: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        StreamEvent::AgentResult {
            role,
            response: response.into(),
            model_id: model_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn result(
        answer: impl Into<String>,
        model: impl Into<String>,
        tokens_used: Option<u64>,
        contexts_used: usize,
    ) -> Self {
        StreamEvent::Result {
            answer: answer.into(),
            model: model.into(),
            tokens_used,
            contexts_used,
            timestamp: Utc::now(),
        }
    }

    /// Role this event belongs to, if it is role-scoped.
    pub fn role(&self) -> Option<RoleKind> {
        match self {
            StreamEvent::AgentUpdate { role, .. }
            | StreamEvent::AgentChunk { role, .. }
            | StreamEvent::AgentResult { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// The topic this event is published on.
    pub fn topic(&self) -> Topic {
        match self {
            StreamEvent::AgentChunk { role, .. } => Topic::Chunks(*role),
            StreamEvent::AnswerChunk { .. } => Topic::Answer,
            _ => Topic::Lifecycle,
        }
    }

    /// `true` for a terminal sentinel on a chunk or answer topic.
    pub fn is_sentinel(&self) -> bool {
        matches!(
            self,
            StreamEvent::AgentChunk { is_complete: true, .. }
                | StreamEvent::AnswerChunk { is_complete: true, .. }
        )
    }

    /// `true` for events whose delivery is best-effort: intermediate chunks
    /// and metadata. Sentinels are delivered like lifecycle events.
    pub fn is_best_effort(&self) -> bool {
        match self {
            StreamEvent::AgentChunk { is_complete, .. }
            | StreamEvent::AnswerChunk { is_complete, .. } => !is_complete,
            StreamEvent::Metadata { .. } => true,
            _ => false,
        }
    }
}

/// A named stream within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Lifecycle,
    Chunks(RoleKind),
    /// Session-wide primary answer stream.
    Answer,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Lifecycle => f.write_str("lifecycle"),
            Topic::Chunks(role) => write!(f, "agent-chunk:{}", role.key()),
            Topic::Answer => f.write_str("ai-chunk"),
        }
    }
}

/// An event as delivered to subscribers, stamped with its session and topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub session_id: String,
    pub topic: Topic,
    pub event: StreamEvent,
}
