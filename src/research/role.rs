//! Specialist roles and the immutable role registry.
//!
//! A role is configuration, not runtime state: it binds one [`RoleKind`] to a
//! display name, a model identifier, the phrases used in lifecycle updates and
//! a [`PromptTemplate`]. Every agent task in a run is the same parametrised
//! [`AgentTask`](crate::research::agent_task::AgentTask) driven by one of these
//! descriptors.
//!
//! # Example
//!
//! ```rust
//! use fanout_research::role::{RoleKind, RoleRegistry};
//!
//! let registry = RoleRegistry::default().with_model(RoleKind::FactChecker, "gpt-4o");
//!
//! assert_eq!(registry.specialists().len(), 4);
//! assert_eq!(registry.get(RoleKind::FactChecker).unwrap().model_id, "gpt-4o");
//! assert_eq!(registry.synthesizer().kind, RoleKind::Synthesizer);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed set of roles an orchestration run knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoleKind {
    /// Deep, detailed analysis of the query against the context.
    Analyst,
    /// Concise key-point summary.
    Summarizer,
    /// Claim verification against the context.
    FactChecker,
    /// Topic classification and categorisation.
    Classifier,
    /// Fan-in role that consolidates every specialist's answer.
    Synthesizer,
}

impl RoleKind {
    /// Wire key used in events (`"analyst"`, `"factChecker"`, ...).
    pub fn key(&self) -> &'static str {
        match self {
            RoleKind::Analyst => "analyst",
            RoleKind::Summarizer => "summarizer",
            RoleKind::FactChecker => "factChecker",
            RoleKind::Classifier => "classifier",
            RoleKind::Synthesizer => "synthesizer",
        }
    }

    /// Capitalised key, used to label blocks in the synthesis prompt.
    pub fn label(&self) -> &'static str {
        match self {
            RoleKind::Analyst => "Analyst",
            RoleKind::Summarizer => "Summarizer",
            RoleKind::FactChecker => "FactChecker",
            RoleKind::Classifier => "Classifier",
            RoleKind::Synthesizer => "Synthesizer",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Phrases shown in `agent-update` messages, prefixed by the role's display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPhrases {
    pub starting: String,
    pub running: String,
    pub completed: String,
}

impl StatusPhrases {
    pub fn new(
        starting: impl Into<String>,
        running: impl Into<String>,
        completed: impl Into<String>,
    ) -> Self {
        Self {
            starting: starting.into(),
            running: running.into(),
            completed: completed.into(),
        }
    }
}

/// Prompt frame shared by every role.
///
/// Renders as:
///
/// ```text
/// <preamble>
///
/// <query_label>: <query>
///
/// <body_label>:
/// <body>
///
/// <instruction>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub preamble: String,
    pub query_label: String,
    pub body_label: String,
    pub instruction: String,
}

impl PromptTemplate {
    /// Template for a specialist that reads a rendered context block.
    pub fn specialist(preamble: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            preamble: preamble.into(),
            query_label: "Query".to_string(),
            body_label: "Context".to_string(),
            instruction: instruction.into(),
        }
    }

    /// Fill the template with a query and an already rendered body.
    pub fn render(&self, query: &str, body: &str) -> String {
        format!(
            "{}\n\n{}: {}\n\n{}:\n{}\n\n{}",
            self.preamble, self.query_label, query, self.body_label, body, self.instruction
        )
    }
}

/// Descriptor for one role: identity, model binding and prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRole {
    pub kind: RoleKind,
    /// Human-readable name, e.g. `"GPT-4 Analyst"`.
    pub display_name: String,
    /// Model identifier handed to the [`TextGenerator`](crate::research::provider::TextGenerator).
    pub model_id: String,
    pub phrases: StatusPhrases,
    pub template: PromptTemplate,
}

impl AgentRole {
    pub fn new(
        kind: RoleKind,
        display_name: impl Into<String>,
        model_id: impl Into<String>,
        phrases: StatusPhrases,
        template: PromptTemplate,
    ) -> Self {
        Self {
            kind,
            display_name: display_name.into(),
            model_id: model_id.into(),
            phrases,
            template,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// `"<display name>: <phrase>"`
    pub fn status_message(&self, phrase: &str) -> String {
        format!("{}: {}", self.display_name, phrase)
    }

    pub fn analyst() -> Self {
        Self::new(
            RoleKind::Analyst,
            "GPT-4 Analyst",
            "gpt-4o",
            StatusPhrases::new(
                "Starting deep analysis",
                "Generating detailed analysis",
                "Analysis complete",
            ),
            PromptTemplate::specialist(
                "You are a deep analysis specialist. Provide a comprehensive, detailed analysis of the following query based on the provided context. Be thorough and insightful.",
                "Provide your detailed analysis:",
            ),
        )
    }

    pub fn summarizer() -> Self {
        Self::new(
            RoleKind::Summarizer,
            "Claude Summarizer",
            "gpt-4o",
            StatusPhrases::new(
                "Starting summarization",
                "Generating concise summary",
                "Summary complete",
            ),
            PromptTemplate::specialist(
                "You are a summarization specialist. Create a clear, concise summary of the key points related to the query. Focus on the most important information.",
                "Provide a concise summary with key points:",
            ),
        )
    }

    pub fn fact_checker() -> Self {
        Self::new(
            RoleKind::FactChecker,
            "Gemini Fact-Checker",
            "gpt-4o-mini",
            StatusPhrases::new(
                "Starting fact verification",
                "Verifying claims",
                "Fact-checking complete",
            ),
            PromptTemplate::specialist(
                "You are a fact-checking specialist. Analyze the provided context and verify the accuracy of information related to the query. Identify any claims that need validation.",
                "Provide your fact-checking analysis:",
            ),
        )
    }

    pub fn classifier() -> Self {
        Self::new(
            RoleKind::Classifier,
            "Mistral Classifier",
            "gpt-4o",
            StatusPhrases::new(
                "Starting classification",
                "Categorizing topics",
                "Classification complete",
            ),
            PromptTemplate::specialist(
                "You are a classification specialist. Categorize the query and identify key topics, themes, and relevant domains. Provide clear categorization.",
                "Provide your classification and categorization:",
            ),
        )
    }

    pub fn synthesizer() -> Self {
        Self::new(
            RoleKind::Synthesizer,
            "GPT-4 Synthesizer",
            "gpt-4o",
            StatusPhrases::new(
                "Starting synthesis of all agent responses",
                "Combining agent insights",
                "Final synthesis complete",
            ),
            PromptTemplate {
                preamble: "You are a synthesis specialist. You have received analyses from multiple AI agents, each with different specializations. Your job is to synthesize their insights into a single, comprehensive, coherent answer.".to_string(),
                query_label: "Original Query".to_string(),
                body_label: "Agent Responses".to_string(),
                instruction: "Synthesize these perspectives into a comprehensive, well-structured answer that:\n1. Combines the best insights from each agent\n2. Resolves any contradictions\n3. Provides a clear, actionable response\n4. Maintains accuracy and nuance\n\nYour synthesized response:".to_string(),
            },
        )
    }
}

/// Immutable mapping from roles to their descriptors.
///
/// Specialists keep the order they were registered in; that order is the
/// dispatch order and therefore the order of blocks in the synthesis prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleRegistry {
    specialists: Vec<AgentRole>,
    synthesizer: AgentRole,
}

impl RoleRegistry {
    /// Build a registry. Duplicate specialist kinds keep their first entry.
    pub fn new(specialists: Vec<AgentRole>, synthesizer: AgentRole) -> Self {
        let mut unique: Vec<AgentRole> = Vec::with_capacity(specialists.len());
        for role in specialists {
            if unique.iter().any(|r| r.kind == role.kind) {
                log::warn!(
                    "fanout_research::role::RoleRegistry::new(...): duplicate role '{}' ignored",
                    role.kind
                );
                continue;
            }
            unique.push(role);
        }
        Self {
            specialists: unique,
            synthesizer,
        }
    }

    /// Return a copy with `kind` bound to a different model.
    pub fn with_model(mut self, kind: RoleKind, model_id: impl Into<String>) -> Self {
        let model_id = model_id.into();
        if self.synthesizer.kind == kind {
            self.synthesizer.model_id = model_id;
            return self;
        }
        if let Some(role) = self.specialists.iter_mut().find(|r| r.kind == kind) {
            role.model_id = model_id;
        }
        self
    }

    pub fn specialists(&self) -> &[AgentRole] {
        &self.specialists
    }

    pub fn synthesizer(&self) -> &AgentRole {
        &self.synthesizer
    }

    pub fn get(&self, kind: RoleKind) -> Option<&AgentRole> {
        if self.synthesizer.kind == kind {
            return Some(&self.synthesizer);
        }
        self.specialists.iter().find(|r| r.kind == kind)
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new(
            vec![
                AgentRole::analyst(),
                AgentRole::summarizer(),
                AgentRole::fact_checker(),
                AgentRole::classifier(),
            ],
            AgentRole::synthesizer(),
        )
    }
}
