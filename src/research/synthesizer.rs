//! Fan-in: consolidate specialist results into one answer.
//!
//! The synthesizer is an ordinary agent task whose body is the list of
//! specialist responses rather than raw contexts. Its fragments are mirrored
//! onto the session answer topic (`ai-chunk`) as well as its own chunk topic.
//!
//! Prompt text depends only on the results and their order, so re-running
//! with the same inputs yields byte-identical prompts however the specialists'
//! completion timing varied.
//!
//! ```rust
//! use fanout_research::agent_task::AgentResult;
//! use fanout_research::role::RoleKind;
//! use fanout_research::synthesizer::render_agent_responses;
//!
//! let results = vec![
//!     AgentResult { role: RoleKind::Analyst, response: "A1".into(), model_id: "gpt-4o".into(), duration_ms: 10 },
//!     AgentResult { role: RoleKind::FactChecker, response: "A3".into(), model_id: "gpt-4o-mini".into(), duration_ms: 7 },
//! ];
//! assert_eq!(
//!     render_agent_responses(&results),
//!     "--- Analyst Agent (gpt-4o) ---\nA1\n\n--- FactChecker Agent (gpt-4o-mini) ---\nA3"
//! );
//! ```

use crate::research::agent_task::{AgentResult, AgentTask, AgentTaskError, ChunkMirror};
use crate::research::context::Session;
use crate::research::role::AgentRole;

/// One labelled block per result, joined by blank lines, in the given order.
pub fn render_agent_responses(results: &[AgentResult]) -> String {
    results
        .iter()
        .map(|result| {
            format!(
                "--- {} Agent ({}) ---\n{}",
                result.role.label(),
                result.model_id,
                result.response
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Full synthesis prompt: the synthesizer's template over the labelled blocks.
pub fn build_synthesis_prompt(synthesizer: &AgentRole, query: &str, results: &[AgentResult]) -> String {
    synthesizer
        .template
        .render(query, &render_agent_responses(results))
}

/// Runs the synthesizer role.
#[derive(Clone)]
pub struct Synthesizer {
    task: AgentTask,
    role: AgentRole,
}

impl Synthesizer {
    pub fn new(task: AgentTask, role: AgentRole) -> Self {
        Self { task, role }
    }

    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    /// Synthesize `results` (dispatch order, successes only) for `query`.
    pub async fn synthesize(
        &self,
        query: &str,
        results: &[AgentResult],
        session: &Session,
    ) -> Result<AgentResult, AgentTaskError> {
        let prompt = build_synthesis_prompt(&self.role, query, results);
        log::debug!(
            "fanout_research::synthesizer::synthesize(...): session {} synthesizing {} result(s), prompt {} chars",
            session.session_id,
            results.len(),
            prompt.len()
        );
        self.task
            .execute(&self.role, &prompt, session, ChunkMirror::Answer)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::role::RoleKind;

    fn result(role: RoleKind, response: &str) -> AgentResult {
        AgentResult {
            role,
            response: response.into(),
            model_id: "gpt-4o".into(),
            duration_ms: 0,
        }
    }

    #[test]
    fn prompt_uses_synthesizer_labels() {
        let role = AgentRole::synthesizer();
        let prompt = build_synthesis_prompt(&role, "Q", &[result(RoleKind::Summarizer, "S")]);
        assert!(prompt.contains("Original Query: Q"));
        assert!(prompt.contains("Agent Responses:\n--- Summarizer Agent (gpt-4o) ---\nS"));
    }

    #[test]
    fn durations_do_not_affect_prompt() {
        let role = AgentRole::synthesizer();
        let fast = vec![result(RoleKind::Analyst, "A"), result(RoleKind::Classifier, "C")];
        let mut slow = fast.clone();
        slow[0].duration_ms = 9_000;
        assert_eq!(
            build_synthesis_prompt(&role, "Q", &fast),
            build_synthesis_prompt(&role, "Q", &slow)
        );
    }

    #[test]
    fn empty_results_render_empty_body() {
        assert_eq!(render_agent_responses(&[]), "");
    }
}
