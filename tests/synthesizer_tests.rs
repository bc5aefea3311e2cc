mod common;

use common::{answer_chunks, distinct_registry, events, model_for, Reply, ScriptedGenerator};
use fanout_research::agent_task::{AgentResult, AgentTask};
use fanout_research::channel::BroadcastHub;
use fanout_research::context::Session;
use fanout_research::provider::ProviderError;
use fanout_research::role::RoleKind;
use fanout_research::synthesizer::{build_synthesis_prompt, Synthesizer};
use std::sync::Arc;

fn result(role: RoleKind, response: &str, duration_ms: u64) -> AgentResult {
    AgentResult {
        role,
        response: response.to_string(),
        model_id: model_for(role),
        duration_ms,
    }
}

#[test]
fn test_prompt_ignores_completion_timing() {
    let registry = distinct_registry();
    let synth = registry.synthesizer();

    let fast = vec![
        result(RoleKind::Analyst, "A", 10),
        result(RoleKind::Summarizer, "S", 900),
        result(RoleKind::Classifier, "C", 5),
    ];
    let slow = vec![
        result(RoleKind::Analyst, "A", 4000),
        result(RoleKind::Summarizer, "S", 1),
        result(RoleKind::Classifier, "C", 77),
    ];

    assert_eq!(
        build_synthesis_prompt(synth, "What is X?", &fast),
        build_synthesis_prompt(synth, "What is X?", &slow)
    );
}

#[test]
fn test_prompt_blocks_follow_given_order() {
    let registry = distinct_registry();
    let prompt = build_synthesis_prompt(
        registry.synthesizer(),
        "q",
        &[
            result(RoleKind::Analyst, "first", 0),
            result(RoleKind::Classifier, "last", 0),
        ],
    );

    let analyst = prompt.find("--- Analyst Agent (model-analyst) ---\nfirst").unwrap();
    let classifier = prompt
        .find("--- Classifier Agent (model-classifier) ---\nlast")
        .unwrap();
    assert!(analyst < classifier);
    assert!(prompt.contains("first\n\n--- Classifier Agent"));
    assert!(!prompt.contains("Summarizer Agent"));
}

#[tokio::test]
async fn test_synthesis_streams_to_answer_topic() {
    let registry = distinct_registry();
    let generator = Arc::new(ScriptedGenerator::new().script(
        &model_for(RoleKind::Synthesizer),
        Reply::text(&["Consolidated", " view"]),
    ));
    let hub = Arc::new(BroadcastHub::new(64).with_history());
    let synthesizer = Synthesizer::new(
        AgentTask::new(generator.clone(), hub.clone()),
        registry.synthesizer().clone(),
    );
    let results = vec![result(RoleKind::Analyst, "A", 1)];

    let answer = synthesizer
        .synthesize("q", &results, &Session::new("s", "u"))
        .await
        .unwrap();

    assert_eq!(answer.role, RoleKind::Synthesizer);
    assert_eq!(answer.response, "Consolidated view");
    assert_eq!(answer.model_id, model_for(RoleKind::Synthesizer));
    assert_eq!(
        generator.prompts_for(&model_for(RoleKind::Synthesizer)),
        vec![build_synthesis_prompt(registry.synthesizer(), "q", &results)]
    );

    let events = events(&hub.history("s"));
    assert_eq!(
        answer_chunks(&events),
        vec![
            ("Consolidated".to_string(), false),
            (" view".to_string(), false),
            (String::new(), true),
        ]
    );
}

#[tokio::test]
async fn test_synthesis_failure_is_reported() {
    let registry = distinct_registry();
    let generator = Arc::new(ScriptedGenerator::new().script(
        &model_for(RoleKind::Synthesizer),
        Reply::Fail(ProviderError::Failed("context length exceeded".into())),
    ));
    let hub = Arc::new(BroadcastHub::new(64).with_history());
    let synthesizer = Synthesizer::new(
        AgentTask::new(generator, hub.clone()),
        registry.synthesizer().clone(),
    );

    let err = synthesizer
        .synthesize("q", &[result(RoleKind::Analyst, "A", 1)], &Session::new("s", "u"))
        .await
        .unwrap_err();

    assert!(err.to_string().contains("context length exceeded"));
    assert_eq!(
        answer_chunks(&events(&hub.history("s"))),
        vec![(String::new(), true)]
    );
}
