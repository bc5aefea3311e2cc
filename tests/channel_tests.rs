use fanout_research::channel::{BroadcastHub, Broadcaster, SubscriptionError};
use fanout_research::event::{StreamEvent, Topic};
use fanout_research::role::RoleKind;
use std::time::Duration;

fn chunk_text(event: &StreamEvent) -> String {
    match event {
        StreamEvent::AgentChunk { chunk, .. } => chunk.clone(),
        other => panic!("expected a chunk, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_order_is_preserved() {
    let hub = BroadcastHub::new(64);
    let mut subscription = hub.subscribe("s");

    for i in 0..10 {
        hub.publish("s", StreamEvent::chunk(RoleKind::Analyst, i.to_string()))
            .await
            .unwrap();
    }

    let (received, dropped) = subscription.drain();
    assert_eq!(dropped, 0);
    let texts: Vec<String> = received.iter().map(|e| chunk_text(&e.event)).collect();
    assert_eq!(texts, (0..10).map(|i| i.to_string()).collect::<Vec<_>>());
    assert!(received
        .iter()
        .all(|e| e.topic == Topic::Chunks(RoleKind::Analyst) && e.session_id == "s"));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let hub = BroadcastHub::new(64);
    let mut first = hub.subscribe("a");
    let mut second = hub.subscribe("b");

    hub.publish("a", StreamEvent::chunk(RoleKind::Analyst, "for a"))
        .await
        .unwrap();

    assert_eq!(first.drain().0.len(), 1);
    assert!(second.drain().0.is_empty());
    assert_eq!(hub.session_count(), 2);
}

#[tokio::test]
async fn test_slow_subscriber_loses_oldest_events() {
    let hub = BroadcastHub::new(4);
    let mut subscription = hub.subscribe("s");

    for i in 0..10 {
        hub.publish("s", StreamEvent::chunk(RoleKind::Summarizer, i.to_string()))
            .await
            .unwrap();
    }

    assert_eq!(subscription.recv().await, Err(SubscriptionError::Lagged(6)));
    let mut rest = Vec::new();
    for _ in 0..4 {
        rest.push(chunk_text(&subscription.recv().await.unwrap().event));
    }
    assert_eq!(rest, vec!["6", "7", "8", "9"]);
}

#[tokio::test]
async fn test_drain_reports_dropped_count() {
    let hub = BroadcastHub::new(2);
    let mut subscription = hub.subscribe("s");

    for i in 0..5 {
        hub.publish("s", StreamEvent::chunk(RoleKind::Classifier, i.to_string()))
            .await
            .unwrap();
    }

    let (received, dropped) = subscription.drain();
    assert_eq!(dropped, 3);
    let texts: Vec<String> = received.iter().map(|e| chunk_text(&e.event)).collect();
    assert_eq!(texts, vec!["3", "4"]);
}

#[tokio::test]
async fn test_publish_without_subscribers_does_not_block() {
    let hub = BroadcastHub::new(1);
    let publishing = async {
        for i in 0..1000 {
            hub.publish("nobody", StreamEvent::chunk(RoleKind::Analyst, i.to_string()))
                .await
                .unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(5), publishing)
        .await
        .expect("publishing stalled without subscribers");
}

#[tokio::test]
async fn test_history_is_opt_in() {
    let plain = BroadcastHub::new(8);
    plain
        .publish("s", StreamEvent::answer_chunk("x"))
        .await
        .unwrap();
    assert!(plain.history("s").is_empty());

    let recording = BroadcastHub::new(8).with_history();
    recording
        .publish("s", StreamEvent::answer_chunk("x"))
        .await
        .unwrap();
    recording
        .publish("s", StreamEvent::answer_sentinel())
        .await
        .unwrap();
    let history = recording.history("s");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.topic == Topic::Answer));
    assert!(history[1].event.is_sentinel());
}

#[tokio::test]
async fn test_closed_session_drains_then_reports_closed() {
    let hub = BroadcastHub::new(8);
    let mut subscription = hub.subscribe("s");
    hub.publish("s", StreamEvent::chunk_sentinel(RoleKind::Analyst))
        .await
        .unwrap();

    hub.close_session("s");
    assert_eq!(hub.session_count(), 0);

    assert!(subscription.recv().await.unwrap().event.is_sentinel());
    assert_eq!(subscription.recv().await, Err(SubscriptionError::Closed));
}

#[tokio::test]
async fn test_ended_session_keeps_history_but_releases_channel() {
    let hub = BroadcastHub::new(8).with_history();
    hub.publish("s", StreamEvent::answer_chunk("x"))
        .await
        .unwrap();
    hub.publish("s", StreamEvent::answer_sentinel())
        .await
        .unwrap();

    hub.end_session("s").await;

    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.retained_history_count(), 1);
    assert_eq!(hub.history("s").len(), 2);

    // Ending an unknown or already-ended session is a no-op.
    hub.end_session("s").await;
    hub.end_session("never-seen").await;
    assert_eq!(hub.retained_history_count(), 1);
}

#[tokio::test]
async fn test_retained_histories_are_bounded() {
    let hub = BroadcastHub::new(8)
        .with_history()
        .with_retained_histories(2);

    for id in ["first", "second", "third"] {
        hub.publish(id, StreamEvent::answer_sentinel()).await.unwrap();
        hub.close_session(id);
    }

    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.retained_history_count(), 2);
    assert!(hub.history("first").is_empty());
    assert_eq!(hub.history("second").len(), 1);
    assert_eq!(hub.history("third").len(), 1);
}

#[tokio::test]
async fn test_closing_without_history_retains_nothing() {
    let hub = BroadcastHub::new(8);
    hub.publish("s", StreamEvent::answer_sentinel()).await.unwrap();
    hub.close_session("s");

    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.retained_history_count(), 0);
}

#[tokio::test]
async fn test_events_serialize_to_wire_names() {
    let update = serde_json::to_value(StreamEvent::update_with_duration(
        RoleKind::FactChecker,
        fanout_research::event::AgentStatus::Completed,
        "done",
        42,
    ))
    .unwrap();
    assert_eq!(update["type"], "agent-update");
    assert_eq!(update["role"], "factChecker");
    assert_eq!(update["status"], "completed");
    assert_eq!(update["durationMs"], 42);

    let sentinel = serde_json::to_value(StreamEvent::answer_sentinel()).unwrap();
    assert_eq!(sentinel["type"], "ai-chunk");
    assert_eq!(sentinel["chunk"], "");
    assert_eq!(sentinel["isComplete"], true);
}
