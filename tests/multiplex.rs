// Stream multiplexer tests: subscription wiring, event classification,
// error unwinding and shutdown ordering, all against the in-memory upstream.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::Span;

use common::{collect, status, update, Ending, FakeUpstream};
use tagrelay::pipeline::multiplex::Multiplexer;
use tagrelay::pipeline::traits::{StreamError, StreamEvent, Upstream};

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|t| t.to_string()).collect()
}

// ============================================================
// Setup
// ============================================================

#[tokio::test]
async fn empty_tag_list_is_rejected() {
    let upstream: Arc<dyn Upstream> = Arc::new(FakeUpstream::new());
    let (tx, _rx) = mpsc::channel(4);
    let result = Multiplexer::new(Vec::new(), Span::none())
        .start(upstream, tx)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn single_tag_open_failure_is_returned() {
    let upstream: Arc<dyn Upstream> = Arc::new(FakeUpstream::new().failing("golang"));
    let (tx, _rx) = mpsc::channel(4);
    let err = Multiplexer::new(tags(&["golang"]), Span::none())
        .start(upstream, tx)
        .await
        .err()
        .expect("subscribe failure should fail start");
    assert!(format!("{err:#}").contains("#golang"));
}

#[tokio::test]
async fn later_open_failure_stops_earlier_subscriptions() {
    let fake = Arc::new(
        FakeUpstream::new()
            .with_stream("a", Vec::new(), Ending::OnStop)
            .failing("b"),
    );
    let upstream: Arc<dyn Upstream> = fake.clone();
    let (tx, _rx) = mpsc::channel(4);

    let result = Multiplexer::new(tags(&["a", "b", "c"]), Span::none())
        .start(upstream, tx)
        .await;

    assert!(result.is_err());
    // The first error wins: "c" is never attempted
    assert_eq!(fake.subscribed(), vec!["a", "b"]);
    assert!(fake.wait_stopped("a").await, "subscription a should see stop");
}

#[tokio::test]
async fn first_open_failure_attempts_nothing_else() {
    let fake = Arc::new(FakeUpstream::new().failing("a"));
    let upstream: Arc<dyn Upstream> = fake.clone();
    let (tx, _rx) = mpsc::channel(4);

    let result = Multiplexer::new(tags(&["a", "b"]), Span::none())
        .start(upstream, tx)
        .await;

    assert!(result.is_err());
    assert_eq!(fake.subscribed(), vec!["a"]);
}

// ============================================================
// Event classification
// ============================================================

#[tokio::test]
async fn only_updates_are_forwarded() {
    let events = vec![
        update(status("1", &["golang"])),
        StreamEvent::Notification,
        StreamEvent::Delete("99".to_string()),
        StreamEvent::Error(Some(StreamError::UnexpectedEof)),
        StreamEvent::Error(None),
        StreamEvent::Unknown("status.update".to_string()),
        update(status("2", &["golang"])),
        StreamEvent::Closed,
    ];
    let upstream: Arc<dyn Upstream> =
        Arc::new(FakeUpstream::new().with_stream("golang", events, Ending::AfterScript));
    let (tx, rx) = mpsc::channel(4);

    let handle = Multiplexer::new(tags(&["golang"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    let received = collect(rx).await;
    let ids: Vec<&str> = received.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);

    let stats = handle.join().await.unwrap();
    assert_eq!(stats.forwarded, 2);
    assert_eq!(stats.discarded, 3);
    assert_eq!(stats.errors, 2);
}

#[tokio::test]
async fn single_tag_order_is_preserved() {
    let events = (0..20).map(|i| update(status(&i.to_string(), &["a"]))).collect();
    let upstream: Arc<dyn Upstream> =
        Arc::new(FakeUpstream::new().with_stream("a", events, Ending::AfterScript));
    let (tx, rx) = mpsc::channel(2);

    Multiplexer::new(tags(&["a"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    let ids: Vec<String> = collect(rx).await.into_iter().map(|s| s.id).collect();
    let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn transport_errors_do_not_end_the_stream() {
    let events = vec![
        StreamEvent::Error(Some(StreamError::UnexpectedEof)),
        StreamEvent::Error(Some(StreamError::Transport("reset".to_string()))),
        update(status("1", &["a"])),
    ];
    let upstream: Arc<dyn Upstream> =
        Arc::new(FakeUpstream::new().with_stream("a", events, Ending::AfterScript));
    let (tx, rx) = mpsc::channel(4);

    Multiplexer::new(tags(&["a"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    assert_eq!(collect(rx).await.len(), 1);
}

// ============================================================
// Merging and termination
// ============================================================

#[tokio::test]
async fn merges_all_tags_and_closes_once_all_finish() {
    let upstream: Arc<dyn Upstream> = Arc::new(
        FakeUpstream::new()
            .with_stream("a", vec![update(status("1", &["a"])), update(status("2", &["a"]))], Ending::AfterScript)
            .with_stream("b", vec![update(status("3", &["b"]))], Ending::AfterScript)
            .with_stream("c", Vec::new(), Ending::AfterScript),
    );
    let (tx, rx) = mpsc::channel(4);

    let handle = Multiplexer::new(tags(&["a", "b", "c"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    let ids: HashSet<String> = collect(rx).await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, HashSet::from(["1".into(), "2".into(), "3".into()]));
    assert_eq!(handle.join().await.unwrap().forwarded, 3);
}

#[tokio::test]
async fn per_tag_order_survives_merging() {
    let a_events = (0..10).map(|i| update(status(&format!("a{i}"), &["a"]))).collect();
    let b_events = (0..10).map(|i| update(status(&format!("b{i}"), &["b"]))).collect();
    let upstream: Arc<dyn Upstream> = Arc::new(
        FakeUpstream::new()
            .with_stream("a", a_events, Ending::AfterScript)
            .with_stream("b", b_events, Ending::AfterScript),
    );
    let (tx, rx) = mpsc::channel(1);

    Multiplexer::new(tags(&["a", "b"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    let received = collect(rx).await;
    assert_eq!(received.len(), 20);
    for prefix in ["a", "b"] {
        let ids: Vec<&str> = received
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| id.starts_with(prefix))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("{prefix}{i}")).collect();
        assert_eq!(ids, expected);
    }
}

#[tokio::test]
async fn shutdown_stops_every_subscription_then_closes_output() {
    let fake = Arc::new(
        FakeUpstream::new()
            .with_stream("a", vec![update(status("1", &["a"]))], Ending::OnStop)
            .with_stream("b", vec![update(status("2", &["b"]))], Ending::OnStop),
    );
    let upstream: Arc<dyn Upstream> = fake.clone();
    let (tx, mut rx) = mpsc::channel(4);

    let handle = Multiplexer::new(tags(&["a", "b"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    assert!(rx.recv().await.is_some());
    assert!(rx.recv().await.is_some());

    handle.shutdown();
    assert!(collect(rx).await.is_empty());
    assert!(fake.wait_stopped("a").await);
    assert!(fake.wait_stopped("b").await);
    assert_eq!(handle.join().await.unwrap().forwarded, 2);
}

#[tokio::test]
async fn dropped_output_stops_subscriptions() {
    let fake = Arc::new(FakeUpstream::new().with_stream(
        "a",
        vec![update(status("1", &["a"])), update(status("2", &["a"]))],
        Ending::OnStop,
    ));
    let upstream: Arc<dyn Upstream> = fake.clone();
    let (tx, rx) = mpsc::channel(4);
    drop(rx);

    let handle = Multiplexer::new(tags(&["a"]), Span::none())
        .start(upstream, tx)
        .await
        .unwrap();

    let stats = handle.join().await.unwrap();
    assert_eq!(stats.forwarded, 0);
    assert!(fake.wait_stopped("a").await);
}
