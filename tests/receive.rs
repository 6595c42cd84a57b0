//! Receive-path scenarios against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use eventtail::error::SetupError;
use eventtail::session::ReceiveSession;
use eventtail::test_utils::SimulatedSource;
use eventtail::transport::ReceivedEvent;

const GRACE: Duration = Duration::from_secs(5);
const PROMPTLY: Duration = Duration::from_secs(1);

async fn drain(session: &mut ReceiveSession) -> Vec<ReceivedEvent> {
    let mut events = Vec::new();
    while let Some(event) = session.recv().await {
        events.push(event);
    }
    events
}

fn payloads_for(partition: i32, events: &[ReceivedEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.partition == partition)
        .map(|e| String::from_utf8_lossy(&e.payload).into_owned())
        .collect()
}

#[tokio::test]
async fn merged_sequence_yields_every_event_then_closes() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition(0, &["a1", "a2"])
            .partition(1, &["b1", "b2"])
            .partition(2, &["c1", "c2"]),
    );

    let mut session = ReceiveSession::all_partitions(source.clone(), "test", GRACE)
        .await
        .unwrap();
    assert_eq!(session.listener_count(), 3);

    let events = timeout(PROMPTLY, drain(&mut session)).await.unwrap();

    assert_eq!(events.len(), 6);
    // The sequence only closed because every listener finished and released
    // its subscription.
    assert_eq!(source.closed_subscriptions(), 3);
}

#[tokio::test]
async fn events_of_one_partition_stay_in_emission_order() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition(0, &["e1", "e2", "e3"])
            .partition(1, &["x1", "x2", "x3"]),
    );

    let mut session = ReceiveSession::all_partitions(source, "test", GRACE)
        .await
        .unwrap();
    let events = timeout(PROMPTLY, drain(&mut session)).await.unwrap();

    assert_eq!(payloads_for(0, &events), vec!["e1", "e2", "e3"]);
    assert_eq!(payloads_for(1, &events), vec!["x1", "x2", "x3"]);

    let offsets: Vec<i64> = events
        .iter()
        .filter(|e| e.partition == 0)
        .map(|e| e.offset)
        .collect();
    assert_eq!(offsets, vec![0, 1, 2]);
}

#[tokio::test]
async fn cancellation_releases_listeners_blocked_on_idle_partitions() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition_blocking_tail(0, &[])
            .partition_blocking_tail(1, &[]),
    );

    let mut session = ReceiveSession::all_partitions(source.clone(), "test", GRACE)
        .await
        .unwrap();

    session.cancel();

    let events = timeout(PROMPTLY, drain(&mut session)).await.unwrap();
    assert!(events.is_empty());
    assert_eq!(source.closed_subscriptions(), 2);
}

#[tokio::test]
async fn cancellation_mid_stream_closes_the_sequence_without_errors() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition_blocking_tail(0, &["a1", "a2"])
            .partition_blocking_tail(1, &["b1", "b2"])
            .partition_blocking_tail(2, &["c1", "c2"]),
    );

    let mut session = ReceiveSession::all_partitions(source.clone(), "test", GRACE)
        .await
        .unwrap();

    let mut seen = 0;
    while seen < 2 {
        session.recv().await.unwrap();
        seen += 1;
    }
    session.cancel();

    // The remaining scripted events are allowed to be dropped; the sequence
    // just has to close promptly and cleanly.
    let rest = timeout(PROMPTLY, drain(&mut session)).await.unwrap();
    assert!(seen + rest.len() <= 6);
    assert_eq!(source.closed_subscriptions(), 3);
}

#[tokio::test]
async fn single_partition_session_receives_in_order_and_closes() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition(0, &["skip-me"])
            .partition(1, &["e1", "e2", "e3"]),
    );

    let mut session = ReceiveSession::single_partition(source.clone(), 1, "test", GRACE)
        .await
        .unwrap();
    let events = timeout(PROMPTLY, drain(&mut session)).await.unwrap();

    assert_eq!(payloads_for(1, &events), vec!["e1", "e2", "e3"]);
    assert!(events.iter().all(|e| e.partition == 1));
    assert_eq!(source.closed_subscriptions(), 1);
}

#[tokio::test]
async fn invalid_partition_id_fails_before_any_event_is_read() {
    let source = Arc::new(SimulatedSource::new().partition(0, &["never-read"]));

    let result = ReceiveSession::single_partition(source.clone(), 9, "test", GRACE).await;

    assert!(matches!(
        result,
        Err(SetupError::UnknownPartition { requested: 9, .. })
    ));
    assert_eq!(source.closed_subscriptions(), 0);
}

#[tokio::test]
async fn shutdown_converges_within_the_grace_period() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition_blocking_tail(0, &[])
            .partition_blocking_tail(1, &[])
            .partition_blocking_tail(2, &[]),
    );

    let session = ReceiveSession::all_partitions(source.clone(), "test", GRACE)
        .await
        .unwrap();

    timeout(Duration::from_secs(2), session.shutdown())
        .await
        .expect("shutdown should beat the grace period");
    assert_eq!(source.closed_subscriptions(), 3);
}

#[tokio::test]
async fn shutdown_gives_up_on_listeners_that_never_finish_closing() {
    let source = Arc::new(
        SimulatedSource::new()
            .partition_blocking_tail(0, &[])
            .partition_with_hanging_close(1, &[]),
    );

    let session = ReceiveSession::all_partitions(source.clone(), "test", Duration::from_millis(100))
        .await
        .unwrap();

    // The wedged subscription never acknowledges, so shutdown has to return
    // once the grace period expires instead of hanging the caller.
    timeout(Duration::from_secs(2), session.shutdown())
        .await
        .expect("shutdown should abandon the stuck listener after the grace period");
    assert_eq!(source.closed_subscriptions(), 1);
}

#[tokio::test]
async fn slow_consumer_stalls_listeners_without_losing_order() {
    let source = Arc::new(SimulatedSource::new().partition(0, &["e1", "e2", "e3", "e4"]));

    let mut session = ReceiveSession::all_partitions(source, "test", GRACE)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = session.recv().await {
        // Simulated slow consumer: the bounded channel makes the listener
        // wait between events instead of dropping anything.
        tokio::time::sleep(Duration::from_millis(10)).await;
        events.push(event);
    }

    assert_eq!(payloads_for(0, &events), vec!["e1", "e2", "e3", "e4"]);
}
