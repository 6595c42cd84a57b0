use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::SetupError;
use crate::receive::FanInReceiver;
use crate::transport::{EventSource, ReceivedEvent};

/// A live receive run: the merged event sequence plus the handle that tears
/// it down.
///
/// Created per CLI invocation. The session owns the shared cancellation
/// signal; [`ReceiveSession::cancel`] flips it once and every listener
/// observes it at its next suspension point. The merged sequence ends (`recv`
/// returns `None`) only after every listener has finished and released its
/// subscription.
pub struct ReceiveSession {
    events: mpsc::Receiver<ReceivedEvent>,
    listeners: JoinSet<()>,
    shutdown: watch::Sender<bool>,
    grace: Duration,
}

impl ReceiveSession {
    /// Listen on every partition of the topic.
    pub async fn all_partitions(
        source: Arc<dyn EventSource>,
        consumer_group: &str,
        grace: Duration,
    ) -> Result<Self, SetupError> {
        let partitions = source.partition_ids().await?;
        if partitions.is_empty() {
            return Err(SetupError::NoPartitions);
        }
        info!(?partitions, consumer_group, "opening partition listeners");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let fanin = FanInReceiver::new(source, consumer_group, shutdown_rx);
        let (events, listeners) = fanin.receive_all(&partitions);

        Ok(Self {
            events,
            listeners,
            shutdown,
            grace,
        })
    }

    /// Listen on one partition only. The partition id is validated against
    /// the topic metadata and the subscription is opened before this returns,
    /// so a bad id fails here instead of inside a background task.
    pub async fn single_partition(
        source: Arc<dyn EventSource>,
        partition: i32,
        consumer_group: &str,
        grace: Duration,
    ) -> Result<Self, SetupError> {
        let known = source.partition_ids().await?;
        if !known.contains(&partition) {
            return Err(SetupError::UnknownPartition {
                requested: partition,
                known,
            });
        }
        info!(partition, consumer_group, "opening partition listener");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let fanin = FanInReceiver::new(source, consumer_group, shutdown_rx);
        let (events, listeners) = fanin.receive_partition(partition).await?;

        Ok(Self {
            events,
            listeners,
            shutdown,
            grace,
        })
    }

    /// Next event in arrival order. `None` once all listeners have finished.
    pub async fn recv(&mut self) -> Option<ReceivedEvent> {
        self.events.recv().await
    }

    /// Fire the shared cancellation signal without consuming the session.
    /// Callers that want to keep draining until end-of-sequence use this.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Number of partition listeners still running.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Cancel and wait for every listener to acknowledge, up to the grace
    /// period. Listeners that do not converge in time are abandoned with a
    /// warning rather than hanging the process.
    pub async fn shutdown(self) {
        let Self {
            events,
            mut listeners,
            shutdown,
            grace,
        } = self;

        let _ = shutdown.send(true);
        // Unblocks any listener waiting on a slow consumer.
        drop(events);

        let all_done = async {
            while listeners.join_next().await.is_some() {}
        };
        if timeout(grace, all_done).await.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "listeners did not stop within the grace period, abandoning them"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SimulatedSource;
    use crate::transport::TransportError;

    const GRACE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn unknown_partition_is_a_setup_error() {
        let source = Arc::new(SimulatedSource::new().partition(0, &[]).partition(1, &[]));

        let err = ReceiveSession::single_partition(source, 7, "test", GRACE)
            .await
            .err()
            .unwrap();

        match err {
            SetupError::UnknownPartition { requested, known } => {
                assert_eq!(requested, 7);
                assert_eq!(known, vec![0, 1]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn metadata_failure_is_a_setup_error() {
        let source = Arc::new(SimulatedSource::new().with_metadata_error());

        let err = ReceiveSession::all_partitions(source, "test", GRACE)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            SetupError::Transport(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn empty_topic_is_a_setup_error() {
        let source = Arc::new(SimulatedSource::new());

        let err = ReceiveSession::all_partitions(source, "test", GRACE)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SetupError::NoPartitions));
    }
}
