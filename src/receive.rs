use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::transport::{EventSource, ReceivedEvent, StartPosition, Subscription, TransportError};

/// Capacity of the shared output channel. Kept at the minimum so a slow
/// consumer stalls every producer listener symmetrically instead of letting
/// events pile up.
const OUTPUT_CAPACITY: usize = 1;

/// Merges the receive loops of N partitions into one channel.
///
/// Every listener writes into the same bounded channel and holds its own
/// clone of the sender. The channel therefore closes exactly once, and only
/// after the last listener has finished, regardless of how each of them
/// exits. The returned [`JoinSet`] tracks listener completion for shutdown.
pub struct FanInReceiver {
    source: Arc<dyn EventSource>,
    consumer_group: String,
    shutdown: watch::Receiver<bool>,
}

impl FanInReceiver {
    pub fn new(
        source: Arc<dyn EventSource>,
        consumer_group: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            source,
            consumer_group: consumer_group.to_string(),
            shutdown,
        }
    }

    /// Start one listener per partition, all feeding the returned channel.
    ///
    /// A listener that fails to open its subscription logs the error and
    /// contributes nothing; the rest keep going.
    pub fn receive_all(&self, partitions: &[i32]) -> (mpsc::Receiver<ReceivedEvent>, JoinSet<()>) {
        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let mut listeners = JoinSet::new();

        for &partition in partitions {
            let listener = PartitionListener {
                partition,
                output: tx.clone(),
                shutdown: self.shutdown.clone(),
            };
            let source = Arc::clone(&self.source);
            let group = self.consumer_group.clone();
            listeners.spawn(listener.open_and_run(source, group));
        }

        // Only the listeners hold senders now, so the channel closes when
        // the last of them exits.
        drop(tx);
        (rx, listeners)
    }

    /// Start a single listener for one partition.
    ///
    /// Unlike [`Self::receive_all`], the subscription is opened here so the
    /// caller sees the failure before any event could be read.
    pub async fn receive_partition(
        &self,
        partition: i32,
    ) -> Result<(mpsc::Receiver<ReceivedEvent>, JoinSet<()>), TransportError> {
        let subscription = self
            .source
            .subscribe(partition, &self.consumer_group, StartPosition::Latest)
            .await?;

        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let listener = PartitionListener {
            partition,
            output: tx,
            shutdown: self.shutdown.clone(),
        };

        let mut listeners = JoinSet::new();
        listeners.spawn(listener.run(subscription));
        Ok((rx, listeners))
    }
}

/// The receive loop of one partition.
///
/// Runs until the shared cancellation signal fires, the subscription ends or
/// fails, or the consumer goes away. The subscription is always released
/// before the task finishes, and the listener's sender clone is dropped with
/// it, which is what the fan-in channel counts as completion.
struct PartitionListener {
    partition: i32,
    output: mpsc::Sender<ReceivedEvent>,
    shutdown: watch::Receiver<bool>,
}

impl PartitionListener {
    async fn open_and_run(self, source: Arc<dyn EventSource>, consumer_group: String) {
        let subscription = match source
            .subscribe(self.partition, &consumer_group, StartPosition::Latest)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(partition = self.partition, error = %e, "failed to open subscription");
                return;
            }
        };

        self.run(subscription).await
    }

    async fn run(mut self, mut subscription: Box<dyn Subscription>) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => break,
                next = subscription.next() => match next {
                    Some(Ok(event)) => {
                        // The send blocks while the consumer is busy, so stay
                        // responsive to cancellation here too.
                        tokio::select! {
                            _ = self.shutdown.changed() => break,
                            sent = self.output.send(event) => {
                                if sent.is_err() {
                                    debug!(partition = self.partition, "consumer gone, stopping");
                                    break;
                                }
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(partition = self.partition, error = %e, "subscription dropped");
                        break;
                    }
                    None => {
                        debug!(partition = self.partition, "subscription ended");
                        break;
                    }
                }
            }
        }

        subscription.close().await;
        debug!(partition = self.partition, "listener finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::SimulatedSource;

    async fn drain(mut rx: mpsc::Receiver<ReceivedEvent>) -> Vec<ReceivedEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn channel_closes_only_after_every_listener_finished() {
        let source = Arc::new(
            SimulatedSource::new()
                .partition(0, &["a", "b"])
                .partition(1, &["c"]),
        );
        let (_tx, shutdown) = watch::channel(false);
        let fanin = FanInReceiver::new(source.clone(), "test", shutdown);

        let (rx, mut listeners) = fanin.receive_all(&[0, 1]);
        let events = drain(rx).await;

        assert_eq!(events.len(), 3);
        // End-of-channel implies both listeners already released their
        // subscriptions.
        assert_eq!(source.closed_subscriptions(), 2);
        while listeners.join_next().await.is_some() {}
    }

    #[tokio::test]
    async fn failed_subscribe_does_not_wedge_the_channel() {
        let source = Arc::new(
            SimulatedSource::new()
                .partition(0, &["only"])
                .failing_partition(1),
        );
        let (_tx, shutdown) = watch::channel(false);
        let fanin = FanInReceiver::new(source.clone(), "test", shutdown);

        let (rx, _listeners) = fanin.receive_all(&[0, 1]);
        let events = drain(rx).await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].partition, 0);
        // The failed listener never opened a subscription.
        assert_eq!(source.closed_subscriptions(), 1);
    }

    #[tokio::test]
    async fn receive_partition_surfaces_open_errors() {
        let source = Arc::new(SimulatedSource::new().failing_partition(4));
        let (_tx, shutdown) = watch::channel(false);
        let fanin = FanInReceiver::new(source, "test", shutdown);

        assert!(fanin.receive_partition(4).await.is_err());
    }
}
