//! In-memory transport for exercising the receive path without a broker.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::transport::{
    EventSource, ReceivedEvent, StartPosition, Subscription, TransportError,
};

/// What a simulated partition does after its scripted events run out.
#[derive(Clone, Copy)]
enum Tail {
    /// Report a clean end of stream.
    End,
    /// Suspend forever, like a live partition with no traffic. Only the
    /// cancellation signal gets the listener out.
    Block,
}

struct PartitionScript {
    events: Vec<Vec<u8>>,
    tail: Tail,
    fail_subscribe: bool,
    hang_on_close: bool,
}

/// Scripted [`EventSource`]: each partition delivers a fixed list of payloads
/// in order, then either ends or blocks. Subscriptions count their own close
/// calls so tests can assert that no listener leaked.
#[derive(Default)]
pub struct SimulatedSource {
    partitions: Mutex<HashMap<i32, PartitionScript>>,
    metadata_error: bool,
    closed: Arc<AtomicUsize>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a partition that emits `events` in order, then ends.
    pub fn partition(self, id: i32, events: &[&str]) -> Self {
        self.add(id, events, Tail::End, false, false)
    }

    /// Add a partition that emits `events` in order, then blocks until
    /// cancelled.
    pub fn partition_blocking_tail(self, id: i32, events: &[&str]) -> Self {
        self.add(id, events, Tail::Block, false, false)
    }

    /// Add a partition whose subscribe call fails.
    pub fn failing_partition(self, id: i32) -> Self {
        self.add(id, &[], Tail::End, true, false)
    }

    /// Add a partition that blocks until cancelled and whose close call
    /// never returns, like a transport wedged in its teardown path.
    pub fn partition_with_hanging_close(self, id: i32, events: &[&str]) -> Self {
        self.add(id, events, Tail::Block, false, true)
    }

    /// Make `partition_ids` fail, as if the broker metadata fetch timed out.
    pub fn with_metadata_error(mut self) -> Self {
        self.metadata_error = true;
        self
    }

    /// How many subscriptions have been released so far.
    pub fn closed_subscriptions(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn add(
        self,
        id: i32,
        events: &[&str],
        tail: Tail,
        fail_subscribe: bool,
        hang_on_close: bool,
    ) -> Self {
        let script = PartitionScript {
            events: events.iter().map(|e| e.as_bytes().to_vec()).collect(),
            tail,
            fail_subscribe,
            hang_on_close,
        };
        self.partitions
            .lock()
            .expect("script lock poisoned")
            .insert(id, script);
        self
    }
}

#[async_trait]
impl EventSource for SimulatedSource {
    async fn partition_ids(&self) -> Result<Vec<i32>, TransportError> {
        if self.metadata_error {
            return Err(TransportError::Closed);
        }
        let mut ids: Vec<i32> = self
            .partitions
            .lock()
            .expect("script lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn subscribe(
        &self,
        partition: i32,
        _consumer_group: &str,
        _from: StartPosition,
    ) -> Result<Box<dyn Subscription>, TransportError> {
        let script = self
            .partitions
            .lock()
            .expect("script lock poisoned")
            .remove(&partition)
            .ok_or(TransportError::UnknownPartition(partition))?;

        if script.fail_subscribe {
            return Err(TransportError::UnknownPartition(partition));
        }

        Ok(Box::new(SimulatedSubscription {
            partition,
            events: script.events.into(),
            tail: script.tail,
            hang_on_close: script.hang_on_close,
            next_offset: 0,
            closed: false,
            close_count: Arc::clone(&self.closed),
        }))
    }
}

struct SimulatedSubscription {
    partition: i32,
    events: VecDeque<Vec<u8>>,
    tail: Tail,
    hang_on_close: bool,
    next_offset: i64,
    closed: bool,
    close_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Subscription for SimulatedSubscription {
    async fn next(&mut self) -> Option<Result<ReceivedEvent, TransportError>> {
        if self.closed {
            return None;
        }
        match self.events.pop_front() {
            Some(payload) => {
                let offset = self.next_offset;
                self.next_offset += 1;
                Some(Ok(ReceivedEvent {
                    partition: self.partition,
                    offset,
                    received_at: Utc::now(),
                    payload,
                }))
            }
            None => match self.tail {
                Tail::End => None,
                Tail::Block => std::future::pending().await,
            },
        }
    }

    async fn close(&mut self) {
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        if !self.closed {
            self.closed = true;
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}
