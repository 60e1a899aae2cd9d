//! Fan-out of attempt progress events to dashboard observers.
//!
//! Publishing only enqueues onto an unbounded channel. A dispatcher task owns
//! delivery: it stamps sequence numbers and forwards each event to the
//! broadcast channel of its test. Slow observers lag and lose old events; they
//! never hold up the lifecycle operation that produced them.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::metrics::{PROGRESS_EVENTS_TOTAL, PROGRESS_OBSERVERS_LAGGED_TOTAL};
use crate::models::ProgressEvent;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

pub struct ProgressPublisher {
    queue: mpsc::UnboundedSender<ProgressEvent>,
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
    capacity: usize,
}

impl ProgressPublisher {
    /// Spawns the dispatcher on the current tokio runtime.
    pub fn start(capacity: usize) -> Arc<Self> {
        let (queue, rx) = mpsc::unbounded_channel();
        let channels = Arc::new(DashMap::new());
        tokio::spawn(dispatch(rx, channels.clone()));

        Arc::new(Self {
            queue,
            channels,
            capacity: capacity.max(1),
        })
    }

    pub fn subscribe(&self, test_id: &str) -> ProgressSubscription {
        let receiver = self
            .channels
            .entry(test_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        tracing::debug!("Observer subscribed to test={}", test_id);

        ProgressSubscription {
            test_id: test_id.to_string(),
            receiver,
        }
    }

    /// Never blocks and never fails; with no observers the event is dropped.
    pub fn publish(&self, event: ProgressEvent) {
        if self.queue.send(event).is_err() {
            tracing::warn!("Progress dispatcher is gone, event dropped");
        }
    }

    pub fn observer_count(&self, test_id: &str) -> usize {
        self.channels
            .get(test_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
    channels: Arc<DashMap<String, broadcast::Sender<ProgressEvent>>>,
) {
    let mut sequence: u64 = 0;

    while let Some(mut event) = rx.recv().await {
        sequence += 1;
        event.sequence = sequence;
        PROGRESS_EVENTS_TOTAL
            .with_label_values(&[event.event_name()])
            .inc();

        let test_id = event.test_id.clone();
        // The map guard is released before any removal below.
        let delivered = channels.get(&test_id).map(|tx| tx.send(event).is_ok());

        if delivered == Some(false) {
            channels.remove_if(&test_id, |_, tx| tx.receiver_count() == 0);
        }
    }

    tracing::debug!("Progress dispatcher stopped");
}

/// Live feed of one test's events. Dropping it unsubscribes.
pub struct ProgressSubscription {
    test_id: String,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// Next event, skipping over any the observer was too slow to receive.
    /// `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    PROGRESS_OBSERVERS_LAGGED_TOTAL.inc();
                    tracing::warn!(
                        "Observer of test={} lagged, skipped {} events",
                        self.test_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
