//! Debounce utility for coalescing bursts of file notifications.
//!
//! Editors and shell redirections often produce several notifications for a
//! single logical write (truncate, write, close, metadata). The debouncer
//! holds a notification for a key until `interval` has passed without a new
//! one for that key, then emits the latest value once. This also gives
//! partially written files time to settle before they are read.
//!
//! Keys are independent: a burst on one key never delays another. For a
//! single key, emitted values keep arrival order since each key holds at most
//! one pending value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Capacity of the debouncer's input queue.
const INPUT_CAPACITY: usize = 1000;

/// Error type for debouncer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebouncerError {
    /// The debouncer's background task has stopped.
    #[error("debouncer channel closed")]
    ChannelClosed,
}

/// A value waiting for its quiet period to end.
#[derive(Debug)]
struct PendingEvent<V> {
    value: V,
    deadline: Instant,
}

/// Coalesces rapid events by key.
#[derive(Debug)]
pub struct Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    input_tx: mpsc::Sender<(K, V)>,
    task_handle: JoinHandle<()>,
}

impl<K, V> Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + Debug + 'static,
    V: Send + 'static,
{
    /// Creates a debouncer emitting into `output_tx` and starts its task.
    #[must_use]
    pub fn new(interval: Duration, output_tx: mpsc::Sender<(K, V)>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);

        let task_handle = tokio::spawn(async move {
            run_debounce_loop(interval, input_rx, output_tx).await;
        });

        Self {
            input_tx,
            task_handle,
        }
    }

    /// Queues an event, replacing any pending value for the same key and
    /// restarting its timer.
    ///
    /// # Errors
    ///
    /// Returns [`DebouncerError::ChannelClosed`] if the background task has
    /// terminated.
    pub async fn send(&self, key: K, value: V) -> Result<(), DebouncerError> {
        self.input_tx
            .send((key, value))
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }
}

impl<K, V> Drop for Debouncer<K, V>
where
    K: Clone + Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn drop(&mut self) {
        self.task_handle.abort();
    }
}

async fn run_debounce_loop<K, V>(
    interval: Duration,
    mut input_rx: mpsc::Receiver<(K, V)>,
    output_tx: mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + Debug,
{
    let mut pending: HashMap<K, PendingEvent<V>> = HashMap::new();

    debug!(interval_ms = interval.as_millis(), "Starting debounce loop");

    loop {
        let next_deadline = pending.values().map(|p| p.deadline).min();

        tokio::select! {
            event = input_rx.recv() => {
                match event {
                    Some((key, value)) => {
                        trace!(key = ?key, "Received event, setting deadline");
                        let deadline = Instant::now() + interval;
                        pending.insert(key, PendingEvent { value, deadline });
                    }
                    None => {
                        debug!("Input channel closed, flushing remaining events");
                        for (key, event) in pending.drain() {
                            if output_tx.send((key, event.value)).await.is_err() {
                                break;
                            }
                        }
                        break;
                    }
                }
            }

            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                emit_expired_events(&mut pending, &output_tx).await;
            }
        }
    }

    debug!("Debounce loop terminated");
}

async fn emit_expired_events<K, V>(
    pending: &mut HashMap<K, PendingEvent<V>>,
    output_tx: &mpsc::Sender<(K, V)>,
) where
    K: Clone + Eq + Hash + Debug,
{
    let now = Instant::now();
    let expired: Vec<K> = pending
        .iter()
        .filter(|(_, event)| event.deadline <= now)
        .map(|(key, _)| key.clone())
        .collect();

    for key in expired {
        if let Some(event) = pending.remove(&key) {
            trace!(key = ?key, "Emitting debounced event");
            if let Err(e) = output_tx.send((key.clone(), event.value)).await {
                warn!(key = ?key, error = %e, "Failed to emit debounced event");
            }
        }
    }
}
