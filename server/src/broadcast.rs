//! Viewer fan-out for the TaskSync server.
//!
//! This module tracks the live viewer set and delivers [`ServerMessage`]s to
//! it. Every viewer owns a bounded outbound queue drained by its own socket
//! writer task, so a broadcast only enqueues and never waits on a socket.
//!
//! # Delivery Policy
//!
//! Best effort, no retries. A viewer whose queue is closed (socket gone) or
//! full (socket stalled) is removed from the set on the spot, and delivery
//! continues with the remaining viewers. Failures never propagate to the
//! caller.
//!
//! # Example
//!
//! ```rust
//! use tasksync_server::broadcast::ViewerHub;
//! use tasksync_server::types::ServerMessage;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = ViewerHub::new();
//! let (id, tx, mut rx) = ViewerHub::open_channel();
//! hub.register(id, tx).await;
//!
//! assert_eq!(hub.broadcast(ServerMessage::Pong).await, 1);
//! assert_eq!(rx.recv().await, Some(ServerMessage::Pong));
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::types::ServerMessage;

/// Outbound queue capacity per viewer.
///
/// A viewer that falls this far behind is considered stalled and dropped.
pub const VIEWER_QUEUE_CAPACITY: usize = 256;

/// Opaque identity of one viewer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(Uuid);

impl ViewerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The live viewer set.
///
/// Cheap to clone; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ViewerHub {
    viewers: Arc<RwLock<HashMap<ViewerId, mpsc::Sender<ServerMessage>>>>,
}

impl ViewerHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a fresh viewer id with its outbound queue.
    #[must_use]
    pub fn open_channel() -> (
        ViewerId,
        mpsc::Sender<ServerMessage>,
        mpsc::Receiver<ServerMessage>,
    ) {
        let (tx, rx) = mpsc::channel(VIEWER_QUEUE_CAPACITY);
        (ViewerId::new(), tx, rx)
    }

    /// Adds a viewer to the broadcast set.
    pub async fn register(&self, id: ViewerId, sender: mpsc::Sender<ServerMessage>) {
        let mut viewers = self.viewers.write().await;
        viewers.insert(id, sender);
        debug!(viewer = %id, viewer_count = viewers.len(), "Viewer registered");
    }

    /// Removes a viewer. Returns `false` if it was already gone.
    pub async fn remove(&self, id: ViewerId) -> bool {
        let mut viewers = self.viewers.write().await;
        let removed = viewers.remove(&id).is_some();
        if removed {
            debug!(viewer = %id, viewer_count = viewers.len(), "Viewer removed");
        }
        removed
    }

    /// Delivers `message` to every viewer. Returns how many accepted it.
    pub async fn broadcast(&self, message: ServerMessage) -> usize {
        self.deliver(message, None).await
    }

    /// Delivers `message` to every viewer except `excluded`.
    pub async fn broadcast_except(&self, excluded: ViewerId, message: ServerMessage) -> usize {
        self.deliver(message, Some(excluded)).await
    }

    /// Delivers `message` to a single viewer.
    ///
    /// Returns `false` (and drops the viewer) if it could not accept it.
    pub async fn send_to(&self, id: ViewerId, message: ServerMessage) -> bool {
        let mut viewers = self.viewers.write().await;
        let Some(sender) = viewers.get(&id) else {
            trace!(viewer = %id, kind = message.kind(), "Viewer gone, message dropped");
            return false;
        };
        match sender.try_send(message) {
            Ok(()) => true,
            Err(err) => {
                log_send_failure(id, &err);
                viewers.remove(&id);
                false
            }
        }
    }

    /// Current number of connected viewers.
    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    async fn deliver(&self, message: ServerMessage, excluded: Option<ViewerId>) -> usize {
        let mut viewers = self.viewers.write().await;
        if viewers.is_empty() {
            trace!(kind = message.kind(), "No viewers to receive message");
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sender) in viewers.iter() {
            if Some(*id) == excluded {
                continue;
            }
            match sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log_send_failure(*id, &err);
                    failed.push(*id);
                }
            }
        }

        for id in &failed {
            viewers.remove(id);
        }

        trace!(
            kind = message.kind(),
            delivered,
            dropped = failed.len(),
            "Broadcast complete"
        );
        delivered
    }
}

fn log_send_failure(id: ViewerId, err: &TrySendError<ServerMessage>) {
    match err {
        TrySendError::Full(msg) => {
            warn!(viewer = %id, kind = msg.kind(), "Viewer queue full, dropping viewer");
        }
        TrySendError::Closed(msg) => {
            debug!(viewer = %id, kind = msg.kind(), "Viewer disconnected, dropping viewer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(hub: &ViewerHub) -> (ViewerId, mpsc::Receiver<ServerMessage>) {
        let (id, tx, rx) = ViewerHub::open_channel();
        hub.register(id, tx).await;
        (id, rx)
    }

    #[tokio::test]
    async fn broadcast_with_no_viewers_returns_zero() {
        let hub = ViewerHub::new();
        assert_eq!(hub.broadcast(ServerMessage::Pong).await, 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_viewer() {
        let hub = ViewerHub::new();
        let (_, mut rx1) = connect(&hub).await;
        let (_, mut rx2) = connect(&hub).await;

        assert_eq!(hub.broadcast(ServerMessage::error("x")).await, 2);
        assert_eq!(rx1.recv().await, Some(ServerMessage::error("x")));
        assert_eq!(rx2.recv().await, Some(ServerMessage::error("x")));
    }

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let hub = ViewerHub::new();
        let (_, mut rx) = connect(&hub).await;

        hub.broadcast(ServerMessage::error("1")).await;
        hub.broadcast(ServerMessage::error("2")).await;

        assert_eq!(rx.recv().await, Some(ServerMessage::error("1")));
        assert_eq!(rx.recv().await, Some(ServerMessage::error("2")));
    }

    #[tokio::test]
    async fn closed_viewer_is_dropped_without_affecting_others() {
        let hub = ViewerHub::new();
        let (_, rx_gone) = connect(&hub).await;
        let (_, mut rx_live) = connect(&hub).await;
        drop(rx_gone);

        assert_eq!(hub.broadcast(ServerMessage::Pong).await, 1);
        assert_eq!(hub.viewer_count().await, 1);
        assert_eq!(rx_live.recv().await, Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn stalled_viewer_is_dropped() {
        let hub = ViewerHub::new();
        let (_, _rx_stalled) = connect(&hub).await;
        let (_, mut rx_live) = connect(&hub).await;

        for _ in 0..VIEWER_QUEUE_CAPACITY {
            hub.broadcast(ServerMessage::Pong).await;
            rx_live.recv().await;
        }
        assert_eq!(hub.viewer_count().await, 2);

        assert_eq!(hub.broadcast(ServerMessage::Pong).await, 1);
        assert_eq!(hub.viewer_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_except_skips_one_viewer() {
        let hub = ViewerHub::new();
        let (submitter, mut rx_submitter) = connect(&hub).await;
        let (_, mut rx_other) = connect(&hub).await;

        assert_eq!(hub.broadcast_except(submitter, ServerMessage::Pong).await, 1);
        assert_eq!(rx_other.recv().await, Some(ServerMessage::Pong));
        assert!(rx_submitter.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_targets_single_viewer() {
        let hub = ViewerHub::new();
        let (target, mut rx_target) = connect(&hub).await;
        let (_, mut rx_other) = connect(&hub).await;

        assert!(hub.send_to(target, ServerMessage::Pong).await);
        assert_eq!(rx_target.recv().await, Some(ServerMessage::Pong));
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_unknown_viewer_returns_false() {
        let hub = ViewerHub::new();
        assert!(!hub.send_to(ViewerId::new(), ServerMessage::Pong).await);
    }

    #[tokio::test]
    async fn send_to_closed_viewer_removes_it() {
        let hub = ViewerHub::new();
        let (id, rx) = connect(&hub).await;
        drop(rx);

        assert!(!hub.send_to(id, ServerMessage::Pong).await);
        assert_eq!(hub.viewer_count().await, 0);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let hub = ViewerHub::new();
        let (id, _rx) = connect(&hub).await;
        assert!(hub.remove(id).await);
        assert!(!hub.remove(id).await);
    }

    #[tokio::test]
    async fn clones_share_viewers() {
        let hub = ViewerHub::new();
        let clone = hub.clone();
        let (_, _rx) = connect(&hub).await;
        assert_eq!(clone.viewer_count().await, 1);
    }
}
