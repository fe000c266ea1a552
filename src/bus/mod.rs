//! # In-process notification bus.
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`] carrying
//! [`Notification`]s from the backend side to task subscriptions.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                  Subscriptions (one per task):
//!   backend signal ──┐
//!   backend signal ──┼──► EventBus ──► Subscription(rule) ──► Task
//!   test harness   ──┘  (broadcast)   Subscription(rule) ──► Task
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits for subscribers.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag tolerance**: a receiver that falls behind skips the oldest items;
//!   the task timeout covers anything that was missed.
//! - **No persistence**: notifications published with no live subscription
//!   are lost.

pub mod match_rule;
pub mod message;
pub mod subscription;

use std::sync::Arc;

use tokio::sync::broadcast;

pub use match_rule::MatchRule;
pub use message::{BusValue, Notification, PropertyMap};
pub use subscription::{NotificationHandler, Subscription};

/// Broadcast channel for bus notifications.
///
/// Cheap to clone; every clone publishes into the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Notification>>,
}

impl EventBus {
    /// Creates a bus with the given ring-buffer capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes a notification, returning how many receivers saw it.
    pub fn publish(&self, notification: Notification) -> usize {
        self.tx.send(Arc::new(notification)).unwrap_or(0)
    }

    /// Creates an independent receiver of everything published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Notification>> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_BUS_CAPACITY)
    }
}
