//! Filtered subscriptions delivering bus notifications to a single handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bus::match_rule::MatchRule;
use crate::bus::message::Notification;
use crate::bus::EventBus;
use crate::error::BusError;

/// Receiver of the notifications a [`Subscription`] lets through.
///
/// Calls for one subscription are made sequentially from a single delivery
/// loop, in bus-arrival order. Implementations must not block.
pub trait NotificationHandler: Send + Sync {
    /// A notification matched the subscription's rule.
    fn on_notification(&self, notification: &Notification);

    /// The subscription failed and will deliver nothing further.
    fn on_subscription_error(&self, error: BusError);
}

/// A live, filtered view of the bus owned by exactly one handler.
///
/// The handler is held through a [`Weak`] reference, so a subscription never
/// keeps its owner alive. Dropping the subscription unsubscribes it.
#[derive(Debug)]
pub struct Subscription {
    rule: MatchRule,
    token: CancellationToken,
    released: AtomicBool,
}

impl Subscription {
    /// Subscribes to `bus` and starts delivering notifications that match
    /// `rule` to `handler`.
    ///
    /// The bus receiver is registered before this returns, so anything
    /// published afterwards is seen. Must be called inside a tokio runtime.
    pub fn open(bus: &EventBus, rule: MatchRule, handler: Weak<dyn NotificationHandler>) -> Self {
        let mut rx = bus.subscribe();
        let token = CancellationToken::new();
        let loop_token = token.clone();
        let loop_rule = rule.clone();

        debug!(rule = %rule, "opening bus subscription");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = loop_token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(notification) => {
                            if !loop_rule.matches(&notification) {
                                continue;
                            }
                            if loop_token.is_cancelled() {
                                break;
                            }
                            let Some(handler) = handler.upgrade() else {
                                break;
                            };
                            trace!(rule = %loop_rule, path = %notification.path, "delivering notification");
                            handler.on_notification(&notification);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(rule = %loop_rule, skipped, "subscription lagged; notifications dropped");
                        }
                        Err(RecvError::Closed) => {
                            if let Some(handler) = handler.upgrade() {
                                handler.on_subscription_error(BusError::Closed);
                            }
                            break;
                        }
                    },
                }
            }
            debug!(rule = %loop_rule, "bus subscription closed");
        });

        Self {
            rule,
            token,
            released: AtomicBool::new(false),
        }
    }

    /// Stops delivery. Returns `true` only for the call that released the
    /// subscription; later calls are no-ops.
    pub fn unsubscribe(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Returns `true` until [`unsubscribe`](Self::unsubscribe) is called.
    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// The rule this subscription filters on.
    pub fn rule(&self) -> &MatchRule {
        &self.rule
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
