//! Single-shot task deadlines.
//!
//! A [`Deadline`] races a tokio sleep against a [`CancellationToken`]. When the
//! sleep wins, the owner is told through [`DeadlineHandler::on_deadline`];
//! whether that still matters is for the owner to decide, since a terminal
//! transition may have been claimed in the meantime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Receiver of a deadline expiry.
pub trait DeadlineHandler: Send + Sync {
    /// The deadline elapsed before it was cancelled.
    fn on_deadline(&self);
}

/// An armed, cancellable deadline.
///
/// Dropping a `Deadline` cancels it.
#[derive(Debug)]
pub struct Deadline {
    timeout: Duration,
    token: CancellationToken,
    cancelled: AtomicBool,
    fired: Arc<AtomicBool>,
}

impl Deadline {
    /// Starts the countdown. Must be called inside a tokio runtime.
    pub fn arm(timeout: Duration, handler: Weak<dyn DeadlineHandler>) -> Self {
        let token = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let wait_token = token.clone();
        let wait_fired = Arc::clone(&fired);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = wait_token.cancelled() => {
                    trace!("deadline cancelled");
                }
                () = tokio::time::sleep(timeout) => {
                    wait_fired.store(true, Ordering::Release);
                    debug!(timeout_secs = timeout.as_secs(), "deadline elapsed");
                    if let Some(handler) = handler.upgrade() {
                        handler.on_deadline();
                    }
                }
            }
        });

        Self {
            timeout,
            token,
            cancelled: AtomicBool::new(false),
            fired,
        }
    }

    /// Disarms the deadline. Returns `true` only for the first call.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` if the deadline elapsed.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl DeadlineHandler for Counter {
        fn on_deadline(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let counter = Arc::new(Counter::default());
        let weak: Weak<Counter> = Arc::downgrade(&counter);
        let weak: Weak<dyn DeadlineHandler> = weak;
        let deadline = Deadline::arm(Duration::from_secs(60), weak);

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(deadline.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_deadline_never_fires() {
        let counter = Arc::new(Counter::default());
        let weak: Weak<Counter> = Arc::downgrade(&counter);
        let weak: Weak<dyn DeadlineHandler> = weak;
        let deadline = Deadline::arm(Duration::from_secs(1), weak);

        assert!(deadline.cancel());
        assert!(!deadline.cancel());
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(deadline.is_cancelled());
        assert!(!deadline.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_disarms() {
        let counter = Arc::new(Counter::default());
        let weak: Weak<Counter> = Arc::downgrade(&counter);
        let weak: Weak<dyn DeadlineHandler> = weak;
        drop(Deadline::arm(Duration::from_secs(1), weak));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
