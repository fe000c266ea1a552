//! The task state machine.
//!
//! A [`Task`] is driven by three independent triggers: bus notifications fed
//! through its completion callback, its deadline, and direct calls from the
//! adapter that created it (cancellation, invocation failure). All of them
//! funnel into one terminal-transition guard:
//!
//! ```text
//!                 ┌── on_notification ── callback ──┐
//! Running ────────┼── on_subscription_error ────────┼──► claim (CAS) ──► release
//!                 ├── on_deadline ──────────────────┤        │            (unsubscribe,
//!                 └── cancel / fail_invocation ─────┘        │             cancel deadline,
//!                                                   loser: no-op           publish state)
//! ```
//!
//! Callbacks for one task run one at a time, on a copy of the record and
//! without the record mutex held. The copy is written back under the mutex
//! unless another trigger ended the task in the meantime. The `terminated`
//! flag is claimed with a compare-and-swap while that mutex is held, so
//! exactly one trigger wins and the subscription and deadline are released
//! once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::bus::{Notification, NotificationHandler, Subscription};
use crate::domain::record::TaskRecord;
use crate::error::{BackendError, BusError, TaskError};
use crate::projector::{self, TaskResponse};
use crate::timer::{Deadline, DeadlineHandler};
use crate::types::messages::{self, Message};
use crate::types::task::{Payload, TaskLifecycleEvent, TaskState, TaskStatus, TaskSummary};

/// What a completion callback decided about the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Keep waiting for notifications.
    Pending,
    /// The task is done; its recorded state is final.
    Finished,
}

impl From<bool> for Completion {
    fn from(finished: bool) -> Self {
        if finished {
            Self::Finished
        } else {
            Self::Pending
        }
    }
}

/// Per-task completion decision.
///
/// Invoked with each matching notification (or the subscription error that
/// ended delivery) and a working copy of the task's record. No task lock is
/// held while it runs, so it may read the task. Edits are discarded if the
/// task ended before the callback returned. Returning an error fails the task
/// closed: it ends in `Exception`/`Critical`.
pub type CompletionCallback = Box<
    dyn Fn(Result<&Notification, &BusError>, &mut TaskRecord) -> Result<Completion, TaskError>
        + Send
        + Sync,
>;

/// A tracked long-running operation.
///
/// Tasks are created through [`TaskRegistry::create`](crate::TaskRegistry::create)
/// and shared as `Arc<Task>`; the subscription and deadline they own hold only
/// weak references back.
pub struct Task {
    id: u64,
    record: Mutex<TaskRecord>,
    terminated: AtomicBool,
    callback: CompletionCallback,
    /// Held for the whole callback round trip.
    dispatch: Mutex<()>,
    subscription: Mutex<Option<Subscription>>,
    deadline: Mutex<Option<Deadline>>,
    released: AtomicBool,
    terminal_at: Mutex<Option<Instant>>,
    polled: AtomicBool,
    state_tx: watch::Sender<TaskState>,
    lifecycle: Option<broadcast::Sender<TaskLifecycleEvent>>,
    retry_after_secs: u64,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("record", &*self.record.lock())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

impl Task {
    pub(crate) fn new(
        id: u64,
        callback: CompletionCallback,
        lifecycle: Option<broadcast::Sender<TaskLifecycleEvent>>,
        retry_after_secs: u64,
    ) -> Self {
        let (state_tx, _) = watch::channel(TaskState::Running);
        let mut record = TaskRecord::new(id);
        record.push_message(messages::task_started(id));
        Self {
            id,
            record: Mutex::new(record),
            terminated: AtomicBool::new(false),
            callback,
            dispatch: Mutex::new(()),
            subscription: Mutex::new(None),
            deadline: Mutex::new(None),
            released: AtomicBool::new(false),
            terminal_at: Mutex::new(None),
            polled: AtomicBool::new(false),
            state_tx,
            lifecycle,
            retry_after_secs,
        }
    }

    /// Hands the task its subscription. A task that already ended releases
    /// it straight away.
    pub(crate) fn attach_subscription(&self, subscription: Subscription) {
        let _record = self.record.lock();
        if self.is_terminated() {
            subscription.unsubscribe();
            return;
        }
        *self.subscription.lock() = Some(subscription);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` once a terminal transition has been claimed.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.record.lock().state()
    }

    /// A consistent copy of the task's record.
    pub fn snapshot(&self) -> TaskRecord {
        self.record.lock().clone()
    }

    pub fn summary(&self) -> TaskSummary {
        self.record.lock().summary()
    }

    /// Returns `true` while the bus subscription is held and active.
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Returns `true` while a deadline is armed and not cancelled.
    pub fn has_armed_deadline(&self) -> bool {
        self.deadline
            .lock()
            .as_ref()
            .is_some_and(|d| !d.is_cancelled())
    }

    /// Arms the deadline. When it elapses first, the task ends in
    /// `Exception`/`Critical` with an `OperationTimeout` message.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotRunning`] if the task already ended,
    /// [`TaskError::TimerAlreadyArmed`] if `start` was called before.
    pub fn start(self: &Arc<Self>, timeout: Duration) -> Result<(), TaskError> {
        let record = self.record.lock();
        if self.is_terminated() {
            return Err(TaskError::NotRunning {
                id: self.id,
                state: record.state(),
            });
        }
        let mut slot = self.deadline.lock();
        if slot.is_some() {
            return Err(TaskError::TimerAlreadyArmed { id: self.id });
        }
        let handler: Weak<Self> = Arc::downgrade(self);
        let handler: Weak<dyn DeadlineHandler> = handler;
        *slot = Some(Deadline::arm(timeout, handler));
        debug!(task_id = self.id, timeout_secs = timeout.as_secs(), "task deadline armed");
        Ok(())
    }

    /// Stores the descriptor of the triggering request.
    ///
    /// # Errors
    ///
    /// [`TaskError::PayloadAlreadySet`] on a second call.
    pub fn set_payload(&self, payload: Payload) -> Result<(), TaskError> {
        if self.record.lock().store_payload(payload) {
            Ok(())
        } else {
            Err(TaskError::PayloadAlreadySet { id: self.id })
        }
    }

    /// Abandons a running task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotRunning`] if the task had already ended.
    pub fn cancel(&self) -> Result<(), TaskError> {
        if self.force_terminal(
            TaskState::Cancelled,
            TaskStatus::Warning,
            messages::task_cancelled(self.id),
        ) {
            info!(task_id = self.id, "task cancelled");
            Ok(())
        } else {
            Err(TaskError::NotRunning {
                id: self.id,
                state: self.state(),
            })
        }
    }

    /// Records that the backend call which should have started the operation
    /// failed. The task stays pollable, ending in `Exception`/`Critical`.
    ///
    /// Returns `false` if the task had already ended.
    pub fn fail_invocation(&self, error: &BackendError) -> bool {
        error!(task_id = self.id, error = %error, "backend invocation failed");
        self.force_terminal(
            TaskState::Exception,
            TaskStatus::Critical,
            messages::internal_error(),
        )
    }

    /// The `202 Accepted` response for the request that created this task.
    pub fn populate_accepted_response(&self) -> TaskResponse {
        projector::accepted(&self.snapshot(), self.retry_after_secs)
    }

    /// The task resource as seen by a poller.
    pub fn populate_current_state_response(&self) -> TaskResponse {
        projector::current_state(&self.snapshot())
    }

    /// The task-monitor response: `202` while running, `200` once ended.
    pub fn populate_monitor_response(&self) -> TaskResponse {
        projector::monitor(&self.snapshot(), self.retry_after_secs)
    }

    /// A receiver that observes every lifecycle state change.
    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.state_tx.subscribe()
    }

    /// Waits until the task ends and returns its final state.
    pub async fn wait_terminal(&self) -> TaskState {
        let mut rx = self.state_tx.subscribe();
        let result = rx.wait_for(TaskState::is_terminal).await.map(|state| *state);
        result.unwrap_or_else(|_| self.state())
    }

    /// Projects a snapshot for a poller. Reading a terminal snapshot marks
    /// the task as collected.
    pub(crate) fn observe<R>(&self, project: impl FnOnce(&TaskRecord, u64) -> R) -> R {
        let record = self.snapshot();
        if record.state().is_terminal() {
            self.polled.store(true, Ordering::Release);
        }
        project(&record, self.retry_after_secs)
    }

    pub(crate) fn was_polled(&self) -> bool {
        self.polled.load(Ordering::Acquire)
    }

    /// Returns `true` once the subscription and deadline have been released.
    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn terminal_since(&self) -> Option<Instant> {
        *self.terminal_at.lock()
    }

    fn force_terminal(&self, state: TaskState, status: TaskStatus, message: Message) -> bool {
        let mut record = self.record.lock();
        if self.is_terminated() {
            return false;
        }
        record.set_state(state);
        record.set_status(status);
        record.push_message(message);
        self.conclude(record)
    }

    /// Runs the callback on a copy of the record and writes the copy back.
    ///
    /// Returns the re-locked record together with the status it had before
    /// the callback, or `None` if the task ended before or during the call.
    fn run_callback(
        &self,
        event: Result<&Notification, &BusError>,
    ) -> Option<Dispatched<'_>> {
        let _serial = self.dispatch.lock();
        let mut draft = {
            let record = self.record.lock();
            if self.is_terminated() {
                trace!(task_id = self.id, "event after task ended; ignored");
                return None;
            }
            record.clone()
        };
        let previous_status = draft.status();
        let outcome = (self.callback)(event, &mut draft);

        let mut record = self.record.lock();
        if self.is_terminated() {
            trace!(task_id = self.id, "task ended while its callback ran; edits dropped");
            return None;
        }
        record.apply(draft);
        Some(Dispatched {
            record,
            previous_status,
            outcome,
        })
    }

    fn settle(&self, dispatched: Dispatched<'_>) {
        let Dispatched {
            mut record,
            previous_status,
            outcome,
        } = dispatched;
        match outcome {
            Ok(Completion::Pending) => {
                if record.state().is_terminal() {
                    warn!(
                        task_id = self.id,
                        requested = %record.state(),
                        "callback set a terminal state without finishing; task keeps running"
                    );
                    record.set_state(TaskState::Running);
                    record.set_status(previous_status);
                }
                debug!(
                    task_id = self.id,
                    percent_complete = record.percent_complete(),
                    "task progress"
                );
                return;
            }
            Ok(Completion::Finished) => {
                if let Err(err) = TaskState::Running.validate_transition(self.id, &record.state()) {
                    warn!(
                        task_id = self.id,
                        error = %err,
                        "callback finished without a terminal state; marking exception"
                    );
                    record.set_state(TaskState::Exception);
                    record.set_status(TaskStatus::Critical);
                    record.push_message(messages::internal_error());
                }
            }
            Err(err) => {
                error!(task_id = self.id, error = %err, "completion callback failed");
                record.set_state(TaskState::Exception);
                record.set_status(TaskStatus::Critical);
                record.push_message(messages::internal_error());
            }
        }
        self.conclude(record);
    }

    /// Claims the terminal transition. Must be entered with the record lock
    /// held and the final state already written.
    fn conclude(&self, mut record: MutexGuard<'_, TaskRecord>) -> bool {
        if self
            .terminated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        record.seal();
        let event = TaskLifecycleEvent {
            id: self.id,
            state: record.state(),
            status: record.status(),
        };
        drop(record);
        self.release(event);
        true
    }

    fn release(&self, event: TaskLifecycleEvent) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        let deadline = self.deadline.lock().take();
        if let Some(deadline) = deadline {
            deadline.cancel();
        }
        *self.terminal_at.lock() = Some(Instant::now());
        self.released.store(true, Ordering::Release);

        info!(
            task_id = self.id,
            state = %event.state,
            status = %event.status,
            "task finished"
        );
        self.state_tx.send_replace(event.state);
        if let Some(lifecycle) = &self.lifecycle {
            let _ = lifecycle.send(event);
        }
    }
}

/// A callback's outcome with the record it was applied to, still locked.
struct Dispatched<'a> {
    record: MutexGuard<'a, TaskRecord>,
    previous_status: TaskStatus,
    outcome: Result<Completion, TaskError>,
}

impl NotificationHandler for Task {
    fn on_notification(&self, notification: &Notification) {
        if let Some(dispatched) = self.run_callback(Ok(notification)) {
            self.settle(dispatched);
        }
    }

    fn on_subscription_error(&self, error: BusError) {
        let Some(Dispatched {
            mut record,
            outcome,
            ..
        }) = self.run_callback(Err(&error))
        else {
            return;
        };
        error!(task_id = self.id, error = %error, "task subscription failed");
        if let Err(err) = outcome {
            warn!(task_id = self.id, error = %err, "callback rejected subscription error");
        }
        record.set_state(TaskState::Exception);
        record.set_status(TaskStatus::Critical);
        if !record.last_message_is(messages::INTERNAL_ERROR) {
            record.push_message(messages::internal_error());
        }
        self.conclude(record);
    }
}

impl DeadlineHandler for Task {
    fn on_deadline(&self) {
        if self.force_terminal(
            TaskState::Exception,
            TaskStatus::Critical,
            messages::operation_timeout(),
        ) {
            warn!(task_id = self.id, "task timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use crate::bus::{EventBus, MatchRule};

    fn finish_on_done() -> CompletionCallback {
        Box::new(|event, record| {
            let notification = event.map_err(|e| TaskError::Callback(e.to_string()))?;
            match notification.arg0() {
                Some("done") => {
                    record.set_state(TaskState::Completed);
                    Ok(Completion::Finished)
                }
                Some("bad") => Err(TaskError::Callback("unparseable".into())),
                Some("lazy") => Ok(Completion::Finished),
                _ => Ok(Completion::Pending),
            }
        })
    }

    fn running_task(bus: &EventBus) -> Arc<Task> {
        let task = Arc::new(Task::new(1, finish_on_done(), None, 30));
        let handler: Weak<Task> = Arc::downgrade(&task);
        let handler: Weak<dyn NotificationHandler> = handler;
        task.attach_subscription(Subscription::open(
            bus,
            MatchRule::parse("path='/t'").unwrap(),
            handler,
        ));
        task
    }

    fn signal(arg: &str) -> Notification {
        Notification::signal("/t", "i", "m").with_arg(arg)
    }

    #[tokio::test]
    async fn finished_callback_completes_and_releases() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.start(Duration::from_secs(60)).unwrap();

        task.on_notification(&signal("done"));

        let record = task.snapshot();
        assert_eq!(record.state(), TaskState::Completed);
        assert_eq!(record.percent_complete(), 100);
        assert!(record.end_time().is_some());
        assert!(!task.is_subscribed());
        assert!(!task.has_armed_deadline());
        assert!(task.is_released());
    }

    #[tokio::test]
    async fn finished_without_terminal_state_falls_back_to_exception() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.on_notification(&signal("lazy"));

        let record = task.snapshot();
        assert_eq!(record.state(), TaskState::Exception);
        assert_eq!(record.status(), TaskStatus::Critical);
        assert!(record.last_message_is(messages::INTERNAL_ERROR));
    }

    #[tokio::test]
    async fn callback_error_fails_closed() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.on_notification(&signal("bad"));
        assert_eq!(task.state(), TaskState::Exception);
        assert!(task.is_terminated());
    }

    #[tokio::test]
    async fn terminal_state_without_finish_is_reverted() {
        let task = Arc::new(Task::new(
            2,
            Box::new(|_, record| {
                record.set_state(TaskState::Completed);
                Ok(Completion::Pending)
            }),
            None,
            30,
        ));
        task.on_notification(&signal("x"));
        assert_eq!(task.state(), TaskState::Running);
        assert!(!task.is_terminated());
    }

    #[tokio::test]
    async fn reverted_terminal_state_restores_status() {
        let task = Arc::new(Task::new(
            2,
            Box::new(|_, record| {
                record.set_state(TaskState::Exception);
                record.set_status(TaskStatus::Critical);
                Ok(Completion::Pending)
            }),
            None,
            30,
        ));
        task.on_notification(&signal("x"));

        let summary = task.summary();
        assert_eq!(summary.task_state, TaskState::Running);
        assert_eq!(summary.task_status, TaskStatus::Ok);
        assert!(!task.is_terminated());
    }

    /// A task whose callback gets a weak handle to the task itself.
    fn self_aware_task(
        callback: impl Fn(&Task, &mut TaskRecord) -> Result<Completion, TaskError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Task> {
        let slot: Arc<OnceLock<Weak<Task>>> = Arc::new(OnceLock::new());
        let handle = Arc::clone(&slot);
        let task = Arc::new(Task::new(
            6,
            Box::new(move |_, record| {
                let task = handle
                    .get()
                    .and_then(Weak::upgrade)
                    .ok_or_else(|| TaskError::Callback("task dropped".into()))?;
                callback(&*task, record)
            }),
            None,
            30,
        ));
        slot.set(Arc::downgrade(&task)).unwrap();
        task
    }

    #[tokio::test]
    async fn callback_can_read_its_own_task() {
        let task = self_aware_task(|task, record| {
            let seen = task.snapshot();
            assert_eq!(seen.state(), TaskState::Running);
            record.advance_progress(i64::from(seen.percent_complete()) + 10);
            Ok(Completion::Pending)
        });

        task.on_notification(&signal("x"));
        task.on_notification(&signal("x"));
        assert_eq!(task.snapshot().percent_complete(), 20);
        assert_eq!(task.populate_monitor_response().status, http::StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn cancel_while_callback_runs_keeps_cancellation() {
        let task = self_aware_task(|task, record| {
            task.cancel()?;
            record.set_state(TaskState::Completed);
            Ok(Completion::Finished)
        });

        task.on_notification(&signal("x"));

        let record = task.snapshot();
        assert_eq!(record.state(), TaskState::Cancelled);
        assert_eq!(record.status(), TaskStatus::Warning);
        assert!(record.last_message_is(messages::TASK_CANCELLED));
    }

    #[tokio::test]
    async fn notifications_after_termination_are_ignored() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.cancel().unwrap();
        let before = task.snapshot();

        task.on_notification(&signal("done"));
        task.on_subscription_error(BusError::Closed);
        task.on_deadline();

        assert_eq!(task.snapshot(), before);
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_twice_reports_not_running() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        assert!(task.cancel().is_ok());
        assert!(matches!(
            task.cancel(),
            Err(TaskError::NotRunning {
                state: TaskState::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn start_preconditions() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.start(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            task.start(Duration::from_secs(1)),
            Err(TaskError::TimerAlreadyArmed { id: 1 })
        ));

        let ended = running_task(&bus);
        ended.cancel().unwrap();
        assert!(matches!(
            ended.start(Duration::from_secs(1)),
            Err(TaskError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn subscription_error_forces_exception() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.on_subscription_error(BusError::Closed);

        let record = task.snapshot();
        assert_eq!(record.state(), TaskState::Exception);
        let internal = record
            .messages()
            .iter()
            .filter(|m| m.is(messages::INTERNAL_ERROR))
            .count();
        assert_eq!(internal, 1);
    }

    #[tokio::test]
    async fn invocation_failure_is_terminal_once() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        let err = BackendError::Unavailable("down".into());
        assert!(task.fail_invocation(&err));
        assert!(!task.fail_invocation(&err));
        assert_eq!(task.snapshot().status(), TaskStatus::Critical);
    }

    #[tokio::test]
    async fn observing_running_task_does_not_mark_it_polled() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        let state = task.observe(|record, _| record.state());
        assert_eq!(state, TaskState::Running);
        assert!(!task.was_polled());

        task.cancel().unwrap();
        task.observe(|_, _| ());
        assert!(task.was_polled());
    }

    #[tokio::test]
    async fn created_task_carries_started_message() {
        let task = Task::new(9, finish_on_done(), None, 30);
        assert!(task.snapshot().last_message_is(messages::TASK_STARTED));
    }

    #[tokio::test]
    async fn payload_set_once() {
        let task = Task::new(3, finish_on_done(), None, 30);
        task.set_payload(Payload::new("POST", "/a")).unwrap();
        assert!(matches!(
            task.set_payload(Payload::new("POST", "/b")),
            Err(TaskError::PayloadAlreadySet { id: 3 })
        ));
    }

    #[tokio::test]
    async fn lifecycle_event_on_termination() {
        let (tx, mut rx) = broadcast::channel(4);
        let task = Arc::new(Task::new(4, finish_on_done(), Some(tx), 30));
        task.on_notification(&signal("done"));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            TaskLifecycleEvent {
                id: 4,
                state: TaskState::Completed,
                status: TaskStatus::Ok,
            }
        );
    }

    #[tokio::test]
    async fn wait_terminal_observes_bus_driven_completion() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);

        bus.publish(signal("progress"));
        bus.publish(signal("done"));

        let state = tokio::time::timeout(Duration::from_secs(5), task.wait_terminal())
            .await
            .unwrap();
        assert_eq!(state, TaskState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_times_the_task_out() {
        let bus = EventBus::new(8);
        let task = running_task(&bus);
        task.start(Duration::from_secs(300)).unwrap();

        let state = task.wait_terminal().await;
        assert_eq!(state, TaskState::Exception);
        assert!(task.snapshot().last_message_is(messages::OPERATION_TIMEOUT));
        assert!(!task.is_subscribed());
    }
}
