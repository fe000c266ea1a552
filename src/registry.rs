//! Process-wide task registry.
//!
//! [`TaskRegistry`] owns every live [`Task`], allocates ids from an explicit
//! counter and removes tasks once they have ended and been collected.
//!
//! # Concurrency
//!
//! The id-to-task map sits behind a `parking_lot::RwLock`: pollers calling
//! [`get`](TaskRegistry::get) or [`list`](TaskRegistry::list) share the read
//! lock, while [`create`](TaskRegistry::create) and
//! [`reap`](TaskRegistry::reap) serialize on the write lock. Id allocation and
//! the capacity check happen under that same write lock, so ids are handed
//! out in insertion order. A new task is fully set up (payload stored,
//! deadline armed, creation announced) before its subscription opens, so no
//! notification can reach it half-built.
//!
//! # Collection
//!
//! A task is reapable once its subscription and deadline have been released
//! and either a poller has read its terminal state or it has been terminal
//! for longer than the configured retention. Running tasks are never
//! removed.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, MatchRule, Notification, NotificationHandler, Subscription};
use crate::config::TaskServiceConfig;
use crate::domain::{Completion, CompletionCallback, Task, TaskRecord};
use crate::error::{BusError, Result, TaskError};
use crate::projector::{self, TaskResponse};
use crate::types::task::{Payload, TaskLifecycleEvent, TaskState, TaskStatus, TaskSummary};

/// Set-up applied to a task before its subscription opens.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use redfish_tasks::registry::TaskOptions;
/// use redfish_tasks::Payload;
///
/// let options = TaskOptions::default()
///     .with_timeout(Duration::from_secs(300))
///     .with_payload(Payload::new("POST", "/redfish/v1/Managers/bmc"));
/// assert_eq!(options.timeout, Some(Duration::from_secs(300)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Deadline to arm. `None` leaves the task without one.
    pub timeout: Option<Duration>,
    /// Descriptor of the triggering request.
    pub payload: Option<Payload>,
}

impl TaskOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Registry of all tasks known to the service.
///
/// # Examples
///
/// ```
/// use redfish_tasks::{Completion, TaskRegistry, TaskServiceConfig, TaskState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> redfish_tasks::Result<()> {
/// let registry = TaskRegistry::new(TaskServiceConfig::default());
/// let task = registry.create(
///     |_event, _record| Ok(Completion::Pending),
///     "type='signal',path='/xyz/openbmc_project/example'",
/// )?;
///
/// assert_eq!(task.id(), 0);
/// assert_eq!(registry.list()[0].task_state, TaskState::Running);
///
/// // An unparseable rule creates nothing.
/// assert!(registry.create(|_, _| Ok(Completion::Pending), "path=/x").is_err());
/// assert_eq!(registry.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TaskRegistry {
    config: TaskServiceConfig,
    bus: EventBus,
    tasks: RwLock<BTreeMap<u64, Arc<Task>>>,
    /// `None` once the last id has been handed out.
    next_id: Mutex<Option<u64>>,
    lifecycle: broadcast::Sender<TaskLifecycleEvent>,
}

impl TaskRegistry {
    /// Creates a registry with its own bus sized from `config`.
    pub fn new(config: TaskServiceConfig) -> Self {
        let bus = EventBus::new(config.bus_capacity);
        Self::with_bus(config, bus)
    }

    /// Creates a registry whose subscriptions listen on `bus`.
    pub fn with_bus(config: TaskServiceConfig, bus: EventBus) -> Self {
        let (lifecycle, _) = broadcast::channel(config.bus_capacity.max(1));
        Self {
            config,
            bus,
            tasks: RwLock::new(BTreeMap::new()),
            next_id: Mutex::new(Some(0)),
            lifecycle,
        }
    }

    /// Starts id allocation at `seed` instead of 0.
    pub fn with_id_seed(self, seed: u64) -> Self {
        *self.next_id.lock() = Some(seed);
        self
    }

    /// Creates a running task whose completion is decided by `callback`,
    /// subscribed to notifications matching `match_rule`.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidMatchRule`] if `match_rule` does not parse
    /// - [`TaskError::ResourceExhausted`] if the registry is full of running
    ///   tasks
    /// - [`TaskError::IdSpaceExhausted`] if no id is left
    ///
    /// Nothing is created on error.
    pub fn create<F>(&self, callback: F, match_rule: &str) -> Result<Arc<Task>>
    where
        F: Fn(std::result::Result<&Notification, &BusError>, &mut TaskRecord) -> Result<Completion>
            + Send
            + Sync
            + 'static,
    {
        let rule = MatchRule::parse(match_rule)?;
        self.create_with_rule(Box::new(callback), rule)
    }

    /// Like [`create`](Self::create) with an already parsed rule.
    pub fn create_with_rule(
        &self,
        callback: CompletionCallback,
        rule: MatchRule,
    ) -> Result<Arc<Task>> {
        self.create_with_options(callback, rule, TaskOptions::default())
    }

    /// Like [`create_with_rule`](Self::create_with_rule), storing the payload
    /// and arming the deadline from `options` before the subscription opens.
    ///
    /// The returned task may already have ended if a matching notification
    /// arrived right away; it is never half set up.
    pub fn create_with_options(
        &self,
        callback: CompletionCallback,
        rule: MatchRule,
        options: TaskOptions,
    ) -> Result<Arc<Task>> {
        let mut tasks = self.tasks.write();
        if tasks.len() >= self.config.max_tasks {
            self.make_room(&mut tasks)?;
        }
        let id = self.allocate_id()?;

        let task = Arc::new(Task::new(
            id,
            callback,
            Some(self.lifecycle.clone()),
            self.config.retry_after_secs,
        ));
        if let Some(payload) = options.payload {
            task.set_payload(payload)?;
        }
        let _ = self.lifecycle.send(TaskLifecycleEvent {
            id,
            state: TaskState::Running,
            status: TaskStatus::Ok,
        });
        if let Some(timeout) = options.timeout {
            task.start(timeout)?;
        }

        let handler: Weak<Task> = Arc::downgrade(&task);
        let handler: Weak<dyn NotificationHandler> = handler;
        info!(task_id = id, rule = %rule, "task created");
        task.attach_subscription(Subscription::open(&self.bus, rule, handler));
        tasks.insert(id, Arc::clone(&task));
        Ok(task)
    }

    /// Looks up a task. `None` means it never existed or was already reaped.
    pub fn get(&self, id: u64) -> Option<Arc<Task>> {
        self.tasks.read().get(&id).cloned()
    }

    /// The task resource for a poller.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id.
    pub fn poll_task(&self, id: u64) -> Result<TaskResponse> {
        let task = self.get(id).ok_or(TaskError::NotFound { id })?;
        Ok(task.observe(|record, _| projector::current_state(record)))
    }

    /// The task-monitor response for a poller.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id.
    pub fn poll_monitor(&self, id: u64) -> Result<TaskResponse> {
        let task = self.get(id).ok_or(TaskError::NotFound { id })?;
        Ok(task.observe(projector::monitor))
    }

    /// Summaries of all tasks, ordered by id.
    pub fn list(&self) -> Vec<TaskSummary> {
        self.tasks.read().values().map(|task| task.summary()).collect()
    }

    /// The task collection resource.
    pub fn collection(&self) -> Value {
        projector::collection(&self.list())
    }

    /// Cancels a running task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] for an unknown id, [`TaskError::NotRunning`]
    /// if the task already ended.
    pub fn cancel(&self, id: u64) -> Result<()> {
        self.get(id).ok_or(TaskError::NotFound { id })?.cancel()
    }

    /// Removes collected tasks and returns how many were removed.
    pub fn reap(&self) -> usize {
        let mut tasks = self.tasks.write();
        let removed = self.reap_locked(&mut tasks);
        if removed > 0 {
            debug!(removed, remaining = tasks.len(), "reaped tasks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Receives an event when a task is created and when it ends.
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<TaskLifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// The bus task subscriptions listen on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &TaskServiceConfig {
        &self.config
    }

    /// Runs [`reap`](Self::reap) every `interval` until `shutdown` is
    /// cancelled or the registry is dropped.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            break;
                        };
                        registry.reap();
                    }
                }
            }
            debug!("task reaper stopped");
        })
    }

    fn allocate_id(&self) -> Result<u64> {
        let mut next = self.next_id.lock();
        let id = next.ok_or(TaskError::IdSpaceExhausted)?;
        *next = id.checked_add(1);
        Ok(id)
    }

    fn is_reapable(&self, task: &Task, now: Instant) -> bool {
        if !task.is_released() {
            return false;
        }
        task.was_polled()
            || task
                .terminal_since()
                .is_some_and(|at| now.saturating_duration_since(at) >= self.config.retention())
    }

    fn reap_locked(&self, tasks: &mut BTreeMap<u64, Arc<Task>>) -> usize {
        let now = Instant::now();
        let before = tasks.len();
        tasks.retain(|_, task| !self.is_reapable(task, now));
        before - tasks.len()
    }

    /// Frees one slot: reap first, then evict the oldest ended task.
    fn make_room(&self, tasks: &mut BTreeMap<u64, Arc<Task>>) -> Result<()> {
        self.reap_locked(tasks);
        while tasks.len() >= self.config.max_tasks {
            let oldest = tasks
                .iter()
                .find(|(_, task)| task.is_released())
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    tasks.remove(&id);
                    debug!(task_id = id, "evicted oldest finished task");
                }
                None => {
                    warn!(limit = self.config.max_tasks, "task registry full");
                    return Err(TaskError::ResourceExhausted {
                        limit: self.config.max_tasks,
                        retry_after_secs: self.config.retry_after_secs,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(TaskServiceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    const RULE: &str = "type='signal',path='/t'";

    fn pending(
        _: std::result::Result<&Notification, &BusError>,
        _: &mut TaskRecord,
    ) -> Result<Completion> {
        Ok(Completion::Pending)
    }

    #[tokio::test]
    async fn ids_increase_from_seed() {
        let registry = TaskRegistry::default().with_id_seed(7);
        let a = registry.create(pending, RULE).unwrap();
        let b = registry.create(pending, RULE).unwrap();
        assert_eq!((a.id(), b.id()), (7, 8));
        assert!(a.is_subscribed());
    }

    #[tokio::test]
    async fn invalid_rule_allocates_nothing() {
        let registry = TaskRegistry::default();
        let err = registry.create(pending, "type='method_call'").unwrap_err();
        assert!(matches!(err, TaskError::InvalidMatchRule { .. }));
        assert!(registry.is_empty());
        assert_eq!(registry.create(pending, RULE).unwrap().id(), 0);
    }

    #[tokio::test]
    async fn counter_overflow_rejects_creation() {
        let registry = TaskRegistry::default().with_id_seed(u64::MAX);
        assert_eq!(registry.create(pending, RULE).unwrap().id(), u64::MAX);
        assert!(matches!(
            registry.create(pending, RULE),
            Err(TaskError::IdSpaceExhausted)
        ));
    }

    #[tokio::test]
    async fn reap_keeps_running_and_unread_tasks() {
        let registry = TaskRegistry::default();
        let running = registry.create(pending, RULE).unwrap();
        let ended = registry.create(pending, RULE).unwrap();
        ended.cancel().unwrap();

        assert_eq!(registry.reap(), 0);
        assert_eq!(registry.len(), 2);

        registry.poll_task(ended.id()).unwrap();
        assert_eq!(registry.reap(), 1);
        assert!(registry.get(ended.id()).is_none());
        assert!(registry.get(running.id()).is_some());
    }

    #[tokio::test]
    async fn full_registry_evicts_oldest_finished() {
        let config = TaskServiceConfig::default().with_max_tasks(2);
        let registry = TaskRegistry::new(config);
        let first = registry.create(pending, RULE).unwrap();
        let _second = registry.create(pending, RULE).unwrap();

        assert!(matches!(
            registry.create(pending, RULE),
            Err(TaskError::ResourceExhausted { limit: 2, .. })
        ));

        first.cancel().unwrap();
        let third = registry.create(pending, RULE).unwrap();
        assert_eq!(third.id(), 2);
        assert!(registry.get(first.id()).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn options_are_applied_before_return() {
        let registry = TaskRegistry::default();
        let options = TaskOptions::default()
            .with_timeout(Duration::from_secs(60))
            .with_payload(Payload::new("POST", "/redfish/v1/x"));
        let task = registry
            .create_with_options(Box::new(pending), MatchRule::parse(RULE).unwrap(), options)
            .unwrap();

        assert!(task.has_armed_deadline());
        assert!(task.is_subscribed());
        assert_eq!(task.snapshot().payload().unwrap().target_uri, "/redfish/v1/x");
        assert!(matches!(
            task.start(Duration::from_secs(1)),
            Err(TaskError::TimerAlreadyArmed { .. })
        ));
    }

    #[tokio::test]
    async fn default_options_leave_task_bare() {
        let registry = TaskRegistry::default();
        let task = registry.create(pending, RULE).unwrap();
        assert!(!task.has_armed_deadline());
        assert!(task.snapshot().payload().is_none());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let registry = TaskRegistry::default();
        let err = registry.poll_monitor(3).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(matches!(registry.cancel(3), Err(TaskError::NotFound { id: 3 })));
    }
}
