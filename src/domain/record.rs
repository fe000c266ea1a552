//! Task record: the mutable state a completion callback works on.
//!
//! [`TaskRecord`] keeps its fields private so that the lifecycle invariants
//! hold no matter what a callback does: progress never moves backwards,
//! messages are append-only, the payload is written at most once, and the end
//! time is stamped only by the owning [`Task`](crate::domain::Task).

use chrono::{DateTime, Utc};

use crate::types::messages::Message;
use crate::types::task::{Payload, TaskState, TaskStatus, TaskSummary};

/// Snapshot-able state of a single task.
///
/// # Examples
///
/// ```
/// use redfish_tasks::domain::TaskRecord;
/// use redfish_tasks::TaskState;
///
/// let mut record = TaskRecord::new(1);
/// assert_eq!(record.state(), TaskState::Running);
///
/// record.advance_progress(40);
/// record.advance_progress(10); // ignored, progress never goes back
/// assert_eq!(record.percent_complete(), 40);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    id: u64,
    state: TaskState,
    status: TaskStatus,
    percent_complete: u8,
    messages: Vec<Message>,
    payload: Option<Payload>,
    result_uri: Option<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// A `Running`/`OK` record at 0% with the start time set to now.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: TaskState::Running,
            status: TaskStatus::Ok,
            percent_complete: 0,
            messages: Vec::new(),
            payload: None,
            result_uri: None,
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn percent_complete(&self) -> u8 {
        self.percent_complete
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Resource produced by a successful operation, if any.
    pub fn result_uri(&self) -> Option<&str> {
        self.result_uri.as_deref()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Set when the task turns terminal.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Requests a lifecycle state. A terminal state only takes effect if the
    /// callback also reports the task finished.
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }

    /// Raises progress to `percent`, clamped to `0..=100`. Lower values are
    /// ignored. Returns `true` if progress moved.
    pub fn advance_progress(&mut self, percent: i64) -> bool {
        let clamped = u8::try_from(percent.clamp(0, 100)).unwrap_or(100);
        if clamped > self.percent_complete {
            self.percent_complete = clamped;
            true
        } else {
            false
        }
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Records where the operation's result can be found.
    pub fn set_result_uri(&mut self, uri: impl Into<String>) {
        self.result_uri = Some(uri.into());
    }

    /// Returns `true` if the last message carries `message_id`.
    pub fn last_message_is(&self, message_id: &str) -> bool {
        self.messages.last().is_some_and(|m| m.is(message_id))
    }

    /// Per-task row of the collection view.
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.id,
            task_state: self.state,
            task_status: self.status,
        }
    }

    pub(crate) fn store_payload(&mut self, payload: Payload) -> bool {
        if self.payload.is_some() {
            return false;
        }
        self.payload = Some(payload);
        true
    }

    /// Takes over what a callback may change from `draft`, a copy of this
    /// record. The payload and timestamps stay as they are.
    pub(crate) fn apply(&mut self, draft: TaskRecord) {
        self.state = draft.state;
        self.status = draft.status;
        self.percent_complete = self.percent_complete.max(draft.percent_complete);
        if draft.messages.len() >= self.messages.len() {
            self.messages = draft.messages;
        }
        self.result_uri = draft.result_uri;
    }

    /// Stamps the end time and pins progress for a completed task.
    pub(crate) fn seal(&mut self) {
        if self.state == TaskState::Completed {
            self.percent_complete = 100;
        }
        self.end_time = Some(Utc::now());
    }
}
