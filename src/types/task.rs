//! Task lifecycle enums and the small wire types shared by the registry and
//! the response projector.
//!
//! # Serialization
//!
//! Redfish spells its enum members in PascalCase (`Running`, `Exception`) and
//! its health values as `OK`, `Warning`, `Critical`; the serde attributes here
//! follow that so the JSON needs no post-processing.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TaskError;

/// Lifecycle state of a task (`TaskState` in Redfish).
///
/// # State Machine
///
/// ```text
/// Running -> Completed, Exception, Cancelled
/// Completed -> (terminal, no transitions)
/// Exception -> (terminal, no transitions)
/// Cancelled -> (terminal, no transitions)
/// ```
///
/// # Examples
///
/// ```
/// use redfish_tasks::TaskState;
///
/// assert!(!TaskState::Running.is_terminal());
/// assert!(TaskState::Running.can_transition_to(&TaskState::Completed));
/// assert!(!TaskState::Completed.can_transition_to(&TaskState::Exception));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// The backend operation is in flight.
    Running,
    /// The operation finished successfully (terminal).
    Completed,
    /// The operation failed, timed out, or could not be tracked (terminal).
    Exception,
    /// The task was abandoned on request (terminal).
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Exception => write!(f, "Exception"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl TaskState {
    /// Returns `true` for `Completed`, `Exception` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Only `Running` may move, and only to a terminal state.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }

    /// Validates a transition, returning [`TaskError::InvalidTransition`] on
    /// rejection.
    pub fn validate_transition(&self, task_id: u64, next: &Self) -> Result<(), TaskError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TaskError::InvalidTransition {
                task_id,
                from: *self,
                to: *next,
            })
        }
    }
}

/// Coarse outcome severity (`TaskStatus` in Redfish), independent of
/// [`TaskState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Nothing wrong.
    #[serde(rename = "OK")]
    Ok,
    /// Needs attention.
    Warning,
    /// Failed.
    Critical,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "Warning"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Descriptor of the request that triggered a task, echoed back to pollers.
///
/// # Examples
///
/// ```
/// use redfish_tasks::Payload;
/// use serde_json::json;
///
/// let payload = Payload::new("POST", "/redfish/v1/Oem/IBM/BmcGroup")
///     .with_json_body(json!({"BmcName": "bmc1"}));
///
/// let json = serde_json::to_value(&payload).unwrap();
/// assert_eq!(json["HttpOperation"], "POST");
/// assert_eq!(json["JsonBody"], "{\"BmcName\":\"bmc1\"}");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload {
    /// HTTP method of the originating request.
    pub http_operation: String,

    /// Resource the operation acts on.
    pub target_uri: String,

    /// Originating request headers as `Name: value` lines.
    pub http_headers: Vec<String>,

    /// Originating request body, serialized.
    #[serde(with = "json_body")]
    pub json_body: Value,
}

impl Payload {
    /// Creates a payload with no headers and a `null` body.
    pub fn new(http_operation: impl Into<String>, target_uri: impl Into<String>) -> Self {
        Self {
            http_operation: http_operation.into(),
            target_uri: target_uri.into(),
            http_headers: Vec::new(),
            json_body: Value::Null,
        }
    }

    /// Builds a payload from an incoming request, keeping its method, path,
    /// headers and body.
    ///
    /// # Examples
    ///
    /// ```
    /// use redfish_tasks::Payload;
    /// use serde_json::json;
    ///
    /// let req = http::Request::post("/redfish/v1/Oem/IBM/BmcGroup/Actions/BmcGroup.AddToGroup")
    ///     .header("Content-Type", "application/json")
    ///     .body(json!({"BmcName": "bmc1"}))
    ///     .unwrap();
    ///
    /// let payload = Payload::from_request(&req);
    /// assert_eq!(payload.http_operation, "POST");
    /// assert_eq!(payload.http_headers, vec!["content-type: application/json".to_string()]);
    /// ```
    pub fn from_request(req: &http::Request<Value>) -> Self {
        let http_headers = req
            .headers()
            .iter()
            .map(|(name, value)| {
                format!("{}: {}", name.as_str(), value.to_str().unwrap_or_default())
            })
            .collect();

        Self {
            http_operation: req.method().as_str().to_string(),
            target_uri: req.uri().path().to_string(),
            http_headers,
            json_body: req.body().clone(),
        }
    }

    /// Overrides the target resource.
    pub fn with_target_uri(mut self, target_uri: impl Into<String>) -> Self {
        self.target_uri = target_uri.into();
        self
    }

    /// Sets the request body.
    pub fn with_json_body(mut self, body: Value) -> Self {
        self.json_body = body;
        self
    }
}

/// Redfish carries `JsonBody` as a string, not a nested object.
mod json_body {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(body: &Value, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&body.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
        let raw = String::deserialize(deserializer)?;
        serde_json::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Minimal per-task row of the task-collection view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskSummary {
    /// Task identifier.
    pub id: u64,
    /// Current lifecycle state.
    pub task_state: TaskState,
    /// Current severity.
    pub task_status: TaskStatus,
}

/// Emitted by the registry when a task is created and when it turns terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLifecycleEvent {
    /// Task identifier.
    pub id: u64,
    /// State at the time of the event.
    pub state: TaskState,
    /// Severity at the time of the event.
    pub status: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_serializes_pascal_case() {
        assert_eq!(serde_json::to_value(TaskState::Exception).unwrap(), json!("Exception"));
        assert_eq!(TaskState::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn status_ok_is_upper_case() {
        assert_eq!(serde_json::to_value(TaskStatus::Ok).unwrap(), json!("OK"));
        let parsed: TaskStatus = serde_json::from_value(json!("Critical")).unwrap();
        assert_eq!(parsed, TaskStatus::Critical);
    }

    #[test]
    fn terminal_states_reject_every_transition() {
        for from in [TaskState::Completed, TaskState::Exception, TaskState::Cancelled] {
            for to in [
                TaskState::Running,
                TaskState::Completed,
                TaskState::Exception,
                TaskState::Cancelled,
            ] {
                assert!(from.validate_transition(1, &to).is_err());
            }
        }
    }

    #[test]
    fn running_to_running_is_rejected() {
        assert!(!TaskState::Running.can_transition_to(&TaskState::Running));
    }

    #[test]
    fn payload_body_round_trips_through_string() {
        let payload = Payload::new("POST", "/x").with_json_body(json!({"a": 1}));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["JsonBody"], json!("{\"a\":1}"));
        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }
}
