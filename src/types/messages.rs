//! Redfish message-registry entries placed in task `Messages` and error bodies.
//!
//! Only the handful of `TaskEvent` and `Base` registry messages the task
//! service emits are modelled. Each constructor fills in the registry text
//! with its arguments so pollers see the same wording a Redfish client
//! expects from a BMC.

use serde::{Deserialize, Serialize};

use crate::constants::MESSAGE_ODATA_TYPE;
use crate::types::task::TaskStatus;

/// A single Redfish `Message` object.
///
/// # Examples
///
/// ```
/// use redfish_tasks::types::messages::{self, Message};
///
/// let msg = messages::task_started(3);
/// assert_eq!(msg.message_id, "TaskEvent.1.0.TaskStarted");
/// assert_eq!(msg.message, "The task with Id '3' has started.");
///
/// let json = serde_json::to_value(&msg).unwrap();
/// assert_eq!(json["MessageArgs"][0], "3");
/// assert_eq!(json["MessageSeverity"], "OK");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Always [`MESSAGE_ODATA_TYPE`].
    #[serde(rename = "@odata.type")]
    pub odata_type: String,

    /// Registry-qualified identifier, e.g. `Base.1.0.InternalError`.
    pub message_id: String,

    /// Human-readable text with arguments substituted.
    pub message: String,

    /// Arguments substituted into the registry text.
    pub message_args: Vec<String>,

    /// Severity of the condition the message reports.
    pub message_severity: TaskStatus,

    /// Suggested operator action.
    pub resolution: String,
}

impl Message {
    fn new(
        message_id: &str,
        message: String,
        message_args: Vec<String>,
        message_severity: TaskStatus,
        resolution: &str,
    ) -> Self {
        Self {
            odata_type: MESSAGE_ODATA_TYPE.to_string(),
            message_id: message_id.to_string(),
            message,
            message_args,
            message_severity,
            resolution: resolution.to_string(),
        }
    }

    /// Returns `true` if this message carries the given registry id.
    pub fn is(&self, message_id: &str) -> bool {
        self.message_id == message_id
    }
}

pub const TASK_STARTED: &str = "TaskEvent.1.0.TaskStarted";
pub const TASK_COMPLETED_OK: &str = "TaskEvent.1.0.TaskCompletedOK";
pub const TASK_CANCELLED: &str = "TaskEvent.1.0.TaskCancelled";
pub const TASK_PROGRESS_CHANGED: &str = "TaskEvent.1.0.TaskProgressChanged";
pub const INTERNAL_ERROR: &str = "Base.1.0.InternalError";
pub const OPERATION_TIMEOUT: &str = "Base.1.0.OperationTimeout";
pub const PROPERTY_MISSING: &str = "Base.1.0.PropertyMissing";
pub const PROPERTY_VALUE_FORMAT_ERROR: &str = "Base.1.0.PropertyValueFormatError";
pub const RESOURCE_NOT_FOUND: &str = "Base.1.0.ResourceNotFound";
pub const SERVICE_TEMPORARILY_UNAVAILABLE: &str = "Base.1.0.ServiceTemporarilyUnavailable";

/// `TaskEvent.1.0.TaskStarted`
pub fn task_started(id: u64) -> Message {
    Message::new(
        TASK_STARTED,
        format!("The task with Id '{id}' has started."),
        vec![id.to_string()],
        TaskStatus::Ok,
        "None.",
    )
}

/// `TaskEvent.1.0.TaskCompletedOK`
pub fn task_completed_ok(id: u64) -> Message {
    Message::new(
        TASK_COMPLETED_OK,
        format!("The task with Id '{id}' has completed."),
        vec![id.to_string()],
        TaskStatus::Ok,
        "None.",
    )
}

/// `TaskEvent.1.0.TaskCancelled`
pub fn task_cancelled(id: u64) -> Message {
    Message::new(
        TASK_CANCELLED,
        format!("The task with Id '{id}' has been cancelled."),
        vec![id.to_string()],
        TaskStatus::Warning,
        "None.",
    )
}

/// `TaskEvent.1.0.TaskProgressChanged`
pub fn task_progress_changed(id: u64, percent: u8) -> Message {
    Message::new(
        TASK_PROGRESS_CHANGED,
        format!("The task with Id '{id}' has changed to progress {percent} percent complete."),
        vec![id.to_string(), percent.to_string()],
        TaskStatus::Ok,
        "None.",
    )
}

/// `Base.1.0.InternalError`
pub fn internal_error() -> Message {
    Message::new(
        INTERNAL_ERROR,
        "The request failed due to an internal service error.  The service is still operational."
            .to_string(),
        Vec::new(),
        TaskStatus::Critical,
        "Resubmit the request.  If the problem persists, consider resetting the service.",
    )
}

/// `Base.1.0.OperationTimeout`, the message a timed-out task carries.
pub fn operation_timeout() -> Message {
    Message::new(
        OPERATION_TIMEOUT,
        "A timeout internal to the service occurred as part of the request.  Partial results may have occurred."
            .to_string(),
        Vec::new(),
        TaskStatus::Critical,
        "Resubmit the request.  If the problem persists, consider resetting the service or provider.",
    )
}

/// `Base.1.0.PropertyMissing`
pub fn property_missing(property: &str) -> Message {
    Message::new(
        PROPERTY_MISSING,
        format!("The property {property} is a required property and must be included in the request."),
        vec![property.to_string()],
        TaskStatus::Warning,
        "Ensure that the property is in the request body and has a valid value and resubmit the request if the operation failed.",
    )
}

/// `Base.1.0.PropertyValueFormatError`
pub fn property_value_format_error(value: &str, property: &str) -> Message {
    Message::new(
        PROPERTY_VALUE_FORMAT_ERROR,
        format!("The value '{value}' for the property {property} is not a format that the property can accept."),
        vec![value.to_string(), property.to_string()],
        TaskStatus::Warning,
        "Correct the value for the property in the request body and resubmit the request if the operation failed.",
    )
}

/// `Base.1.0.ResourceNotFound`
pub fn resource_not_found(kind: &str, name: &str) -> Message {
    Message::new(
        RESOURCE_NOT_FOUND,
        format!("The requested resource of type {kind} named '{name}' was not found."),
        vec![kind.to_string(), name.to_string()],
        TaskStatus::Critical,
        "Provide a valid resource identifier and resubmit the request.",
    )
}

/// `Base.1.0.ServiceTemporarilyUnavailable`
pub fn service_temporarily_unavailable(retry_after_secs: u64) -> Message {
    Message::new(
        SERVICE_TEMPORARILY_UNAVAILABLE,
        format!("The service is temporarily unavailable.  Retry in {retry_after_secs} seconds."),
        vec![retry_after_secs.to_string()],
        TaskStatus::Critical,
        "Wait for the indicated retry duration and retry the operation.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_is_critical_without_args() {
        let msg = internal_error();
        assert_eq!(msg.message_severity, TaskStatus::Critical);
        assert!(msg.message_args.is_empty());
        assert!(msg.is(INTERNAL_ERROR));
    }

    #[test]
    fn timeout_message_is_distinct_from_internal_error() {
        assert_ne!(operation_timeout().message_id, internal_error().message_id);
    }

    #[test]
    fn format_error_substitutes_both_args() {
        let msg = property_value_format_error("", "BmcName");
        assert_eq!(msg.message_args, vec!["".to_string(), "BmcName".to_string()]);
        assert!(msg.message.contains("BmcName"));
    }

    #[test]
    fn serializes_with_odata_type() {
        let json = serde_json::to_value(task_cancelled(9)).unwrap();
        assert_eq!(json["@odata.type"], MESSAGE_ODATA_TYPE);
        assert_eq!(json["MessageId"], TASK_CANCELLED);
        assert_eq!(json["MessageSeverity"], "Warning");
    }
}
