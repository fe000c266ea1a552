//! Error types for task tracking.
//!
//! [`TaskError`] covers everything that can be reported synchronously to the
//! caller that triggered or polled a task. Failures that happen after a task
//! exists (bus errors, backend failures, timeouts) are absorbed into the task
//! itself and only surface here as the [`BusError`] and [`BackendError`]
//! values handed to the task.

use http::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::ConfigError;
use crate::types::messages::{self, Message};
use crate::types::task::TaskState;

/// Errors returned by task registry, task and adapter operations.
///
/// Use [`status_code`](TaskError::status_code) to pick the HTTP status of
/// the error response and [`to_error_body`](TaskError::to_error_body) for
/// its Redfish JSON body.
///
/// # Examples
///
/// ```
/// use redfish_tasks::TaskError;
///
/// let err = TaskError::NotFound { id: 12 };
/// assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
/// assert_eq!(err.to_string(), "task not found: 12");
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// The bus match expression could not be parsed.
    #[error("invalid match rule '{rule}': {reason}")]
    InvalidMatchRule {
        /// The rule as supplied.
        rule: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A required request property is absent.
    #[error("required property missing: {property}")]
    MissingProperty {
        /// Property name.
        property: String,
    },

    /// A request property is present but unusable.
    #[error("invalid value '{value}' for property {property}")]
    InvalidPropertyValue {
        /// Property name.
        property: String,
        /// Offending value.
        value: String,
    },

    /// No task with this id is (still) registered.
    #[error("task not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: u64,
    },

    /// The registry is full of running tasks.
    #[error("too many running tasks (limit {limit})")]
    ResourceExhausted {
        /// Configured capacity.
        limit: usize,
        /// How long clients should wait before retrying.
        retry_after_secs: u64,
    },

    /// The id counter cannot advance without reusing an id.
    #[error("task id space exhausted")]
    IdSpaceExhausted,

    /// `start` was called on a task whose timer is already armed.
    #[error("timer already armed for task {id}")]
    TimerAlreadyArmed {
        /// Task id.
        id: u64,
    },

    /// The operation requires a running task.
    #[error("task {id} is not running (state: {state})")]
    NotRunning {
        /// Task id.
        id: u64,
        /// Current state.
        state: TaskState,
    },

    /// A lifecycle transition was rejected.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// Task id.
        task_id: u64,
        /// Current state.
        from: TaskState,
        /// Requested state.
        to: TaskState,
    },

    /// The payload was already set once.
    #[error("payload already set for task {id}")]
    PayloadAlreadySet {
        /// Task id.
        id: u64,
    },

    /// A completion callback could not interpret a notification.
    #[error("completion callback failed: {0}")]
    Callback(String),

    /// Bus-level failure.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TaskError {
    /// Maps this error to the HTTP status returned to the caller.
    ///
    /// - `400 Bad Request`: request and match-rule problems
    /// - `404 Not Found`: unknown task id
    /// - `409 Conflict`: operations against a task in the wrong state
    /// - `503 Service Unavailable`: registry capacity or id exhaustion
    /// - `500 Internal Server Error`: everything else
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidMatchRule { .. }
            | Self::MissingProperty { .. }
            | Self::InvalidPropertyValue { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::TimerAlreadyArmed { .. }
            | Self::NotRunning { .. }
            | Self::InvalidTransition { .. }
            | Self::PayloadAlreadySet { .. } => StatusCode::CONFLICT,
            Self::ResourceExhausted { .. } | Self::IdSpaceExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Callback(_) | Self::Bus(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The registry message describing this error.
    pub fn message(&self) -> Message {
        match self {
            Self::MissingProperty { property } => messages::property_missing(property),
            Self::InvalidPropertyValue { property, value } => {
                messages::property_value_format_error(value, property)
            }
            Self::NotFound { id } => messages::resource_not_found("Task", &id.to_string()),
            Self::ResourceExhausted {
                retry_after_secs, ..
            } => messages::service_temporarily_unavailable(*retry_after_secs),
            _ => messages::internal_error(),
        }
    }

    /// Redfish error body: `{"error": {"code", "message", "@Message.ExtendedInfo"}}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use redfish_tasks::TaskError;
    ///
    /// let body = TaskError::MissingProperty { property: "BmcName".into() }.to_error_body();
    /// assert_eq!(body["error"]["code"], "Base.1.0.PropertyMissing");
    /// assert_eq!(body["error"]["@Message.ExtendedInfo"][0]["MessageArgs"][0], "BmcName");
    /// ```
    pub fn to_error_body(&self) -> Value {
        let message = self.message();
        json!({
            "error": {
                "code": message.message_id,
                "message": message.message,
                "@Message.ExtendedInfo": [message],
            }
        })
    }
}

/// Failures reported by the notification bus to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The bus shut down; no further notifications will arrive.
    #[error("notification bus closed")]
    Closed,

    /// The subscriber fell behind and notifications were dropped.
    #[error("subscriber lagged, {skipped} notifications dropped")]
    Lagged {
        /// Number of dropped notifications.
        skipped: u64,
    },

    /// A notification body did not have the expected shape.
    #[error("malformed notification: {0}")]
    Decode(String),
}

/// Failures of the backend method invocation that triggers an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The service answered the call with an error.
    #[error("{service}.{method} failed: {message}")]
    MethodFailed {
        /// Service name.
        service: String,
        /// Method name.
        method: String,
        /// Error text from the service.
        message: String,
    },

    /// The service could not be reached.
    #[error("backend service unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            TaskError::MissingProperty {
                property: "BmcName".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TaskError::InvalidMatchRule {
                rule: "x".into(),
                reason: "y".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn exhaustion_is_unavailable() {
        assert_eq!(
            TaskError::ResourceExhausted {
                limit: 1,
                retry_after_secs: 5,
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TaskError::IdSpaceExhausted.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn full_registry_body_carries_its_retry_hint() {
        let body = TaskError::ResourceExhausted {
            limit: 1,
            retry_after_secs: 5,
        }
        .to_error_body();
        let info = &body["error"]["@Message.ExtendedInfo"][0];
        assert_eq!(info["MessageId"], messages::SERVICE_TEMPORARILY_UNAVAILABLE);
        assert_eq!(info["MessageArgs"][0], "5");

        let body = TaskError::IdSpaceExhausted.to_error_body();
        assert_eq!(body["error"]["code"], messages::INTERNAL_ERROR);
    }

    #[test]
    fn not_found_body_names_the_task() {
        let body = TaskError::NotFound { id: 4 }.to_error_body();
        assert_eq!(body["error"]["code"], messages::RESOURCE_NOT_FOUND);
        assert_eq!(body["error"]["@Message.ExtendedInfo"][0]["MessageArgs"][1], "4");
    }

    #[test]
    fn bus_error_converts() {
        let err: TaskError = BusError::Closed.into();
        assert_eq!(err.to_string(), "notification bus closed");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::MethodFailed {
            service: "svc".into(),
            method: "Go".into(),
            message: "denied".into(),
        };
        assert_eq!(err.to_string(), "svc.Go failed: denied");
    }
}
