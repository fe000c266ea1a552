//! Response projection.
//!
//! Pure functions from a [`TaskRecord`] snapshot to the external Redfish
//! representation. Nothing here touches shared state, so any number of
//! pollers can project concurrently.

use http::header::{HeaderValue, LOCATION, RETRY_AFTER};
use http::{HeaderMap, StatusCode};
use serde_json::{json, Value};

use crate::constants::{
    task_monitor_uri, task_uri, TASK_COLLECTION_ODATA_TYPE, TASK_COLLECTION_URI,
    TASK_ODATA_TYPE, TASK_SERVICE_ODATA_TYPE, TASK_SERVICE_URI,
};
use crate::domain::TaskRecord;
use crate::types::task::{TaskState, TaskSummary};

/// Status, headers and JSON body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TaskResponse {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// The `Location` header, if present.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

/// `202 Accepted` for the triggering request: `Location` names the task
/// resource, the body carries the task and its `TaskMonitor` pointer.
pub fn accepted(record: &TaskRecord, retry_after_secs: u64) -> TaskResponse {
    TaskResponse {
        status: StatusCode::ACCEPTED,
        headers: pending_headers(record.id(), retry_after_secs),
        body: task_resource(record),
    }
}

/// `200 OK` with the task resource.
pub fn current_state(record: &TaskRecord) -> TaskResponse {
    TaskResponse::ok(task_resource(record))
}

/// Task-monitor response: `202` with retry hints while running, `200` once
/// the task ended.
pub fn monitor(record: &TaskRecord, retry_after_secs: u64) -> TaskResponse {
    if record.state().is_terminal() {
        return current_state(record);
    }
    TaskResponse {
        status: StatusCode::ACCEPTED,
        headers: pending_headers(record.id(), retry_after_secs),
        body: task_resource(record),
    }
}

fn pending_headers(id: u64, retry_after_secs: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&task_uri(id)) {
        headers.insert(LOCATION, location);
    }
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
    headers
}

/// The Redfish `Task` resource.
///
/// # Examples
///
/// ```
/// use redfish_tasks::domain::TaskRecord;
/// use redfish_tasks::projector::task_resource;
///
/// let json = task_resource(&TaskRecord::new(5));
/// assert_eq!(json["@odata.id"], "/redfish/v1/TaskService/Tasks/5");
/// assert_eq!(json["TaskState"], "Running");
/// assert_eq!(json["TaskMonitor"], "/redfish/v1/TaskService/TaskMonitors/5");
/// assert!(json.get("EndTime").is_none());
/// ```
pub fn task_resource(record: &TaskRecord) -> Value {
    let id = record.id();
    let mut body = json!({
        "@odata.id": task_uri(id),
        "@odata.type": TASK_ODATA_TYPE,
        "Id": id.to_string(),
        "Name": format!("Task {id}"),
        "TaskState": record.state(),
        "TaskStatus": record.status(),
        "PercentComplete": record.percent_complete(),
        "Messages": record.messages(),
        "StartTime": record.start_time().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "TaskMonitor": task_monitor_uri(id),
        "HidePayload": record.payload().is_none(),
    });

    if let Some(end) = record.end_time() {
        body["EndTime"] = json!(end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    }
    if let Some(payload) = record.payload() {
        body["Payload"] = json!(payload);
    }
    if record.state() == TaskState::Completed {
        if let Some(uri) = record.result_uri() {
            body["Links"] = json!({ "CreatedResources": [{ "@odata.id": uri }] });
        }
    }
    body
}

/// The `TaskCollection` resource, members in id order.
pub fn collection(summaries: &[TaskSummary]) -> Value {
    let members: Vec<Value> = summaries
        .iter()
        .map(|s| {
            json!({
                "@odata.id": task_uri(s.id),
                "Id": s.id.to_string(),
                "TaskState": s.task_state,
                "TaskStatus": s.task_status,
            })
        })
        .collect();
    json!({
        "@odata.id": TASK_COLLECTION_URI,
        "@odata.type": TASK_COLLECTION_ODATA_TYPE,
        "Name": "Task Collection",
        "Members@odata.count": members.len(),
        "Members": members,
    })
}

/// The `TaskService` root resource.
pub fn task_service() -> Value {
    json!({
        "@odata.id": TASK_SERVICE_URI,
        "@odata.type": TASK_SERVICE_ODATA_TYPE,
        "Id": "TaskService",
        "Name": "Task Service",
        "CompletedTaskOverWritePolicy": "Oldest",
        "LifeCycleEventOnTaskStateChange": true,
        "ServiceEnabled": true,
        "Status": { "State": "Enabled", "Health": "OK" },
        "Tasks": { "@odata.id": TASK_COLLECTION_URI },
    })
}
