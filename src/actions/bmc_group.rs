//! BMC group management: the `BmcGroup.AddToGroup` action.
//!
//! `POST /redfish/v1/Oem/IBM/BmcGroup/Actions/BmcGroup.AddToGroup` with
//! `{"BmcName": "..."}` asks the group manager to add a BMC. The manager
//! reports progress by emitting `PropertiesChanged` on its object path:
//!
//! | `Status`     | Task outcome                                           |
//! |--------------|--------------------------------------------------------|
//! | `InProgress` | stays `Running`/`OK`, optional `Progress` (int) moves  |
//! | `Completed`  | `Completed`/`OK`, 100%, `TaskCompletedOK`              |
//! | `Failed`     | `Exception`/`Critical`, `InternalError`                |
//!
//! Anything else, including a missing or non-string `Status`, keeps the task
//! waiting.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::backend::{invoke_detached, MethodCall, MethodCaller};
use crate::bus::{MatchRule, Notification};
use crate::domain::{Completion, TaskRecord};
use crate::error::{BusError, Result, TaskError};
use crate::projector::TaskResponse;
use crate::registry::{TaskOptions, TaskRegistry};
use crate::types::messages;
use crate::types::task::{Payload, TaskState, TaskStatus};

/// Bus service owning the group manager.
pub const BMC_GROUP_SERVICE: &str = "xyz.openbmc_project.BmcGroup.Manager";

/// Interface carrying the `AddToGroup` method and the `Status` property.
pub const BMC_GROUP_INTERFACE: &str = "xyz.openbmc_project.BmcGroup.Manager";

/// Object path of the group manager.
pub const BMC_GROUP_OBJECT_PATH: &str = "/xyz/openbmc_project/bmc_group";

pub const ADD_TO_GROUP_METHOD: &str = "AddToGroup";

/// The `BmcGroup` resource.
pub const BMC_GROUP_URI: &str = "/redfish/v1/Oem/IBM/BmcGroup";

pub const ADD_TO_GROUP_TARGET: &str = "/redfish/v1/Oem/IBM/BmcGroup/Actions/BmcGroup.AddToGroup";

pub const ADD_TO_GROUP_ACTION_INFO_URI: &str = "/redfish/v1/Oem/IBM/BmcGroup/AddToGroupActionInfo";

/// Request property naming the BMC to add.
pub const BMC_NAME_PROPERTY: &str = "BmcName";

/// Completion callback for an `AddToGroup` task.
///
/// # Errors
///
/// [`TaskError::Callback`] when the notification body is not a
/// `PropertiesChanged` payload; the task then fails closed.
pub fn handle_add_to_group_task(
    event: std::result::Result<&Notification, &BusError>,
    record: &mut TaskRecord,
) -> Result<Completion> {
    let notification = match event {
        Ok(notification) => notification,
        Err(err) => {
            error!(task_id = record.id(), error = %err, "AddToGroup task subscription failed");
            record.push_message(messages::internal_error());
            record.set_state(TaskState::Exception);
            record.set_status(TaskStatus::Critical);
            return Ok(Completion::Finished);
        }
    };

    let (_interface, properties) = notification
        .read_properties_changed()
        .map_err(|err| TaskError::Callback(err.to_string()))?;

    let Some(status) = properties.get("Status").and_then(|v| v.as_str()) else {
        return Ok(Completion::Pending);
    };
    debug!(task_id = record.id(), status, "AddToGroup status");

    match status {
        "Completed" => {
            record.push_message(messages::task_completed_ok(record.id()));
            record.set_state(TaskState::Completed);
            record.set_status(TaskStatus::Ok);
            record.advance_progress(100);
            record.set_result_uri(BMC_GROUP_URI);
            Ok(Completion::Finished)
        }
        "Failed" => {
            record.push_message(messages::internal_error());
            record.set_state(TaskState::Exception);
            record.set_status(TaskStatus::Critical);
            Ok(Completion::Finished)
        }
        "InProgress" => {
            record.set_state(TaskState::Running);
            record.set_status(TaskStatus::Ok);
            let progress = properties.get("Progress").and_then(|v| v.as_i64());
            if let Some(progress) = progress {
                if record.advance_progress(progress) {
                    let percent = record.percent_complete();
                    record.push_message(messages::task_progress_changed(record.id(), percent));
                }
            }
            Ok(Completion::Pending)
        }
        _ => Ok(Completion::Pending),
    }
}

/// Reads and validates `BmcName` from the request body.
fn bmc_name(body: &Value) -> Result<String> {
    match body.get(BMC_NAME_PROPERTY) {
        None | Some(Value::Null) => Err(TaskError::MissingProperty {
            property: BMC_NAME_PROPERTY.to_string(),
        }),
        Some(Value::String(name)) if !name.is_empty() => Ok(name.clone()),
        Some(Value::String(name)) => Err(TaskError::InvalidPropertyValue {
            property: BMC_NAME_PROPERTY.to_string(),
            value: name.clone(),
        }),
        Some(other) => Err(TaskError::InvalidPropertyValue {
            property: BMC_NAME_PROPERTY.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Handles the `AddToGroup` POST.
///
/// Returns the `202 Accepted` response for the new task; the backend call is
/// spawned and its failure, if any, shows up on the task. Must be called
/// inside a tokio runtime.
///
/// # Errors
///
/// Validation errors for `BmcName` before anything is created, and registry
/// errors (full registry, exhausted ids) from task creation.
pub fn add_to_group(
    registry: &TaskRegistry,
    caller: Arc<dyn MethodCaller>,
    req: &http::Request<Value>,
) -> Result<TaskResponse> {
    let bmc_name = bmc_name(req.body())?;
    info!(bmc_name = %bmc_name, "adding BMC to group");

    let rule = MatchRule::properties_changed(BMC_GROUP_OBJECT_PATH)?;
    let options = TaskOptions::default()
        .with_timeout(registry.config().default_timeout())
        .with_payload(Payload::from_request(req).with_target_uri(BMC_GROUP_URI));
    let task = registry.create_with_options(Box::new(handle_add_to_group_task), rule, options)?;
    let response = task.populate_accepted_response();

    let call = MethodCall::new(
        BMC_GROUP_SERVICE,
        BMC_GROUP_OBJECT_PATH,
        BMC_GROUP_INTERFACE,
        ADD_TO_GROUP_METHOD,
    )
    .with_arg(bmc_name);
    invoke_detached(caller, call, task);

    Ok(response)
}

/// The `BmcGroup` resource.
pub fn bmc_group_resource() -> Value {
    json!({
        "@odata.type": "#BmcGroup.v1_0_0.BmcGroup",
        "@odata.id": BMC_GROUP_URI,
        "Id": "BmcGroup",
        "Name": "BMC Group Management",
        "Description": "BMC Group Management Service for adding BMCs to groups",
        "Actions": {
            "#BmcGroup.AddToGroup": {
                "target": ADD_TO_GROUP_TARGET,
                "@Redfish.ActionInfo": ADD_TO_GROUP_ACTION_INFO_URI,
            }
        }
    })
}

/// Parameters accepted by `AddToGroup`.
pub fn add_to_group_action_info() -> Value {
    json!({
        "@odata.type": "#ActionInfo.v1_1_2.ActionInfo",
        "@odata.id": ADD_TO_GROUP_ACTION_INFO_URI,
        "Id": "AddToGroupActionInfo",
        "Name": "Add To Group Action Info",
        "Parameters": [{
            "Name": BMC_NAME_PROPERTY,
            "Required": true,
            "DataType": "String",
            "Description": "The hostname or IP address of the BMC to add to the group",
        }]
    })
}
