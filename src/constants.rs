//! Resource paths, registry identifiers and defaults shared across the crate.

use std::time::Duration;

/// Root of the Redfish task service.
pub const TASK_SERVICE_URI: &str = "/redfish/v1/TaskService";

/// Task collection resource.
pub const TASK_COLLECTION_URI: &str = "/redfish/v1/TaskService/Tasks";

/// Parent of the per-task monitor pointers.
pub const TASK_MONITOR_BASE_URI: &str = "/redfish/v1/TaskService/TaskMonitors";

/// Schema version reported in `@odata.type` for a single task.
pub const TASK_ODATA_TYPE: &str = "#Task.v1_4_3.Task";

/// Schema version reported for the task collection.
pub const TASK_COLLECTION_ODATA_TYPE: &str = "#TaskCollection.TaskCollection";

/// Schema version reported for the task service root.
pub const TASK_SERVICE_ODATA_TYPE: &str = "#TaskService.v1_1_4.TaskService";

/// Schema version of the message objects placed in `Messages`.
pub const MESSAGE_ODATA_TYPE: &str = "#Message.v1_1_1.Message";

/// Time a triggered operation may run before it is forced terminal.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound on live tasks held by a registry.
pub const DEFAULT_MAX_TASKS: usize = 100;

/// How long a terminal task stays pollable when nobody reads it.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

/// Ring-buffer size of the in-process notification bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Value suggested to pollers in the `Retry-After` header.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// D-Bus standard properties interface.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Signal emitted by the properties interface when values change.
pub const PROPERTIES_CHANGED_MEMBER: &str = "PropertiesChanged";

/// Location of a task resource.
pub fn task_uri(id: u64) -> String {
    format!("{TASK_COLLECTION_URI}/{id}")
}

/// Location of a task's monitor pointer.
pub fn task_monitor_uri(id: u64) -> String {
    format!("{TASK_MONITOR_BASE_URI}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uris_embed_the_task_id() {
        assert_eq!(task_uri(7), "/redfish/v1/TaskService/Tasks/7");
        assert_eq!(
            task_monitor_uri(7),
            "/redfish/v1/TaskService/TaskMonitors/7"
        );
    }

    #[test]
    fn default_timeout_is_five_minutes() {
        assert_eq!(DEFAULT_TASK_TIMEOUT, Duration::from_secs(300));
    }
}
