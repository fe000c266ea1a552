//! Wire-facing types: lifecycle enums, payload descriptor and registry
//! messages.

pub mod messages;
pub mod task;

pub use messages::Message;
pub use task::{Payload, TaskLifecycleEvent, TaskState, TaskStatus, TaskSummary};
