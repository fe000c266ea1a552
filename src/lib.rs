//! Redfish task service.
//!
//! Tracks long-running backend operations and exposes them to clients as
//! pollable Redfish `Task` resources. An operation is triggered by a request,
//! answered immediately with `202 Accepted`, and then driven to completion by
//! notifications arriving on an in-process event bus rather than by the
//! backend call's return value.
//!
//! # Overview
//!
//! A task starts `Running` and ends exactly once in `Completed`, `Exception`
//! or `Cancelled`. Three independent triggers can end it: its completion
//! callback reacting to a bus notification, its deadline elapsing, or the
//! triggering adapter reporting that the backend call failed. Whichever comes
//! first wins; the others become no-ops.
//!
//! ```
//! use redfish_tasks::bus::{BusValue, Notification, PropertyMap};
//! use redfish_tasks::{Completion, TaskRegistry, TaskState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> redfish_tasks::Result<()> {
//! let registry = TaskRegistry::default();
//! let task = registry.create(
//!     |event, record| {
//!         let done = event
//!             .ok()
//!             .and_then(|n| n.read_properties_changed().ok())
//!             .is_some_and(|(_, props)| props.contains_key("Done"));
//!         if done {
//!             record.set_state(TaskState::Completed);
//!         }
//!         Ok(Completion::from(done))
//!     },
//!     "type='signal',member='PropertiesChanged',path='/xyz/openbmc_project/job'",
//! )?;
//!
//! let mut props = PropertyMap::new();
//! props.insert("Done".to_string(), BusValue::Bool(true));
//! registry.bus().publish(Notification::properties_changed(
//!     "/xyz/openbmc_project/job",
//!     "xyz.openbmc_project.Job",
//!     props,
//! ));
//!
//! assert_eq!(task.wait_terminal().await, TaskState::Completed);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`types`] - Wire types (task state, payload, registry messages)
//! - [`domain`] - The task record and the task state machine
//! - [`bus`] - Notification bus, match rules and subscriptions
//! - [`timer`] - Cancellable task deadlines
//! - [`registry`] - Process-wide task registry
//! - [`projector`] - Redfish JSON and HTTP response projection
//! - [`backend`] - Backend method invocation
//! - [`actions`] - Triggering adapters (BMC group management)
//! - [`config`] - TOML and environment configuration
//! - [`logging`] - `tracing` subscriber setup
//! - [`error`] - Error types with HTTP status mapping
//! - [`constants`] - Resource URIs and defaults

pub mod actions;
pub mod backend;
pub mod bus;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod projector;
pub mod registry;
pub mod timer;
pub mod types;

pub use backend::{MethodCall, MethodCaller};
pub use bus::{EventBus, MatchRule, Notification};
pub use config::{LoggingConfig, TaskServiceConfig};
pub use domain::{Completion, CompletionCallback, Task, TaskRecord};
pub use error::{BackendError, BusError, Result, TaskError};
pub use projector::TaskResponse;
pub use registry::{TaskOptions, TaskRegistry};
pub use types::*;
