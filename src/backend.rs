//! Backend method invocation.
//!
//! Triggering adapters start the real operation with exactly one
//! [`MethodCaller::call`]. The call runs detached from the request: the
//! caller has already received its `202 Accepted` by the time the backend
//! answers, so a failure is recorded on the task instead of being returned.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::BusValue;
use crate::domain::Task;
use crate::error::BackendError;

/// Addressing and arguments of one backend method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub service: String,
    pub path: String,
    pub interface: String,
    pub method: String,
    pub args: Vec<BusValue>,
}

impl MethodCall {
    pub fn new(
        service: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            interface: interface.into(),
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Appends an argument.
    pub fn with_arg(mut self, arg: impl Into<BusValue>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Transport that performs backend method calls.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use redfish_tasks::backend::{MethodCall, MethodCaller};
/// use redfish_tasks::error::BackendError;
///
/// struct Offline;
///
/// #[async_trait]
/// impl MethodCaller for Offline {
///     async fn call(&self, call: MethodCall) -> Result<(), BackendError> {
///         Err(BackendError::Unavailable(call.service))
///     }
/// }
/// ```
#[async_trait]
pub trait MethodCaller: Send + Sync {
    /// Performs the call. `Ok` means the backend accepted it; completion is
    /// reported separately through bus notifications.
    async fn call(&self, call: MethodCall) -> Result<(), BackendError>;
}

/// Spawns `call` and forces `task` terminal if it fails.
///
/// Must be called inside a tokio runtime.
pub fn invoke_detached(
    caller: Arc<dyn MethodCaller>,
    call: MethodCall,
    task: Arc<Task>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let method = call.method.clone();
        debug!(task_id = task.id(), service = %call.service, method = %method, "invoking backend method");
        match caller.call(call).await {
            Ok(()) => info!(task_id = task.id(), method = %method, "backend accepted request"),
            Err(err) => {
                task.fail_invocation(&err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<MethodCall>>);

    #[async_trait]
    impl MethodCaller for Recording {
        async fn call(&self, call: MethodCall) -> Result<(), BackendError> {
            self.0.lock().push(call);
            Ok(())
        }
    }

    #[tokio::test]
    async fn call_is_made_once() {
        let caller = Arc::new(Recording::default());
        let registry = crate::TaskRegistry::default();
        let task = registry
            .create(|_, _| Ok(crate::Completion::Pending), "path='/x'")
            .unwrap();

        let call = MethodCall::new("svc", "/x", "iface", "Go").with_arg("arg");
        invoke_detached(caller.clone(), call.clone(), task.clone())
            .await
            .unwrap();

        assert_eq!(*caller.0.lock(), vec![call]);
        assert_eq!(task.state(), crate::TaskState::Running);
    }
}
