use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::{
    model::{config::ClientConfig, error::StubError},
    request::{Callback, Operation, Request},
};

pub mod gcs;
pub mod memory;
pub mod s3;

/// A constructible service client type, the unit that gets registered under a
/// service path and swapped out while stubbed.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceClass: Send + Sync {
    fn name(&self) -> String;

    /// Every operation a client of this class answers to.
    fn operations(&self) -> Vec<String>;

    fn construct(&self, config: &ClientConfig) -> Result<Arc<dyn ServiceClient>, StubError>;
}

pub fn has_operation(class: &dyn ServiceClass, operation: &str) -> bool {
    class.operations().iter().any(|op| op == operation)
}

pub trait ServiceClient: Send + Sync {
    fn config(&self) -> &ClientConfig;

    /// Starts `operation`. With a callback the request is sent right away and
    /// the outcome delivered to it; without one the caller drives the request.
    fn invoke(
        &self,
        operation: &str,
        params: Value,
        callback: Option<Callback>,
    ) -> Result<Request, StubError>;
}

/// Shared tail of every live client: wraps the operation into a request and
/// sends it when a callback was supplied.
pub(crate) fn dispatch(
    service: &str,
    operation: &str,
    built: Option<Operation>,
    callback: Option<Callback>,
) -> Result<Request, StubError> {
    let Some(op) = built else {
        return Err(StubError::UnknownOperation {
            service: service.to_string(),
            operation: operation.to_string(),
        });
    };

    debug!(service = service, operation = operation, "dispatch");

    let request = Request::from_operation(op);
    if let Some(cb) = callback {
        request.send_with_callback(cb);
    }

    Ok(request)
}

pub(crate) fn operation_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
