use thiserror::Error;

/// Usage errors of the stub machinery. These are returned straight to the test
/// program and never translated.
#[derive(Debug, Error)]
pub enum StubError {
    #[error("invalid service path: {0:?}")]
    InvalidPath(String),

    #[error("no service registered at: {0}")]
    UnknownService(String),

    #[error("service {service} has no operation: {operation}")]
    UnknownOperation { service: String, operation: String },

    #[error("service already registered at: {0}")]
    AlreadyRegistered(String),

    #[error("service is not stubbed: {0}")]
    NotStubbed(String),

    #[error("failed to construct {service} client: {message}")]
    Construct { service: String, message: String },
}

/// Error delivered through a request's completion paths: callbacks, deferred
/// results, read streams and `error` events.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct SdkError {
    pub code: String,
    pub message: String,
}

impl SdkError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            "MissingRequiredParameter",
            format!("missing required key '{}' in params", name),
        )
    }

    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::new(
            "NoSuchKey",
            format!("the specified key does not exist: {}/{}", bucket, key),
        )
    }
}
