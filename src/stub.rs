//! Method stand-ins and the recording proxy that carries them.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, Weak},
};

use serde_json::Value;
use tracing::{debug, info, span, Level};

use crate::{
    adapters::{ServiceClass, ServiceClient},
    model::{
        config::ClientConfig,
        error::{SdkError, StubError},
        path::ServicePath,
    },
    recorder::{lock, CallLog, Spy},
    registry::Slots,
    request::{Callback, Request, Response},
    util::params,
};

/// What a replacement sees in place of `this`: the synthetic request that the
/// stubbed call returns, and a response to complete it with.
#[derive(Clone)]
pub struct StubContext {
    pub request: Request,
    pub response: Response,
}

impl StubContext {
    pub fn synthetic() -> Self {
        Self {
            request: Request::synthetic(),
            response: Response::synthetic(),
        }
    }
}

/// Caller supplied body of a stubbed operation. Receives the original params
/// and callback unchanged.
pub type Replacement = Arc<dyn Fn(&StubContext, Value, Option<Callback>) + Send + Sync>;

#[derive(Clone)]
enum Behavior {
    Synthetic,
    Returns(Request),
    Yields(Result<Value, SdkError>),
    Replacement(Replacement),
}

/// Stand-in for one operation of a stubbed service. Records the params of
/// every invocation.
#[derive(Clone)]
pub struct MethodStub {
    operation: String,
    log: CallLog<Value>,
    behavior: Arc<Mutex<Behavior>>,
}

impl MethodStub {
    pub(crate) fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            log: CallLog::new(),
            behavior: Arc::new(Mutex::new(Behavior::Synthetic)),
        }
    }

    pub(crate) fn with_replacement(operation: &str, replacement: Replacement) -> Self {
        let stub = Self::new(operation);
        *lock(&stub.behavior) = Behavior::Replacement(replacement);
        stub
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Every call returns `request`. Clones of a request share state, so the
    /// test keeps control of what it returns.
    pub fn returns(&self, request: Request) -> &Self {
        *lock(&self.behavior) = Behavior::Returns(request);
        self
    }

    /// Every call hands `result` to the caller's callback, if it passed one.
    pub fn yields(&self, result: Result<Value, SdkError>) -> &Self {
        *lock(&self.behavior) = Behavior::Yields(result);
        self
    }

    pub fn yields_ok(&self, data: Value) -> &Self {
        self.yields(Ok(data))
    }

    pub fn yields_err(&self, err: SdkError) -> &Self {
        self.yields(Err(err))
    }

    pub fn calls_fake(
        &self,
        replacement: impl Fn(&StubContext, Value, Option<Callback>) + Send + Sync + 'static,
    ) -> &Self {
        *lock(&self.behavior) = Behavior::Replacement(Arc::new(replacement));
        self
    }

    pub fn reset_behavior(&self) {
        *lock(&self.behavior) = Behavior::Synthetic;
    }

    /// True if some call received params containing every field of `expected`.
    pub fn called_with_subset(&self, expected: &Value) -> bool {
        self.calls().iter().any(|c| params::is_subset(expected, c))
    }

    pub(crate) fn invoke(&self, params: Value, callback: Option<Callback>) -> Request {
        let span = span!(Level::DEBUG, "stand_in", operation = %self.operation);
        let _e = span.enter();

        self.log.record(params.clone());
        let behavior = lock(&self.behavior).clone();
        debug!(calls = self.log.len(), "called");

        match behavior {
            Behavior::Synthetic => Request::synthetic(),
            Behavior::Returns(request) => request,
            Behavior::Yields(result) => {
                if let Some(cb) = callback {
                    cb(result);
                }
                Request::synthetic()
            }
            Behavior::Replacement(replacement) => {
                let context = StubContext::synthetic();
                replacement(&context, params, callback);
                context.request
            }
        }
    }
}

impl Spy<Value> for MethodStub {
    fn call_log(&self) -> &CallLog<Value> {
        &self.log
    }
}

type StandIns = Arc<Mutex<BTreeMap<String, MethodStub>>>;

/// Recording proxy installed in place of a service class. Construction is
/// recorded and delegated to the original class; clients built through it
/// answer stubbed operations with their stand-ins and pass every other call
/// through.
pub struct ServiceProxy {
    path: ServicePath,
    original: Arc<dyn ServiceClass>,
    constructions: CallLog<ClientConfig>,
    stand_ins: StandIns,
    slots: Weak<Slots>,
}

impl ServiceProxy {
    pub(crate) fn new(path: ServicePath, original: Arc<dyn ServiceClass>, slots: Weak<Slots>) -> Self {
        Self {
            path,
            original,
            constructions: CallLog::new(),
            stand_ins: Arc::new(Mutex::new(BTreeMap::new())),
            slots,
        }
    }

    pub fn path(&self) -> &ServicePath {
        &self.path
    }

    pub fn original(&self) -> Arc<dyn ServiceClass> {
        self.original.clone()
    }

    /// Adds or replaces the stand-in for `stub.operation()`.
    pub(crate) fn install(&self, stub: MethodStub) {
        info!(service = %self.path, operation = stub.operation(), "stand-in installed");
        lock(&self.stand_ins).insert(stub.operation.clone(), stub);
    }

    pub fn stand_in(&self, operation: &str) -> Option<MethodStub> {
        lock(&self.stand_ins).get(operation).cloned()
    }

    pub fn stubbed_operations(&self) -> Vec<String> {
        lock(&self.stand_ins).keys().cloned().collect()
    }

    /// Puts the original class back at this proxy's path.
    pub fn restore(&self) -> Result<(), StubError> {
        let slots = self
            .slots
            .upgrade()
            .ok_or_else(|| StubError::UnknownService(self.path.to_string()))?;

        crate::registry::restore_slot(&slots, &self.path)
    }
}

impl Spy<ClientConfig> for ServiceProxy {
    fn call_log(&self) -> &CallLog<ClientConfig> {
        &self.constructions
    }
}

impl ServiceClass for ServiceProxy {
    fn name(&self) -> String {
        self.original.name()
    }

    fn operations(&self) -> Vec<String> {
        self.original.operations()
    }

    fn construct(&self, config: &ClientConfig) -> Result<Arc<dyn ServiceClient>, StubError> {
        self.constructions.record(config.clone());
        debug!(service = %self.path, constructions = self.constructions.len(), "construct");

        let inner = self.original.construct(config)?;
        Ok(Arc::new(StubbedClient {
            service: self.path.to_string(),
            inner,
            stand_ins: self.stand_ins.clone(),
        }))
    }
}

struct StubbedClient {
    service: String,
    inner: Arc<dyn ServiceClient>,
    stand_ins: StandIns,
}

impl ServiceClient for StubbedClient {
    fn config(&self) -> &ClientConfig {
        self.inner.config()
    }

    fn invoke(
        &self,
        operation: &str,
        params: Value,
        callback: Option<Callback>,
    ) -> Result<Request, StubError> {
        let stand_in = lock(&self.stand_ins).get(operation).cloned();

        match stand_in {
            Some(stub) => Ok(stub.invoke(params, callback)),
            None => {
                debug!(service = %self.service, operation = operation, "pass through");
                self.inner.invoke(operation, params, callback)
            }
        }
    }
}
