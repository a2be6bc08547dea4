//! Request and response objects handed back by service clients.
//!
//! Event subscription is real on both kinds of request, so a test can drive
//! delivery with [`Request::emit`]. Everything else that carries behavior is a
//! [`Stub`]: live requests program those stubs to execute the underlying
//! operation, synthetic requests leave them at their inert defaults.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
};

use futures::{
    executor,
    future::{self, BoxFuture, Shared},
    stream::{self, BoxStream},
    FutureExt, StreamExt,
};
use serde_json::Value;
use tracing::{debug, span, Level};

use crate::{
    model::error::SdkError,
    recorder::{lock, Stub},
    util,
};

pub type Deferred = Shared<BoxFuture<'static, Result<Value, SdkError>>>;
pub type ReadStream = BoxStream<'static, Result<Vec<u8>, SdkError>>;
pub type Callback = Box<dyn FnOnce(Result<Value, SdkError>) + Send>;

/// A repeatable unit of work against a service. Every call yields a fresh future.
pub type Operation = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, SdkError>> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestEvent {
    Validate,
    Send,
    Success,
    Error,
    Complete,
    Retry,
}

impl fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestEvent::Validate => "validate",
            RequestEvent::Send => "send",
            RequestEvent::Success => "success",
            RequestEvent::Error => "error",
            RequestEvent::Complete => "complete",
            RequestEvent::Retry => "retry",
        };
        write!(f, "{}", name)
    }
}

type Handler = Arc<dyn Fn(&Response) + Send + Sync>;

struct Listener {
    handler: Handler,
    once: bool,
}

#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<Mutex<HashMap<RequestEvent, Vec<Listener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, event: RequestEvent, handler: impl Fn(&Response) + Send + Sync + 'static) {
        self.add(event, Arc::new(handler), false);
    }

    pub fn once(&self, event: RequestEvent, handler: impl Fn(&Response) + Send + Sync + 'static) {
        self.add(event, Arc::new(handler), true);
    }

    fn add(&self, event: RequestEvent, handler: Handler, once: bool) {
        lock(&self.listeners)
            .entry(event)
            .or_default()
            .push(Listener { handler, once });
    }

    /// Runs every handler registered for `event`. Returns false when there were
    /// none. Handlers run without the listener table locked, so they may
    /// subscribe further handlers.
    pub fn emit(&self, event: RequestEvent, response: &Response) -> bool {
        let handlers: Vec<Handler> = {
            let mut listeners = lock(&self.listeners);
            let Some(registered) = listeners.get_mut(&event) else {
                return false;
            };

            let handlers: Vec<Handler> = registered.iter().map(|l| l.handler.clone()).collect();
            registered.retain(|l| !l.once);
            handlers
        };

        debug!(event = %event, listeners = handlers.len(), "emit");

        for handler in &handlers {
            handler(response);
        }

        !handlers.is_empty()
    }

    pub fn listener_count(&self, event: RequestEvent) -> usize {
        lock(&self.listeners).get(&event).map_or(0, |l| l.len())
    }

    pub fn remove_all_listeners(&self, event: RequestEvent) {
        lock(&self.listeners).remove(&event);
    }
}

/// A request as returned by a service client call.
///
/// The public stub fields program and inspect behavior; the methods of the
/// same name are what application code calls.
#[derive(Clone)]
pub struct Request {
    events: EventEmitter,
    pub send: Stub<(), ()>,
    pub promise: Stub<(), Deferred>,
    pub create_read_stream: Stub<(), ReadStream>,
    pub abort: Stub<(), ()>,
}

impl Request {
    /// A request with no network state. `send` and `abort` do nothing, `promise`
    /// resolves to `null` and `create_read_stream` ends immediately, until a test
    /// programs them otherwise.
    pub fn synthetic() -> Self {
        Self {
            events: EventEmitter::new(),
            send: Stub::new(|_| ()),
            promise: Stub::new(|_| future::ready(Ok(Value::Null)).boxed().shared()),
            create_read_stream: Stub::new(|_| stream::empty().boxed()),
            abort: Stub::new(|_| ()),
        }
    }

    /// A request whose behaviors execute `operation`.
    pub fn from_operation(operation: Operation) -> Self {
        let request = Self::synthetic();

        let op = operation.clone();
        request.promise.calls_fake(move |_| op().shared());

        let op = operation.clone();
        let events = request.events.clone();
        request.send.calls_fake(move |_| {
            let events = events.clone();
            let work = op().map(move |result| {
                let response = Response::completed(result);
                let event = if response.error().is_some() {
                    RequestEvent::Error
                } else {
                    RequestEvent::Success
                };

                events.emit(event, &response);
                events.emit(RequestEvent::Complete, &response);
            });

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(work);
                }
                Err(_) => executor::block_on(work),
            }
        });

        let op = operation;
        request.create_read_stream.calls_fake(move |_| {
            op().map(|result| result.and_then(|data| body_of(&data)))
                .into_stream()
                .boxed()
        });

        request
    }

    pub fn on(&self, event: RequestEvent, handler: impl Fn(&Response) + Send + Sync + 'static) -> &Self {
        self.events.on(event, handler);
        self
    }

    pub fn once(&self, event: RequestEvent, handler: impl Fn(&Response) + Send + Sync + 'static) -> &Self {
        self.events.once(event, handler);
        self
    }

    pub fn emit(&self, event: RequestEvent, response: &Response) -> bool {
        self.events.emit(event, response)
    }

    pub fn listener_count(&self, event: RequestEvent) -> usize {
        self.events.listener_count(event)
    }

    pub fn send(&self) {
        self.send.call(());
    }

    /// Delivers the outcome of the request to `callback` exactly once, then
    /// sends it.
    pub fn send_with_callback(&self, callback: Callback) {
        let span = span!(Level::DEBUG, "send_with_callback", context = "send_with_callback");
        let _e = span.enter();

        let slot = Arc::new(Mutex::new(Some(callback)));

        let on_success = slot.clone();
        self.once(RequestEvent::Success, move |response| {
            if let Some(cb) = lock(&on_success).take() {
                cb(Ok(response.data().unwrap_or(Value::Null)));
            }
        });

        let on_error = slot;
        self.once(RequestEvent::Error, move |response| {
            if let Some(cb) = lock(&on_error).take() {
                let err = response
                    .error()
                    .unwrap_or_else(|| SdkError::new("UnknownError", "request failed"));
                cb(Err(err));
            }
        });

        self.send();
    }

    pub fn promise(&self) -> Deferred {
        self.promise.call(())
    }

    pub fn create_read_stream(&self) -> ReadStream {
        self.create_read_stream.call(())
    }

    pub fn abort(&self) {
        self.abort.call(());
    }
}

fn body_of(data: &Value) -> Result<Vec<u8>, SdkError> {
    util::params::body_bytes(data)
}

#[derive(Default)]
struct ResponseState {
    data: Option<Value>,
    error: Option<SdkError>,
}

/// The outcome of a request, as passed to event handlers.
#[derive(Clone)]
pub struct Response {
    state: Arc<Mutex<ResponseState>>,
    pub has_next_page: Stub<(), bool>,
    pub next_page: Stub<(), Option<Request>>,
}

impl Response {
    pub fn synthetic() -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState::default())),
            has_next_page: Stub::new(|_| false),
            next_page: Stub::new(|_| None),
        }
    }

    pub fn completed(result: Result<Value, SdkError>) -> Self {
        let response = Self::synthetic();
        match result {
            Ok(data) => response.set_data(data),
            Err(err) => response.set_error(err),
        }

        response
    }

    pub fn data(&self) -> Option<Value> {
        lock(&self.state).data.clone()
    }

    pub fn set_data(&self, data: Value) {
        lock(&self.state).data = Some(data);
    }

    pub fn error(&self) -> Option<SdkError> {
        lock(&self.state).error.clone()
    }

    pub fn set_error(&self, err: SdkError) {
        lock(&self.state).error = Some(err);
    }

    pub fn has_next_page(&self) -> bool {
        self.has_next_page.call(())
    }

    pub fn next_page(&self) -> Option<Request> {
        self.next_page.call(())
    }
}
