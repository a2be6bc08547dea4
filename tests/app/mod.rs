//! A small application that reads and writes objects through a registry, in
//! each of the styles a client supports.

use std::{
    error::Error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use futures::TryStreamExt;
use objectstub::{ClientConfig, RequestEvent, SdkError, ServiceRegistry};
use serde_json::{json, Value};
use tokio::sync::oneshot;

pub type AppResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub const REGION: &str = "eu-west-1";

pub fn config() -> ClientConfig {
    ClientConfig::new().region(REGION)
}

pub fn object() -> Value {
    json!({ "Bucket": "bucket", "Key": "key" })
}

fn body(data: &Value) -> AppResult<String> {
    data.get("Body")
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| "response has no body".into())
}

pub async fn use_callback(registry: &ServiceRegistry, service: &str) -> AppResult<String> {
    let client = registry.construct(service, &config())?;
    let (tx, rx) = oneshot::channel();

    client.invoke_with_callback("getObject", object(), move |result| {
        let _ = tx.send(result);
    })?;

    let data = rx.await??;
    body(&data)
}

pub async fn use_promise(registry: &ServiceRegistry, service: &str) -> AppResult<String> {
    let client = registry.construct(service, &config())?;
    let data = client.invoke("getObject", object())?.promise().await?;

    body(&data)
}

pub async fn streaming(registry: &ServiceRegistry, service: &str) -> AppResult<String> {
    let client = registry.construct(service, &config())?;
    let request = client.invoke("getObject", object())?;

    let chunks: Vec<Vec<u8>> = request.create_read_stream().try_collect().await?;
    Ok(String::from_utf8(chunks.concat())?)
}

/// Returns the body together with how many times the request's success and
/// error handlers ran.
pub async fn use_events(registry: &ServiceRegistry, service: &str) -> AppResult<(String, usize)> {
    let client = registry.construct(service, &config())?;
    let request = client.invoke("getObject", object())?;
    let (tx, rx) = oneshot::channel::<Result<Value, SdkError>>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let deliveries = Arc::new(AtomicUsize::new(0));

    let on_error = tx.clone();
    let errors = deliveries.clone();
    request.on(RequestEvent::Error, move |response| {
        errors.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = on_error.lock().unwrap().take() {
            let err = response
                .error()
                .unwrap_or_else(|| SdkError::new("UnknownError", "request failed"));
            let _ = tx.send(Err(err));
        }
    });

    let on_success = tx;
    let successes = deliveries.clone();
    request.on(RequestEvent::Success, move |response| {
        successes.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = on_success.lock().unwrap().take() {
            let _ = tx.send(Ok(response.data().unwrap_or(Value::Null)));
        }
    });

    request.send();

    let data = rx.await??;
    // let any delivery already queued behind the first one run
    tokio::task::yield_now().await;

    Ok((body(&data)?, deliveries.load(Ordering::SeqCst)))
}

pub async fn multiple_methods(registry: &ServiceRegistry, service: &str) -> AppResult<String> {
    let client = registry.construct(service, &config())?;

    let mut params = object();
    params["Body"] = json!("hello world");

    let put = client.invoke("putObject", params)?.promise();
    let get = client.invoke("getObject", object())?.promise();

    put.await?;
    let data = get.await?;

    body(&data)
}
