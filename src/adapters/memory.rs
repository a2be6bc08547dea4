use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use futures::{future, FutureExt};
use serde_json::{json, Value};

use crate::{
    adapters,
    model::{config::ClientConfig, error::SdkError, error::StubError},
    recorder::lock,
    request::{Callback, Operation, Request},
    util::params,
};

const OPERATIONS: &[&str] = &[
    "getObject",
    "putObject",
    "headObject",
    "listObjectsV2",
    "deleteObject",
];

#[derive(Clone, Debug)]
struct StoredObject {
    body: Vec<u8>,
    modified_time: SystemTime,
}

type Store = Arc<Mutex<BTreeMap<(String, String), StoredObject>>>;
type Handler = fn(&Store, &Value) -> Result<Value, SdkError>;

/// In-process object store speaking the S3 operation names. Every client
/// constructed from one `MemoryService` sees the same buckets.
#[derive(Clone, Default)]
pub struct MemoryService {
    store: Store,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object_count(&self) -> usize {
        lock(&self.store).len()
    }
}

impl adapters::ServiceClass for MemoryService {
    fn name(&self) -> String {
        "Memory".to_string()
    }

    fn operations(&self) -> Vec<String> {
        adapters::operation_names(OPERATIONS)
    }

    fn construct(&self, config: &ClientConfig) -> Result<Arc<dyn adapters::ServiceClient>, StubError> {
        Ok(Arc::new(MemoryClient {
            config: config.clone(),
            store: self.store.clone(),
        }))
    }
}

pub struct MemoryClient {
    config: ClientConfig,
    store: Store,
}

impl MemoryClient {
    fn operation(&self, name: &str, params: Value) -> Option<Operation> {
        let store = self.store.clone();

        let run: Handler = match name {
            "getObject" => get_object,
            "putObject" => put_object,
            "headObject" => head_object,
            "listObjectsV2" => list_objects,
            "deleteObject" => delete_object,
            _ => return None,
        };

        Some(Arc::new(move || future::ready(run(&store, &params)).boxed()))
    }
}

impl adapters::ServiceClient for MemoryClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn invoke(
        &self,
        operation: &str,
        params: Value,
        callback: Option<Callback>,
    ) -> Result<Request, StubError> {
        adapters::dispatch("Memory", operation, self.operation(operation, params), callback)
    }
}

fn object_key(params: &Value) -> Result<(String, String), SdkError> {
    Ok((
        params::required_str(params, "Bucket")?,
        params::required_str(params, "Key")?,
    ))
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn get_object(store: &Store, params: &Value) -> Result<Value, SdkError> {
    let (bucket, key) = object_key(params)?;
    let store = lock(store);
    let object = store
        .get(&(bucket.clone(), key.clone()))
        .ok_or_else(|| SdkError::not_found(&bucket, &key))?;

    let body = match params::optional_str(params, "Range") {
        Some(range) => {
            let (start, end) = params::parse_range(&range)
                .ok_or_else(|| SdkError::new("InvalidRange", format!("invalid range: {}", range)))?;
            let len = object.body.len();
            let start = usize::try_from(start).unwrap_or(usize::MAX).min(len);
            let end = usize::try_from(end).unwrap_or(usize::MAX).saturating_add(1).min(len);
            &object.body[start..end]
        }
        None => &object.body[..],
    };

    Ok(json!({
        "Body": String::from_utf8_lossy(body),
        "ContentLength": body.len(),
        "LastModified": unix_secs(object.modified_time),
    }))
}

fn put_object(store: &Store, params: &Value) -> Result<Value, SdkError> {
    let (bucket, key) = object_key(params)?;
    let body = params::body_bytes(params)?;

    lock(store).insert(
        (bucket, key),
        StoredObject {
            body,
            modified_time: SystemTime::now(),
        },
    );

    Ok(json!({}))
}

fn head_object(store: &Store, params: &Value) -> Result<Value, SdkError> {
    let (bucket, key) = object_key(params)?;
    let store = lock(store);
    let object = store
        .get(&(bucket.clone(), key.clone()))
        .ok_or_else(|| SdkError::new("NotFound", format!("{}/{}", bucket, key)))?;

    Ok(json!({
        "ContentLength": object.body.len(),
        "LastModified": unix_secs(object.modified_time),
    }))
}

fn list_objects(store: &Store, params: &Value) -> Result<Value, SdkError> {
    let bucket = params::required_str(params, "Bucket")?;
    let prefix = params::optional_str(params, "Prefix").unwrap_or_default();

    let contents: Vec<Value> = lock(store)
        .iter()
        .filter(|((b, k), _)| *b == bucket && k.starts_with(&prefix))
        .map(|((_, k), o)| {
            json!({
                "Key": k,
                "Size": o.body.len(),
                "LastModified": unix_secs(o.modified_time),
            })
        })
        .collect();

    Ok(json!({
        "Name": bucket,
        "Prefix": prefix,
        "KeyCount": contents.len(),
        "Contents": contents,
        "IsTruncated": false,
    }))
}

fn delete_object(store: &Store, params: &Value) -> Result<Value, SdkError> {
    let (bucket, key) = object_key(params)?;
    lock(store).remove(&(bucket, key));

    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ServiceClass, ServiceClient};

    fn client(service: &MemoryService) -> Arc<dyn ServiceClient> {
        service.construct(&ClientConfig::new()).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let service = MemoryService::new();
        let client = client(&service);

        client
            .invoke(
                "putObject",
                json!({ "Bucket": "bucket", "Key": "key", "Body": "hello world" }),
                None,
            )
            .unwrap()
            .promise()
            .await
            .unwrap();

        let data = client
            .invoke("getObject", json!({ "Bucket": "bucket", "Key": "key" }), None)
            .unwrap()
            .promise()
            .await
            .unwrap();

        assert_eq!(data["Body"], "hello world");
        assert_eq!(data["ContentLength"], 11);
        assert_eq!(service.object_count(), 1);
    }

    #[test]
    fn test_get_range() {
        let service = MemoryService::new();
        let store = service.store.clone();
        put_object(&store, &json!({ "Bucket": "b", "Key": "k", "Body": "hello world" })).unwrap();

        let cases = vec![
            ("bytes=0-4", Some("hello")),
            ("bytes=6-100", Some("world")),
            ("bytes=20-30", Some("")),
            ("bytes=4-0", None),
            ("bytes=0-18446744073709551615", Some("hello world")),
            ("bytes=6-18446744073709551615", Some("world")),
        ];

        for (range, expected) in cases {
            let result = get_object(&store, &json!({ "Bucket": "b", "Key": "k", "Range": range }));
            let body = result.ok().map(|v| v["Body"].as_str().unwrap_or_default().to_string());
            assert_eq!(body.as_deref(), expected, "failed for case: {}", range);
        }
    }

    #[test]
    fn test_list_objects() {
        let store = MemoryService::new().store;
        for key in ["folder/a", "folder/b", "other"] {
            put_object(&store, &json!({ "Bucket": "bucket", "Key": key })).unwrap();
        }
        put_object(&store, &json!({ "Bucket": "elsewhere", "Key": "folder/c" })).unwrap();

        let cases = vec![("", 3), ("folder/", 2), ("other", 1), ("missing", 0)];

        for (prefix, expected) in cases {
            let result = list_objects(&store, &json!({ "Bucket": "bucket", "Prefix": prefix })).unwrap();
            assert_eq!(result["KeyCount"], expected, "failed for case: {}", prefix);
        }
    }

    #[test]
    fn test_missing_objects_and_params() {
        let store = MemoryService::new().store;

        let cases = vec![
            (get_object as Handler, json!({ "Bucket": "b", "Key": "k" }), "NoSuchKey"),
            (head_object as Handler, json!({ "Bucket": "b", "Key": "k" }), "NotFound"),
            (put_object as Handler, json!({ "Key": "k" }), "MissingRequiredParameter"),
            (list_objects as Handler, json!({}), "MissingRequiredParameter"),
        ];

        for (op, params, expected) in cases {
            let err = op(&store, &params).unwrap_err();
            assert_eq!(err.code, expected, "failed for case: {}", params);
        }
    }

    #[test]
    fn test_delete_object() {
        let service = MemoryService::new();
        put_object(&service.store, &json!({ "Bucket": "b", "Key": "k" })).unwrap();
        assert_eq!(service.object_count(), 1);

        delete_object(&service.store, &json!({ "Bucket": "b", "Key": "k" })).unwrap();
        assert_eq!(service.object_count(), 0);
    }

    #[test]
    fn test_unknown_operation() {
        let service = MemoryService::new();
        let result = client(&service).invoke("getObjekt", json!({}), None);

        assert!(matches!(
            result,
            Err(StubError::UnknownOperation { ref service, ref operation })
                if service == "Memory" && operation == "getObjekt"
        ));
    }
}
