use std::sync::Arc;

use futures::{future::BoxFuture, FutureExt};
use google_cloud_storage::{
    client::{Client, ClientConfig as GcsConfig},
    http::{
        objects::{
            delete::DeleteObjectRequest,
            download::Range,
            get::GetObjectRequest,
            list::ListObjectsRequest,
            upload::{Media, UploadObjectRequest, UploadType},
        },
        Error as HttpError,
    },
};
use serde_json::{json, Value};

use crate::{
    adapters,
    model::{
        config::ClientConfig,
        error::{SdkError, StubError},
    },
    request::{Callback, Operation, Request},
    util::params,
};

const OPERATIONS: &[&str] = &[
    "getObject",
    "putObject",
    "headObject",
    "listObjects",
    "deleteObject",
];

type Handler = fn(Client, Value) -> BoxFuture<'static, Result<Value, SdkError>>;

/// Google Cloud Storage, backed by `google-cloud-storage`. Clients are
/// anonymous; credentials would need an async token source.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcsService;

impl adapters::ServiceClass for GcsService {
    fn name(&self) -> String {
        "Storage".to_string()
    }

    fn operations(&self) -> Vec<String> {
        adapters::operation_names(OPERATIONS)
    }

    fn construct(&self, config: &ClientConfig) -> Result<Arc<dyn adapters::ServiceClient>, StubError> {
        let mut gcs_config = GcsConfig::default().anonymous();
        if let Some(endpoint) = &config.endpoint {
            gcs_config.storage_endpoint = endpoint.clone();
        }

        Ok(Arc::new(GcsClient {
            config: config.clone(),
            client: Client::new(gcs_config),
        }))
    }
}

pub struct GcsClient {
    config: ClientConfig,
    client: Client,
}

impl GcsClient {
    fn operation(&self, name: &str, params: Value) -> Option<Operation> {
        let run: Handler = match name {
            "getObject" => get_object,
            "putObject" => put_object,
            "headObject" => head_object,
            "listObjects" => list_objects,
            "deleteObject" => delete_object,
            _ => return None,
        };

        let client = self.client.clone();
        Some(Arc::new(move || run(client.clone(), params.clone())))
    }
}

impl adapters::ServiceClient for GcsClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn invoke(
        &self,
        operation: &str,
        params: Value,
        callback: Option<Callback>,
    ) -> Result<Request, StubError> {
        adapters::dispatch("Storage", operation, self.operation(operation, params), callback)
    }
}

fn gcs_error(operation: &str, target: &str, err: HttpError) -> SdkError {
    match err {
        HttpError::Response(err) if err.code == 404 => SdkError::new(
            "NotFound",
            format!("failed to {} at: {}, {}", operation, target, err),
        ),
        HttpError::Response(err) => SdkError::new(
            format!("Http{}", err.code),
            format!("failed to {} at: {}, {}", operation, target, err),
        ),
        err => SdkError::new(
            "NetworkingError",
            format!("failed to {} at: {}, {}", operation, target, err),
        ),
    }
}

fn unix_secs(updated: Option<time::OffsetDateTime>) -> i64 {
    updated
        .unwrap_or(time::OffsetDateTime::now_utc())
        .unix_timestamp()
}

fn get_object(client: Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        let req = GetObjectRequest {
            bucket: bucket.clone(),
            object: key.clone(),
            ..Default::default()
        };

        let range = match params::optional_str(&params, "Range") {
            Some(range) => {
                let (start, end) = params::parse_range(&range).ok_or_else(|| {
                    SdkError::new("InvalidRange", format!("invalid range: {}", range))
                })?;
                Range(Some(start), Some(end))
            }
            None => Range::default(),
        };

        let bytes = match client.download_object(&req, &range).await {
            Err(HttpError::Response(err)) if err.code == 404 => {
                return Err(SdkError::not_found(&bucket, &key));
            }
            Err(err) => return Err(gcs_error("download_object", &key, err)),
            Ok(bytes) => bytes,
        };

        Ok(json!({
            "Body": String::from_utf8_lossy(&bytes),
            "ContentLength": bytes.len(),
        }))
    }
    .boxed()
}

fn put_object(client: Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;
        let body = params::body_bytes(&params)?;

        let req = UploadObjectRequest {
            bucket,
            ..Default::default()
        };

        let obj = client
            .upload_object(&req, body, &UploadType::Simple(Media::new(key.clone())))
            .await
            .map_err(|err| gcs_error("upload_object", &key, err))?;

        Ok(json!({ "ETag": obj.etag }))
    }
    .boxed()
}

fn head_object(client: Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        let req = GetObjectRequest {
            bucket,
            object: key.clone(),
            ..Default::default()
        };

        let obj = client
            .get_object(&req)
            .await
            .map_err(|err| gcs_error("get_object", &key, err))?;

        Ok(json!({
            "ContentLength": obj.size,
            "LastModified": unix_secs(obj.updated),
            "ETag": obj.etag,
        }))
    }
    .boxed()
}

fn list_objects(client: Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let prefix = params::optional_str(&params, "Prefix").unwrap_or_default();

        let req = ListObjectsRequest {
            bucket: bucket.clone(),
            prefix: Some(prefix.clone()),
            page_token: params::optional_str(&params, "PageToken"),
            ..Default::default()
        };

        let lo = client
            .list_objects(&req)
            .await
            .map_err(|err| gcs_error("list_objects", &prefix, err))?;

        let contents: Vec<Value> = lo
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|obj| {
                json!({
                    "Key": obj.name,
                    "Size": obj.size,
                    "LastModified": unix_secs(obj.updated),
                })
            })
            .collect();

        Ok(json!({
            "Name": bucket,
            "Prefix": prefix,
            "KeyCount": contents.len(),
            "Contents": contents,
            "NextPageToken": lo.next_page_token,
        }))
    }
    .boxed()
}

fn delete_object(client: Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        let req = DeleteObjectRequest {
            bucket,
            object: key.clone(),
            ..Default::default()
        };

        client
            .delete_object(&req)
            .await
            .map_err(|err| gcs_error("delete_object", &key, err))?;

        Ok(json!({}))
    }
    .boxed()
}
