use std::{fmt::Display, sync::Arc};

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{retry::RetryConfig, Region},
    error::ProvideErrorMetadata,
    primitives::ByteStream,
};
use futures::{future::BoxFuture, FutureExt};
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

const DEFAULT_REGION: &str = "us-east-1";

const OPERATIONS: &[&str] = &[
    "getObject",
    "putObject",
    "headObject",
    "listObjectsV2",
    "deleteObject",
];

type Handler = fn(aws_sdk_s3::Client, Value) -> BoxFuture<'static, Result<Value, SdkError>>;

/// Amazon S3, backed by `aws-sdk-s3`.
#[derive(Clone, Copy, Debug, Default)]
pub struct S3Service;

impl adapters::ServiceClass for S3Service {
    fn name(&self) -> String {
        "S3".to_string()
    }

    fn operations(&self) -> Vec<String> {
        adapters::operation_names(OPERATIONS)
    }

    fn construct(&self, config: &ClientConfig) -> Result<Arc<dyn adapters::ServiceClient>, StubError> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let Some(retries) = config.max_retries {
            builder = builder.retry_config(RetryConfig::standard().with_max_attempts(retries + 1));
        }

        Ok(Arc::new(S3Client {
            config: config.clone(),
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        }))
    }
}

pub struct S3Client {
    config: ClientConfig,
    client: aws_sdk_s3::Client,
}

impl S3Client {
    fn operation(&self, name: &str, params: Value) -> Option<Operation> {
        let run: Handler = match name {
            "getObject" => get_object,
            "putObject" => put_object,
            "headObject" => head_object,
            "listObjectsV2" => list_objects_v2,
            "deleteObject" => delete_object,
            _ => return None,
        };

        let client = self.client.clone();
        Some(Arc::new(move || run(client.clone(), params.clone())))
    }
}

impl adapters::ServiceClient for S3Client {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn invoke(
        &self,
        operation: &str,
        params: Value,
        callback: Option<Callback>,
    ) -> Result<Request, StubError> {
        adapters::dispatch("S3", operation, self.operation(operation, params), callback)
    }
}

fn s3_error<E>(operation: &str, target: &str, err: E) -> SdkError
where
    E: ProvideErrorMetadata + Display,
{
    SdkError::new(
        err.code().unwrap_or("Unknown"),
        format!("failed to {} at: {}, {}", operation, target, err),
    )
}

fn get_object(client: aws_sdk_s3::Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        let mut req = client.get_object().bucket(&bucket).key(&key);
        if let Some(range) = params::optional_str(&params, "Range") {
            req = req.range(range);
        }

        let o = req
            .send()
            .await
            .map_err(|err| s3_error("get_object", &key, err))?;

        let content_length = o.content_length().unwrap_or(0);
        let last_modified = o.last_modified().map(|t| t.secs()).unwrap_or(0);
        let e_tag = o.e_tag().map(|t| t.to_string());

        let bytes = o
            .body
            .collect()
            .await
            .map_err(|err| {
                SdkError::new(
                    "ByteStreamError",
                    format!("failed to collect body: {}, {}", key, err),
                )
            })?
            .into_bytes();

        Ok(json!({
            "Body": String::from_utf8_lossy(&bytes),
            "ContentLength": content_length,
            "LastModified": last_modified,
            "ETag": e_tag,
        }))
    }
    .boxed()
}

fn put_object(client: aws_sdk_s3::Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;
        let body = params::body_bytes(&params)?;

        let po = client
            .put_object()
            .bucket(&bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| s3_error("put_object", &key, err))?;

        Ok(json!({ "ETag": po.e_tag() }))
    }
    .boxed()
}

fn head_object(client: aws_sdk_s3::Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        let ho = client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| s3_error("head_object", &key, err))?;

        Ok(json!({
            "ContentLength": ho.content_length().unwrap_or(0),
            "LastModified": ho.last_modified().map(|t| t.secs()).unwrap_or(0),
            "ETag": ho.e_tag(),
        }))
    }
    .boxed()
}

fn list_objects_v2(client: aws_sdk_s3::Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let prefix = params::optional_str(&params, "Prefix").unwrap_or_default();

        let mut req = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
        if let Some(token) = params::optional_str(&params, "ContinuationToken") {
            req = req.continuation_token(token);
        }

        let lo = req
            .send()
            .await
            .map_err(|err| s3_error("list_objects", &prefix, err))?;

        let contents: Vec<Value> = lo
            .contents()
            .iter()
            .map(|o| {
                json!({
                    "Key": o.key().unwrap_or(""),
                    "Size": o.size().unwrap_or(0),
                    "LastModified": o.last_modified().map(|t| t.secs()).unwrap_or(0),
                })
            })
            .collect();

        Ok(json!({
            "Name": bucket,
            "Prefix": prefix,
            "KeyCount": contents.len(),
            "Contents": contents,
            "IsTruncated": lo.is_truncated().unwrap_or(false),
            "NextContinuationToken": lo.next_continuation_token(),
        }))
    }
    .boxed()
}

fn delete_object(client: aws_sdk_s3::Client, params: Value) -> BoxFuture<'static, Result<Value, SdkError>> {
    async move {
        let bucket = params::required_str(&params, "Bucket")?;
        let key = params::required_str(&params, "Key")?;

        client
            .delete_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| s3_error("delete_object", &key, err))?;

        Ok(json!({}))
    }
    .boxed()
}
