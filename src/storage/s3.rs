//! S3 object store
//!
//! Lists with delimiter `/` so that each call returns one level of the key
//! hierarchy, paging through `ListObjectsV2` continuation tokens.

use super::ObjectStore;
use crate::config::S3Config;
use crate::error::{Error, Result, StorageError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

const BACKEND: &str = "s3";

/// Object store over one S3 bucket
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Wrap an existing client
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into().trim_matches('/').to_string(),
        }
    }

    /// Build a client from the ambient AWS configuration plus overrides
    pub async fn from_config(config: &S3Config) -> Result<Self> {
        let bucket = config.bucket.trim_matches('/');
        if bucket.is_empty() {
            return Err(Error::Configuration("s3.bucket must not be empty".to_string()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        debug!(bucket, "S3 client configured");
        Ok(Self::new(Client::from_conf(builder.build()), bucket))
    }

    /// Bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        &self.bucket
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let request_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let mut children = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&request_prefix)
                .delimiter("/")
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::unavailable(BACKEND, DisplayErrorContext(&e)))?;

            children.extend(
                resp.common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(|p| p.trim_end_matches('/').to_string()),
            );
            children.extend(
                resp.contents()
                    .iter()
                    .filter_map(|o| o.key())
                    .filter(|k| *k != request_prefix)
                    .map(str::to_string),
            );

            match resp.next_continuation_token() {
                Some(token) if resp.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                },
                _ => break,
            }
        }

        Ok(children)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::unavailable(BACKEND, DisplayErrorContext(&e))
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::unavailable(BACKEND, e))?;

        Ok(data.into_bytes())
    }
}
