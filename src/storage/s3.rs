use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::settings::S3Settings;
use crate::storage::{ListPage, ObjectStore, StorageError};
use crate::utils::constants::DEFAULT_LIST_PAGE_SIZE;

/// Object store backed by one S3 (or S3-compatible) bucket
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(bucket: String, settings: &S3Settings) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::InvalidLocation(
                "bucket name cannot be empty".to_string(),
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if settings.force_path_style {
            builder = builder.force_path_style(true);
        }

        debug!(bucket = %bucket, endpoint = ?settings.endpoint, "Created S3 client");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket,
        })
    }
}

/// Classify an SDK failure: throttling, 5xx and connection problems are retryable.
fn from_sdk<E>(key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = match &err {
        SdkError::ServiceError(service) => Some(service.raw().status().as_u16()),
        _ => None,
    };
    let detail = format!("{}: {}", key, DisplayErrorContext(&err));

    match (&err, status) {
        (SdkError::TimeoutError(_), _)
        | (SdkError::DispatchFailure(_), _)
        | (SdkError::ResponseError(_), _) => StorageError::Transient(detail),
        (_, Some(404)) => StorageError::NotFound(key.to_string()),
        (_, Some(429)) => StorageError::Transient(detail),
        (_, Some(code)) if code >= 500 => StorageError::Transient(detail),
        _ => StorageError::Backend(detail),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(DEFAULT_LIST_PAGE_SIZE as i32)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| from_sdk(prefix, e))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .filter(|key| !key.ends_with('/'))
            .map(str::to_string)
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { keys, next })
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map_or(false, |service| service.is_no_such_key())
                {
                    StorageError::NotFound(key.to_string())
                } else {
                    from_sdk(key, err)
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("{}: {}", key, e)))?;
        Ok(data.into_bytes())
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| from_sdk(key, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| from_sdk(key, e))
        {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
