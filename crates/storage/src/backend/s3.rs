//! S3-compatible object store.
//!
//! This module provides an object store implementation for S3-compatible
//! services including AWS S3, Backblaze B2, MinIO, and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file (or the
//! `HOARD_S3__KEY_ID`/`HOARD_S3__KEY_SECRET` environment variables).
//!
//! TODO: support the AWS SDK credential provider chain (profiles, instance
//! metadata) once `aws-config` is part of the dependency tree.

use crate::backend::{BoxAsyncRead, ObjectStore};
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_key;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, retry::RetryConfig},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use exn::{OptionExt, ResultExt};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// S3 refuses part numbers above this.
const MAX_PARTS: i32 = 10_000;

/// S3-compatible object store.
///
/// Stores objects in an S3 bucket, optionally under a key prefix.
///
/// # Examples
///
/// ```no_run
/// use hoard_storage::backend::S3Backend;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "b2",
///     "my-bucket",
///     Some("hoard".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 object store.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as virtual directory)
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(|p| {
                let validated = validate_key(&p)?;
                validated.to_str().map(str::to_string).ok_or_raise(|| ErrorKind::InvalidKey(p))
            })
            .transpose()?;
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "hoard-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Exponential backoff: 1 initial attempt + 3 retries
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Construct the full S3 key from an object key.
    fn full_key(&self, key: &str) -> Result<String> {
        let validated = validate_key(key)?;
        let key = validated.to_str().ok_or_raise(|| ErrorKind::InvalidKey(key.to_string()))?;
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        })
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn network_error(operation: &str, key: &str, err: impl std::error::Error + 'static) -> ErrorKind {
        ErrorKind::Network(format!("{operation} {key}: {}", DisplayErrorContext(err)))
    }

    fn missing_etag(operation: &str, key: &str) -> ErrorKind {
        ErrorKind::BackendError(format!("{operation} {key}: response has no ETag"))
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, reader: &mut BoxAsyncRead, part_size: u64) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        for part_number in 1..=MAX_PARTS {
            let mut buffer = Vec::new();
            (&mut *reader).take(part_size).read_to_end(&mut buffer).await.map_err(ErrorKind::Io)?;
            // S3 needs at least one part, even for an empty object.
            if buffer.is_empty() && part_number > 1 {
                return Ok(parts);
            }
            let last = (buffer.len() as u64) < part_size;
            let _permit = self.acquire_permit().await?;
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| Self::network_error("UploadPart", key, e))?;
            let e_tag = output.e_tag().ok_or_raise(|| Self::missing_etag("UploadPart", key))?;
            tracing::trace!(key, part_number, "uploaded part");
            parts.push(CompletedPart::builder().e_tag(e_tag).part_number(part_number).build());
            if last {
                return Ok(parts);
            }
        }
        exn::bail!(ErrorKind::BackendError(format!("{key}: more than {MAX_PARTS} parts")))
    }
}

/// An incomplete multipart upload. Aborted when dropped unless disarmed,
/// so an upload future dropped between create and complete does not leave
/// its parts behind in the bucket.
struct PendingUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl PendingUpload {
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn abort(mut self) {
        self.armed = false;
        self.abort_request().await;
    }

    fn abort_request(&self) -> impl Future<Output = ()> + Send + 'static {
        let request = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id);
        let key = self.key.clone();
        async move {
            match request.send().await {
                Ok(_) => tracing::debug!(key, "aborted multipart upload"),
                Err(err) => tracing::warn!(key, error = %DisplayErrorContext(err), "failed to abort multipart upload"),
            }
        }
    }
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(self.abort_request());
            },
            Err(_) => tracing::warn!(key = %self.key, upload_id = %self.upload_id, "multipart upload dropped outside a runtime, not aborted"),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<String> {
        let key = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| Self::network_error("PutObject", &key, e))?;
        let e_tag = output.e_tag().ok_or_raise(|| Self::missing_etag("PutObject", &key))?;
        Ok(e_tag.to_string())
    }

    async fn multipart_upload(&self, key: &str, mut reader: BoxAsyncRead, part_size: u64) -> Result<()> {
        if part_size == 0 {
            exn::bail!(ErrorKind::BackendError("multipart part size must be non-zero".to_string()));
        }
        let key = self.full_key(key)?;
        let created = {
            let _permit = self.acquire_permit().await?;
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| Self::network_error("CreateMultipartUpload", &key, e))?
        };
        let upload_id = created
            .upload_id()
            .ok_or_raise(|| ErrorKind::BackendError(format!("CreateMultipartUpload {key}: no upload ID")))?;
        let pending = PendingUpload {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.clone(),
            upload_id: upload_id.to_string(),
            armed: true,
        };

        let parts = match self.upload_parts(&key, upload_id, &mut reader, part_size).await {
            Ok(parts) => parts,
            Err(err) => {
                pending.abort().await;
                return Err(err);
            },
        };
        let completed = {
            let _permit = self.acquire_permit().await?;
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&key)
                .upload_id(upload_id)
                .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                .send()
                .await
        };
        match completed {
            Ok(_) => {
                pending.disarm();
                Ok(())
            },
            Err(err) => {
                pending.abort().await;
                exn::bail!(Self::network_error("CompleteMultipartUpload", &key, err))
            },
        }
    }

    async fn head_object(&self, key: &str) -> Result<String> {
        let key = self.full_key(key)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {
                exn::bail!(ErrorKind::NotFound(key));
            },
            Err(err) => exn::bail!(Self::network_error("HeadObject", &key, err)),
        };
        let e_tag = output.e_tag().ok_or_raise(|| Self::missing_etag("HeadObject", &key))?;
        Ok(e_tag.to_string())
    }
}
