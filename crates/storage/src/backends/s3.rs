//! S3-compatible storage backend using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_CHECK_KEY: &str = ".tracoor-health-check";

/// Resolves the AWS default credentials chain on the first signed request
/// instead of at construction time.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_init(|| async {
                aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                    .region(aws_config::Region::new(self.region.clone()))
                    .build()
                    .await
            })
            .await;

        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

/// S3-compatible object store.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
    endpoint: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// `force_path_style` selects `endpoint/bucket/key` URLs, which MinIO and
    /// most self-hosted S3 implementations need.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() != secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let region = region.unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()));

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "tracoor-config");
            builder = builder.credentials_provider(credentials);
        } else {
            builder = builder.credentials_provider(LazyDefaultCredentialsProvider::new(region));
        }

        // Bare host:port endpoints (e.g. "minio:9000") default to plain HTTP.
        let endpoint = endpoint.map(|url| {
            let lower = url.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                url
            } else {
                format!("http://{url}")
            }
        });
        if let Some(url) = &endpoint {
            builder = builder.endpoint_url(url);
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: prefix
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            endpoint,
        })
    }

    /// Object key with the configured prefix applied.
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            return StorageError::NotFound(key.to_string());
        }
        StorageError::S3(Box::new(err))
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if is_not_found(&err) => Ok(false),
            Err(err) => Err(StorageError::S3(Box::new(err))),
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, key))?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok(bytes)
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        // DeleteObject succeeds on missing keys, so check existence first to report NotFound.
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        // CopySource is "bucket/key" with the key percent-encoded.
        let encoded = utf8_percent_encode(&self.full_key(from), NON_ALPHANUMERIC).to_string();
        let copy_source = format!("{}/{}", self.bucket, encoded);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(self.full_key(to))
            .copy_source(copy_source)
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, from))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let marker = self.full_key(HEALTH_CHECK_KEY);

        let check = async {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&marker)
                .body(Bytes::from_static(b"health-check").into())
                .send()
                .await
                .map_err(|e| StorageError::S3(Box::new(e)))?;

            match self
                .client
                .delete_object()
                .bucket(&self.bucket)
                .key(&marker)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(err) if is_not_found(&err) => Ok(()),
                Err(err) => Err(StorageError::S3(Box::new(err))),
            }
        };

        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, check)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out after 10 seconds",
                ))
            })?
    }
}
