use crate::config::S3Config;
use crate::orientation::Orientation;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Random bytes in an object key (32 hex characters)
pub const KEY_RANDOM_BYTES: usize = 16;

/// Errors from object storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to generate random key: {0}")]
    KeyGenerationFailed(String),

    #[error("upload to S3 failed: {0}")]
    UploadFailed(String),

    #[error("invalid object reference: {0}")]
    InvalidReference(String),

    #[error("presign get object failed: {0}")]
    SigningFailed(String),
}

/// Object storage operations used by the video pipeline
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` to `bucket/key`. The caller positions `body` at offset 0.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Presigned GET URL valid for `expires_in`
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError>;
}

/// Generate an object key namespaced by orientation.
/// Format: {orientation}/{32 lowercase hex}.mp4
///
/// The orientation prefix allows per-orientation lifecycle rules; uniqueness
/// comes only from the 128 random bits.
pub fn generate_object_key(orientation: Orientation) -> Result<String, StorageError> {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| StorageError::KeyGenerationFailed(e.to_string()))?;

    Ok(format!("{}/{}.mp4", orientation, hex::encode(bytes)))
}

/// S3-backed [`ObjectStore`]
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                    .read_timeout(Duration::from_secs(config.read_timeout_secs))
                    .operation_timeout(Duration::from_secs(config.operation_timeout_secs))
                    .build(),
            )
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body))]
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let body = ByteStream::read_from()
            .file(body)
            .build()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        debug!(size_bytes = body.size_hint().0, "Uploading object to S3");

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(DisplayErrorContext(e).to_string()))?;

        info!("Object uploaded successfully");

        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, StorageError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::SigningFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| StorageError::SigningFailed(DisplayErrorContext(e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, Region};

    /// Client with static credentials; presigning needs no network
    pub(crate) fn offline_store() -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new(
                "AKIDEXAMPLE",
                "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
                None,
                None,
                "test",
            ))
            .build();

        S3ObjectStore::from_client(S3Client::from_conf(config))
    }

    pub(crate) fn assert_key_shape(key: &str, orientation: Orientation) {
        let prefix = format!("{}/", orientation);
        let hex_part = key
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".mp4"))
            .unwrap_or_else(|| panic!("unexpected key shape: {key}"));

        assert_eq!(hex_part.len(), KEY_RANDOM_BYTES * 2);
        assert!(hex_part
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_generate_object_key_format() {
        for orientation in [
            Orientation::Landscape,
            Orientation::Portrait,
            Orientation::Other,
        ] {
            let key = generate_object_key(orientation).unwrap();
            assert_key_shape(&key, orientation);
        }
    }

    #[test]
    fn test_generate_object_key_unique() {
        let a = generate_object_key(Orientation::Landscape).unwrap();
        let b = generate_object_key(Orientation::Landscape).unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_presign_get_offline() {
        let store = offline_store();
        let url = store
            .presign_get(
                "tubely-videos",
                "landscape/0123456789abcdef0123456789abcdef.mp4",
                Duration::from_secs(900),
            )
            .await
            .unwrap();

        assert!(url.starts_with("https://"));
        assert!(url.contains("landscape/0123456789abcdef0123456789abcdef.mp4"));
        assert!(url.contains("X-Amz-Expires=900"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presign_rejects_lifetime_over_a_week() {
        let store = offline_store();
        let err = store
            .presign_get(
                "tubely-videos",
                "other/key.mp4",
                Duration::from_secs(8 * 24 * 60 * 60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SigningFailed(_)));
    }
}
