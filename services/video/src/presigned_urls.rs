use crate::metadata_store::Video;
use crate::reference::{ObjectReference, ReferenceError};
use crate::s3_uploader::{ObjectStore, StorageError};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, instrument};

/// Lifetime used when the requested one is zero or negative (15 minutes)
pub const DEFAULT_URL_EXPIRY_SECS: i64 = 15 * 60;
/// S3 refuses presigned URLs valid for more than a week
pub const MAX_URL_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Records signed concurrently in a batch
const SIGN_CONCURRENCY: usize = 8;

/// Errors from producing a read URL for a record
#[derive(Debug, Error)]
pub enum SignError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A time-limited read URL
#[derive(Debug, Clone, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Substitute the default for non-positive requests and clamp to the maximum
pub fn effective_expiry(requested: chrono::Duration) -> chrono::Duration {
    if requested <= chrono::Duration::zero() {
        chrono::Duration::seconds(DEFAULT_URL_EXPIRY_SECS)
    } else if requested > chrono::Duration::seconds(MAX_URL_EXPIRY_SECS) {
        chrono::Duration::seconds(MAX_URL_EXPIRY_SECS)
    } else {
        requested
    }
}

/// Generate a presigned GET URL for one object.
///
/// Out-of-range lifetimes are adjusted, never rejected.
pub async fn generate_signed_url(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    requested: chrono::Duration,
) -> Result<SignedUrl, StorageError> {
    if bucket.is_empty() || key.is_empty() {
        return Err(StorageError::InvalidReference(
            "bucket and key are required".to_string(),
        ));
    }

    let expiry = effective_expiry(requested);
    let lifetime = expiry
        .to_std()
        .map_err(|e| StorageError::SigningFailed(e.to_string()))?;

    let issued_at = Utc::now();
    let url = store.presign_get(bucket, key, lifetime).await?;

    Ok(SignedUrl {
        url,
        expires_at: issued_at + expiry,
    })
}

/// Result of signing one record in a batch
#[derive(Debug)]
pub struct SignOutcome {
    /// The record, with `video_url` replaced by a signed URL, or cleared if
    /// signing failed
    pub video: Video,
    pub error: Option<SignError>,
}

/// Turns stored object references into signed URLs on the way out
///
/// Signing only changes the returned copy of a record; the persisted
/// reference is left alone.
#[derive(Clone)]
pub struct VideoSigner {
    store: Arc<dyn ObjectStore>,
    expiry: chrono::Duration,
}

impl VideoSigner {
    pub fn new(store: Arc<dyn ObjectStore>, expiry: chrono::Duration) -> Self {
        Self { store, expiry }
    }

    /// Sign with the default 15 minute lifetime
    pub fn with_default_expiry(store: Arc<dyn ObjectStore>) -> Self {
        Self::new(store, chrono::Duration::seconds(DEFAULT_URL_EXPIRY_SECS))
    }

    /// Replace the record's stored reference with a signed URL.
    ///
    /// Records without a reference come back unchanged.
    #[instrument(skip(self, video), fields(video_id = %video.id))]
    pub async fn sign(&self, mut video: Video) -> Result<Video, SignError> {
        let Some(encoded) = video.video_url.as_deref() else {
            return Ok(video);
        };
        let Some(reference) = ObjectReference::decode(encoded)? else {
            return Ok(video);
        };

        let signed = generate_signed_url(
            self.store.as_ref(),
            reference.bucket(),
            reference.key(),
            self.expiry,
        )
        .await?;

        metrics::counter!("video.urls.signed").increment(1);

        video.video_url = Some(signed.url);
        Ok(video)
    }

    /// Sign every record independently, preserving order.
    ///
    /// A failure affects only its own record.
    pub async fn sign_all(&self, videos: Vec<Video>) -> Vec<SignOutcome> {
        stream::iter(videos)
            .map(|video| async move {
                let fallback = video.clone();
                match self.sign(video).await {
                    Ok(video) => SignOutcome { video, error: None },
                    Err(e) => {
                        error!(error = %e, video_id = %fallback.id, "Failed to sign video URL");
                        metrics::counter!("video.urls.failed").increment(1);
                        SignOutcome {
                            video: Video {
                                video_url: None,
                                ..fallback
                            },
                            error: Some(e),
                        }
                    }
                }
            })
            .buffered(SIGN_CONCURRENCY)
            .collect()
            .await
    }
}
