//! Video ingestion pipeline.
//!
//! ```text
//! upload ─▶ inspect ─▶ classify ─▶ remux (faststart) ─▶ key ─▶ S3 put ─▶ record.video_url
//! ```
//!
//! Stages run in order inside one request and the first failure aborts the
//! rest. Nothing is retried. Both local files (the spooled upload and the
//! remuxed copy) are removed when their guards drop, whatever the outcome.

use crate::metadata_store::{Video, VideoStore};
use crate::probe::{MediaInspector, ProbeError};
use crate::reference::{validate_bucket, ObjectReference, ReferenceError};
use crate::remux::{RemuxError, Remuxer};
use crate::s3_uploader::{generate_object_key, ObjectStore, StorageError};
use futures::{Stream, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{info, instrument, warn};

/// Errors that abort an ingestion
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Remux(#[from] RemuxError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("failed to read upload body: {0}")]
    UploadBody(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to persist video: {0}")]
    Persist(anyhow::Error),
}

/// A client upload spooled to a private temp file, deleted on drop
#[derive(Debug)]
pub struct UploadedFile {
    path: TempPath,
    content_type: String,
    size: u64,
}

impl UploadedFile {
    /// Write `chunks` into a fresh temp file under `temp_dir` (or the system
    /// temp dir).
    pub async fn spool<S, B, E>(
        temp_dir: Option<&Path>,
        content_type: impl Into<String>,
        chunks: S,
    ) -> Result<Self, IngestError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tubely-upload-").suffix(".mp4");
        let named = match temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let (file, path) = named.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut chunks = std::pin::pin!(chunks);
        let mut size = 0u64;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| IngestError::UploadBody(e.to_string()))?;
            let chunk = chunk.as_ref();
            file.write_all(chunk).await?;
            size += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(Self {
            path,
            content_type: content_type.into(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Runs uploads through inspection, remuxing and storage
pub struct IngestPipeline {
    inspector: Arc<dyn MediaInspector>,
    remuxer: Arc<dyn Remuxer>,
    objects: Arc<dyn ObjectStore>,
    videos: Arc<dyn VideoStore>,
    bucket: String,
}

impl IngestPipeline {
    pub fn new(
        inspector: Arc<dyn MediaInspector>,
        remuxer: Arc<dyn Remuxer>,
        objects: Arc<dyn ObjectStore>,
        videos: Arc<dyn VideoStore>,
        bucket: impl Into<String>,
    ) -> Result<Self, ReferenceError> {
        let bucket = bucket.into();
        validate_bucket(&bucket)?;

        Ok(Self {
            inspector,
            remuxer,
            objects,
            videos,
            bucket,
        })
    }

    /// Store `upload` as the video for `video` and persist the new reference.
    ///
    /// The record's `video_url` is overwritten only after the object is in
    /// the bucket; on any failure the stored record is left untouched.
    #[instrument(skip(self, video, upload), fields(video_id = %video.id, size_bytes = upload.size()))]
    pub async fn process(&self, mut video: Video, upload: &UploadedFile) -> Result<Video, IngestError> {
        let started = Instant::now();

        let reference = match self.store_and_persist(&mut video, upload).await {
            Ok(reference) => reference,
            Err(e) => {
                warn!(error = %e, "Video ingestion failed");
                metrics::counter!("video.uploads.failed").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("video.uploads.completed").increment(1);
        metrics::histogram!("video.uploads.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(reference = %reference, "Video stored");

        Ok(video)
    }

    async fn store_and_persist(
        &self,
        video: &mut Video,
        upload: &UploadedFile,
    ) -> Result<ObjectReference, IngestError> {
        let reference = self.ingest(upload).await?;

        video.video_url = Some(reference.encode());
        self.videos
            .update_video(video)
            .await
            .map_err(IngestError::Persist)?;

        Ok(reference)
    }

    /// Inspect, remux and upload one file, returning where it was stored
    pub async fn ingest(&self, upload: &UploadedFile) -> Result<ObjectReference, IngestError> {
        let geometry = self.inspector.inspect(upload.path()).await?;
        let orientation = geometry.orientation();

        info!(
            width = geometry.width,
            height = geometry.height,
            orientation = %orientation,
            "Classified upload"
        );

        // Deleted when this function returns.
        let remuxed = self.remuxer.remux(upload.path()).await?;

        let key = generate_object_key(orientation)?;
        let reference = ObjectReference::new(self.bucket.as_str(), key)?;

        let mut body = tokio::fs::File::open(&remuxed).await?;
        body.rewind().await?;

        self.objects
            .upload(
                reference.bucket(),
                reference.key(),
                body,
                upload.content_type(),
            )
            .await?;

        Ok(reference)
    }
}
