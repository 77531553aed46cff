//! Tubely Video Service
//!
//! Accepts video uploads for existing video records, prepares them for
//! streaming playback, stores them in S3 and hands out short-lived signed
//! URLs for reading them back.
//!
//! ## Features
//!
//! - **Orientation-aware storage**: the first video stream's dimensions decide
//!   whether an upload lands under `landscape/`, `portrait/` or `other/`
//! - **Fast-start remuxing**: the `moov` atom is moved to the front with a
//!   lossless ffmpeg stream copy so playback can start before download ends
//! - **Opaque object keys**: 128 random bits per upload, hex encoded
//! - **Signed playback URLs**: stored records keep only `bucket,key`; URLs
//!   are presigned on every read
//!
//! ## Architecture
//!
//! ```text
//!   multipart upload
//!         │
//!         ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ ffprobe      │──▶│ Orientation  │──▶│ ffmpeg       │──▶│ S3 put       │
//! │ inspect      │   │ classify     │   │ faststart    │   │ <o>/<hex>.mp4│
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//!                                                                 │
//!                                                                 ▼
//! ┌──────────────┐          ┌──────────────┐               ┌──────────────┐
//! │ API response │◀─────────│ Presigner    │◀──────────────│ PostgreSQL   │
//! │ signed URL   │          │ (≤ 7 days)   │  "bucket,key" │ videos       │
//! └──────────────┘          └──────────────┘               └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod metadata_store;
pub mod orientation;
pub mod pipeline;
pub mod presigned_urls;
pub mod probe;
pub mod process;
pub mod reference;
pub mod remux;
pub mod s3_uploader;
pub mod thumbnails;

pub use config::Config;
pub use orientation::{classify, Orientation};
pub use pipeline::{IngestError, IngestPipeline, UploadedFile};
pub use presigned_urls::{generate_signed_url, VideoSigner};
pub use reference::ObjectReference;
