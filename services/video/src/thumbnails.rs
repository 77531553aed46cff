//! In-memory thumbnail cache.
//!
//! Thumbnails are small and served straight from process memory; they do not
//! survive a restart.

use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Thumbnail image bytes and their media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub media_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct ThumbnailCache {
    entries: RwLock<HashMap<Uuid, Thumbnail>>,
}

impl ThumbnailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a thumbnail, replacing any previous one for the video
    pub fn insert(&self, video_id: Uuid, thumbnail: Thumbnail) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(video_id, thumbnail);
    }

    pub fn get(&self, video_id: Uuid) -> Option<Thumbnail> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&video_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
