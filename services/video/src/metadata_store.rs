use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored video record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Video {
    /// Unique video ID
    pub id: Uuid,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    /// Link served by the thumbnail endpoint
    pub thumbnail_url: Option<String>,
    /// Encoded object reference (`bucket,key`) while stored; a signed URL in
    /// API responses
    pub video_url: Option<String>,
    /// Owner
    pub user_id: Uuid,
}

/// Video record persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, video_id: Uuid) -> Result<Option<Video>>;

    /// Overwrite the mutable fields of an existing record
    async fn update_video(&self, video: &Video) -> Result<()>;

    /// All videos owned by `user_id`, newest first
    async fn list_videos(&self, user_id: Uuid) -> Result<Vec<Video>>;

    /// Cheap round trip used by the readiness probe
    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed [`VideoStore`]
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, video_id: Uuid) -> Result<Option<Video>> {
        let video = sqlx::query_as::<_, Video>(
            r#"
            SELECT id, created_at, updated_at, title, description,
                   thumbnail_url, video_url, user_id
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query video")?;

        Ok(video)
    }

    #[instrument(skip(self, video), fields(video_id = %video.id))]
    async fn update_video(&self, video: &Video) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET title = $2,
                description = $3,
                thumbnail_url = $4,
                video_url = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.video_url)
        .execute(&self.pool)
        .await
        .context("Failed to update video")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("video {} not found", video.id);
        }

        debug!("Video record updated");
        Ok(())
    }

    async fn list_videos(&self, user_id: Uuid) -> Result<Vec<Video>> {
        let videos = sqlx::query_as::<_, Video>(
            r#"
            SELECT id, created_at, updated_at, title, description,
                   thumbnail_url, video_url, user_id
            FROM videos
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list videos")?;

        Ok(videos)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_video(user_id: Uuid, video_url: Option<&str>) -> Video {
        let now = Utc::now();
        Video {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: "Boots".to_string(),
            description: "Unboxing".to_string(),
            thumbnail_url: None,
            video_url: video_url.map(str::to_string),
            user_id,
        }
    }

    #[test]
    fn test_video_serializes_null_url() {
        let video = sample_video(Uuid::new_v4(), None);
        let json = serde_json::to_value(&video).unwrap();
        assert!(json["video_url"].is_null());
        assert_eq!(json["title"], "Boots");
    }
}
