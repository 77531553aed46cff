use crate::auth::AuthUser;
use crate::config::{ApiConfig, Config};
use crate::metadata_store::{Video, VideoStore};
use crate::pipeline::{IngestError, IngestPipeline, UploadedFile};
use crate::presigned_urls::{SignError, VideoSigner};
use crate::probe::ProbeError;
use crate::reference::ReferenceError;
use crate::thumbnails::{Thumbnail, ThumbnailCache};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mime_guess::mime::{self, Mime};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const VIDEO_FIELD: &str = "video";
const THUMBNAIL_FIELD: &str = "thumbnail";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub videos: Arc<dyn VideoStore>,
    pub pipeline: Arc<IngestPipeline>,
    pub signer: VideoSigner,
    pub thumbnails: Arc<ThumbnailCache>,
}

/// Video with a failed signing attempt reported inline
#[derive(Debug, Serialize)]
pub struct VideoWithUrl {
    #[serde(flatten)]
    pub video: Video,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/:video_id", get(get_video))
        .route(
            "/api/videos/:video_id/upload",
            post(upload_video).layer(DefaultBodyLimit::max(config.max_video_bytes)),
        )
        .route(
            "/api/thumbnail_upload/:video_id",
            post(upload_thumbnail).layer(DefaultBodyLimit::max(config.max_thumbnail_bytes)),
        )
        .route("/api/thumbnails/:video_id", get(get_thumbnail))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "video-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.videos.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Load a video and check the caller owns it
async fn owned_video(state: &AppState, user: AuthUser, video_id: Uuid) -> Result<Video, ApiError> {
    let video = state
        .videos
        .get_video(video_id)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to get video");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "QUERY_ERROR",
                "Failed to get video",
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Video not found"))?;

    if video.user_id != user.user_id {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "Not the owner of this video",
        ));
    }

    Ok(video)
}

fn sign_error_response(err: &SignError) -> ApiError {
    match err {
        SignError::Reference(ReferenceError::MalformedReference { .. }) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "MALFORMED_REFERENCE",
            "Stored video reference is malformed",
        ),
        _ => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SIGNING_ERROR",
            "Failed to generate video URL",
        ),
    }
}

fn ingest_error_response(err: &IngestError) -> ApiError {
    match err {
        IngestError::Probe(ProbeError::NoVideoStream) => {
            api_error(StatusCode::BAD_REQUEST, "NO_VIDEO_STREAM", err.to_string())
        }
        IngestError::UploadBody(_) => {
            api_error(StatusCode::BAD_REQUEST, "INVALID_BODY", err.to_string())
        }
        IngestError::Probe(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "PROBE_ERROR",
            "Failed to inspect video",
        ),
        IngestError::Remux(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "REMUX_ERROR",
            "Failed to process video",
        ),
        IngestError::Storage(_) | IngestError::Reference(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "UPLOAD_ERROR",
            "Failed to store video",
        ),
        IngestError::Io(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "IO_ERROR",
            "Failed to buffer upload",
        ),
        IngestError::Persist(_) => api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            "Failed to update video",
        ),
    }
}

/// Accept only `video/mp4`, parameters allowed
fn video_content_type(content_type: Option<&str>) -> Result<String, ApiError> {
    let invalid = || {
        api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_MEDIA_TYPE",
            "Video must be video/mp4",
        )
    };

    let parsed: Mime = content_type
        .ok_or_else(invalid)?
        .parse()
        .map_err(|_| invalid())?;

    if parsed.essence_str() != "video/mp4" {
        return Err(invalid());
    }

    Ok(parsed.essence_str().to_string())
}

/// Media type of an uploaded thumbnail, guessed from the file name when the
/// part has no content type. Only images are accepted.
fn thumbnail_media_type(content_type: Option<&str>, file_name: Option<&str>) -> Option<String> {
    let parsed: Mime = match content_type {
        Some(value) => value.parse().ok()?,
        None => mime_guess::from_path(file_name?).first()?,
    };

    (parsed.type_() == mime::IMAGE).then(|| parsed.essence_str().to_string())
}

fn thumbnail_url(public_base_url: &str, video_id: Uuid) -> String {
    format!(
        "{}/api/thumbnails/{}",
        public_base_url.trim_end_matches('/'),
        video_id
    )
}

/// List the caller's videos with playable URLs
#[instrument(skip(state))]
async fn list_videos(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<VideoWithUrl>>, ApiError> {
    let videos = state.videos.list_videos(user.user_id).await.map_err(|e| {
        error!(error = %e, "Failed to list videos");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "QUERY_ERROR",
            "Failed to list videos",
        )
    })?;

    let results = state
        .signer
        .sign_all(videos)
        .await
        .into_iter()
        .map(|outcome| VideoWithUrl {
            video: outcome.video,
            error: outcome.error.map(|e| e.to_string()),
        })
        .collect();

    Ok(Json(results))
}

/// Get one video with a playable URL
#[instrument(skip(state))]
async fn get_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<Uuid>,
) -> Result<Json<Video>, ApiError> {
    let video = owned_video(&state, user, video_id).await?;

    let signed = state.signer.sign(video).await.map_err(|e| {
        error!(error = %e, "Failed to sign video URL");
        sign_error_response(&e)
    })?;

    Ok(Json(signed))
}

/// Spool the `video` part of the form to a temp file
async fn read_video_field(
    multipart: &mut Multipart,
    state: &AppState,
) -> Result<UploadedFile, ApiError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        api_error(StatusCode::BAD_REQUEST, "INVALID_FORM", e.body_text())
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let content_type = video_content_type(field.content_type())?;
        let temp_dir = state.config.media.temp_dir.as_deref();

        return UploadedFile::spool(temp_dir, content_type, field)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to spool upload");
                ingest_error_response(&e)
            });
    }

    Err(api_error(
        StatusCode::BAD_REQUEST,
        "MISSING_FILE",
        "Form field 'video' is required",
    ))
}

/// Upload the video file for an existing record
#[instrument(skip(state, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Video>, ApiError> {
    let video = owned_video(&state, user, video_id).await?;
    let upload = read_video_field(&mut multipart, &state).await?;

    info!(size_bytes = upload.size(), "Received video upload");

    let stored = state
        .pipeline
        .process(video, &upload)
        .await
        .map_err(|e| {
            error!(error = %e, "Video upload failed");
            ingest_error_response(&e)
        })?;

    let signed = state.signer.sign(stored).await.map_err(|e| {
        error!(error = %e, "Failed to sign video URL");
        sign_error_response(&e)
    })?;

    Ok(Json(signed))
}

/// Upload a thumbnail image for an existing record
#[instrument(skip(state, multipart))]
async fn upload_thumbnail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(video_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Video>, ApiError> {
    let mut video = owned_video(&state, user, video_id).await?;
    let max_bytes = state.config.api.max_thumbnail_bytes;

    let mut thumbnail = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_FORM", e.body_text()))?
    {
        if field.name() != Some(THUMBNAIL_FIELD) {
            continue;
        }

        let media_type = thumbnail_media_type(field.content_type(), field.file_name())
            .ok_or_else(|| {
                api_error(
                    StatusCode::BAD_REQUEST,
                    "INVALID_MEDIA_TYPE",
                    "Thumbnail must be an image",
                )
            })?;
        let data = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, "INVALID_FORM", e.body_text()))?;

        if data.len() > max_bytes {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "TOO_LARGE",
                format!("Thumbnail exceeds {max_bytes} bytes"),
            ));
        }

        thumbnail = Some(Thumbnail {
            media_type,
            data: data.to_vec(),
        });
        break;
    }

    let thumbnail = thumbnail.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "MISSING_FILE",
            "Form field 'thumbnail' is required",
        )
    })?;

    state.thumbnails.insert(video_id, thumbnail);
    video.thumbnail_url = Some(thumbnail_url(&state.config.api.public_base_url, video_id));

    state.videos.update_video(&video).await.map_err(|e| {
        error!(error = %e, "Failed to update video");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "DATABASE_ERROR",
            "Failed to update video",
        )
    })?;

    let signed = state.signer.sign(video).await.map_err(|e| {
        error!(error = %e, "Failed to sign video URL");
        sign_error_response(&e)
    })?;

    Ok(Json(signed))
}

/// Serve a cached thumbnail
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(video_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let thumbnail = state.thumbnails.get(video_id).ok_or_else(|| {
        api_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Thumbnail not found")
    })?;

    Ok(([(header::CONTENT_TYPE, thumbnail.media_type)], thumbnail.data).into_response())
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting video API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
