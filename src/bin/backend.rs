#![forbid(unsafe_code)]

//! HTTP front end for the download pipeline and its history.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, put},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use tubegrab::{
    config::{self, DEFAULT_CONFIG_PATH, Overrides},
    error::ServiceError,
    logging,
    service::{ClearedHistory, DEFAULT_RESOLUTION, DeletedVideo, VideoService, VideoView},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the tubegrab download API.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env config file")]
    config: PathBuf,
    #[arg(
        long = "storage-dir",
        value_name = "PATH",
        help = "Directory holding muxed videos"
    )]
    storage_dir: Option<PathBuf>,
    #[arg(long = "database", value_name = "PATH", help = "SQLite catalog path")]
    database: Option<PathBuf>,
    #[arg(long = "host", value_name = "ADDR", help = "Address to bind")]
    host: Option<String>,
    #[arg(long = "port", value_name = "PORT", help = "Port to bind")]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    service: Arc<VideoService>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::NotFound(_)
            | ServiceError::RenditionUnavailable { .. }
            | ServiceError::AudioUnavailable => StatusCode::NOT_FOUND,
            ServiceError::Provider(_) => StatusCode::BAD_GATEWAY,
            ServiceError::MuxFailure { .. }
            | ServiceError::Store(_)
            | ServiceError::Io(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        let message = match err {
            ServiceError::NotFound(message) => message,
            other => other.to_string(),
        };
        Self { status, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct VideoUrlQuery {
    video_url: String,
}

#[derive(Deserialize)]
struct DownloadQuery {
    video_url: String,
    #[serde(default = "default_resolution")]
    resolution: String,
}

fn default_resolution() -> String {
    DEFAULT_RESOLUTION.to_string()
}

#[derive(Deserialize)]
struct UploadQuery {
    video_title: String,
    video_res: String,
}

#[derive(Deserialize)]
struct TitleQuery {
    title: String,
}

#[derive(Deserialize)]
struct EditTitleQuery {
    title: String,
    new_title: String,
}

#[derive(Deserialize)]
struct ResolutionQuery {
    title: String,
    resolution: String,
}

#[derive(Serialize)]
struct Message {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let settings = config::load_settings(Overrides {
        config_path: Some(cli.config),
        storage_dir: cli.storage_dir,
        database_path: cli.database,
        host: cli.host,
        port: cli.port,
    })?;
    let service = VideoService::from_settings(&settings).context("initializing video service")?;
    info!(
        storage = %settings.storage_dir.display(),
        database = %settings.database_path.display(),
        "catalog ready"
    );

    let app = router(AppState {
        service: Arc::new(service),
    });

    let addr = SocketAddr::new(
        settings
            .host
            .parse()
            .with_context(|| format!("parsing bind address {}", settings.host))?,
        settings.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("server shut down");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/yt/video-info", get(video_info))
        .route("/api/yt/download_video", get(download_video))
        .route("/api/yt/upload", get(upload_video))
        .route("/api/history/videos", get(list_history))
        .route("/api/history/video", get(get_history_video))
        .route("/api/history/video/edit-title", put(edit_title))
        .route("/api/history/video/resolution", patch(delete_resolution))
        .route("/api/history/video/history", delete(clear_history))
        .route("/api/history/video/{id}", delete(delete_video))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {err}");
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoUrlQuery>,
) -> ApiResult<Json<VideoView>> {
    Ok(Json(state.service.get_video_info(&query.video_url).await?))
}

async fn download_video(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let path = state
        .service
        .download_video(&query.video_url, &query.resolution)
        .await?;
    stream_file(path).await
}

async fn upload_video(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
) -> ApiResult<Response> {
    let path = state
        .service
        .stored_file(&query.video_title, &query.video_res)
        .await?;
    stream_file(path).await
}

async fn list_history(State(state): State<AppState>) -> ApiResult<Json<Vec<VideoView>>> {
    Ok(Json(state.service.list_history().await?))
}

async fn get_history_video(
    State(state): State<AppState>,
    Query(query): Query<TitleQuery>,
) -> ApiResult<Json<VideoView>> {
    Ok(Json(state.service.get_history_video(&query.title).await?))
}

async fn edit_title(
    State(state): State<AppState>,
    Query(query): Query<EditTitleQuery>,
) -> ApiResult<Json<VideoView>> {
    Ok(Json(
        state
            .service
            .rename_video(&query.title, &query.new_title)
            .await?,
    ))
}

async fn delete_resolution(
    State(state): State<AppState>,
    Query(query): Query<ResolutionQuery>,
) -> ApiResult<Json<Message>> {
    state
        .service
        .delete_rendition(&query.title, &query.resolution)
        .await?;
    Ok(Json(Message {
        message: format!("resolution {} removed", query.resolution),
    }))
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<DeletedVideo>> {
    Ok(Json(state.service.delete_video(id).await?))
}

async fn clear_history(State(state): State<AppState>) -> ApiResult<Json<ClearedHistory>> {
    Ok(Json(state.service.clear_history().await?))
}

/// Streams `path` as an attachment named after the file.
async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path).await.map_err(|_| ApiError {
        status: StatusCode::NOT_FOUND,
        message: "file not found".to_string(),
    })?;
    let length = file.metadata().await.ok().map(|meta| meta.len());

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    if let Some(name) = path.file_name().and_then(|name| name.to_str())
        && let Ok(value) =
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", name.replace('"', "")))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
