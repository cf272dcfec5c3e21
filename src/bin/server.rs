#![forbid(unsafe_code)]

//! HTTP front end for tubegrab.
//!
//! Every `/api/*` handler answers HTTP 200 with a `success` flag so the
//! browser client only has one shape to check. Only unknown API routes and
//! missing static files produce a 404.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderValue, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use tubegrab::{
    config::{RuntimeOverrides, RuntimeSettings, resolve_runtime_settings},
    downloads::{DownloadManager, ServeError, StartError},
    extractor::{ExtractError, build_extractor},
    fetch::Fetcher,
    formats::{FormatListing, list_formats},
    jobs::{JobRecord, JobStore, MemoryJobStore, SqliteJobStore},
    logging,
    naming::extract_video_id,
    security::{ensure_not_root, is_plain_file_name},
};

const DESCRIPTION_PREVIEW_CHARS: usize = 500;

/// Command line flags. Anything omitted falls back to the environment, then
/// the `.env` file, then built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "tubegrab-server", version, about = "Video download proxy")]
struct ServerArgs {
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    download_dir: Option<PathBuf>,
    #[arg(long)]
    www_root: Option<PathBuf>,
    #[arg(long)]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> RuntimeOverrides {
        RuntimeOverrides {
            host: self.host,
            port: self.port,
            download_dir: self.download_dir,
            www_root: self.www_root,
            env_path: self.env_file,
        }
    }
}

#[derive(Clone)]
struct AppState {
    downloads: DownloadManager,
    www_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Domain failure reported inside the normal 200 envelope.
    fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        warn!(error = %format!("{err:#}"), "request failed");
        Self::failure(format!("Internal error: {err}"))
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        Self::failure(err.to_string())
    }
}

impl From<StartError> for ApiError {
    fn from(err: StartError) -> Self {
        match err {
            StartError::Store(err) => Self::internal(err),
            other => Self::failure(other.to_string()),
        }
    }
}

impl From<ServeError> for ApiError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::Store(err) => Self::internal(err),
            other => Self::failure(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    logging::init();
    ensure_not_root("tubegrab-server")?;

    let settings = resolve_runtime_settings(args.into_overrides())?;
    tokio::fs::create_dir_all(&settings.download_dir)
        .await
        .with_context(|| format!("creating download dir {}", settings.download_dir.display()))?;

    let store = open_job_store(&settings).await?;
    let fetcher = Fetcher::from_settings(&settings);
    let extractor = build_extractor(&settings, &fetcher);
    info!(
        backends = extractor.name(),
        download_dir = %settings.download_dir.display(),
        max_concurrent = settings.max_concurrent,
        max_queued = settings.max_queued,
        "download manager ready"
    );

    let state = AppState {
        downloads: DownloadManager::new(store, extractor, fetcher, &settings),
        www_root: Arc::new(settings.www_root.clone()),
    };

    let host: IpAddr = settings
        .host
        .parse()
        .with_context(|| format!("expected an IP address for HOST, got {}", settings.host))?;
    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn open_job_store(settings: &RuntimeSettings) -> Result<Arc<dyn JobStore>> {
    match &settings.job_db {
        Some(path) => {
            info!(path = %path.display(), "using sqlite job store");
            Ok(Arc::new(SqliteJobStore::open(path).await?))
        }
        None => Ok(Arc::new(MemoryJobStore::new())),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/video_info", post(video_info))
        .route("/api/start_download", post(start_download))
        .route("/api/progress/{id}", get(progress))
        .route("/api/download/{id}", get(download_file))
        .route("/api/cancel_download/{id}", post(cancel_download))
        .route("/api/status", get(status))
        .route("/api/tips", get(tips))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
    info!("shutting down");
}

#[derive(Deserialize)]
struct VideoInfoRequest {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct VideoInfoResponse {
    success: bool,
    title: String,
    duration: u64,
    thumbnail: Option<String>,
    description: String,
    video_id: Option<String>,
    view_count: Option<u64>,
    formats: FormatListing,
    method: String,
    message: String,
}

fn description_preview(description: Option<&str>) -> String {
    match description.map(str::trim).filter(|text| !text.is_empty()) {
        None => "No description".to_string(),
        Some(text) if text.chars().count() > DESCRIPTION_PREVIEW_CHARS => {
            let preview: String = text.chars().take(DESCRIPTION_PREVIEW_CHARS).collect();
            format!("{preview}...")
        }
        Some(text) => text.to_string(),
    }
}

async fn video_info(
    State(state): State<AppState>,
    Json(payload): Json<VideoInfoRequest>,
) -> ApiResult<Json<VideoInfoResponse>> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::failure("A video URL is required"));
    }
    let video_id = extract_video_id(url).ok_or(ExtractError::InvalidUrl)?;

    let info = state.downloads.extractor().resolve(url).await.map_err(|err| {
        warn!(url, error = %err, "video info lookup failed");
        ApiError::from(err)
    })?;

    Ok(Json(VideoInfoResponse {
        success: true,
        formats: list_formats(&info),
        description: description_preview(info.description.as_deref()),
        duration: info.duration.unwrap_or(0),
        video_id: info.video_id.clone().or(Some(video_id)),
        title: info.title,
        thumbnail: info.thumbnail,
        view_count: info.view_count,
        method: info.backend,
        message: "Video information retrieved".to_string(),
    }))
}

#[derive(Deserialize)]
struct StartDownloadRequest {
    #[serde(default)]
    url: String,
    format_id: Option<String>,
}

#[derive(Serialize)]
struct StartDownloadResponse {
    success: bool,
    download_id: String,
    message: String,
    format_type: &'static str,
}

async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<StartDownloadRequest>,
) -> ApiResult<Json<StartDownloadResponse>> {
    let format_id = payload.format_id.as_deref().unwrap_or("best");
    let started = state.downloads.start(&payload.url, format_id).await?;
    Ok(Json(StartDownloadResponse {
        success: true,
        download_id: started.job_id,
        message: "Download started".to_string(),
        format_type: started.format_type.as_str(),
    }))
}

async fn progress(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<JobRecord>> {
    let record = state
        .downloads
        .progress(&id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(record))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let ready = state.downloads.prepare_file(&id).await?;
    let response = attachment_response(&ready.path, &ready.filename, ready.size).await?;
    state
        .downloads
        .finish_serving(&id)
        .await
        .map_err(ApiError::internal)?;
    info!(job_id = %id, filename = %ready.filename, "serving download");
    Ok(response)
}

/// Streams `path` as a download with the given file name.
async fn attachment_response(path: &Path, filename: &str, size: u64) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| ApiError::from(ServeError::Missing))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();

    let headers = response.headers_mut();
    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    let disposition = format!("attachment; filename=\"{}\"", ascii_filename(filename));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    Ok(response)
}

/// Header-safe copy of a file name; anything outside printable ASCII becomes `_`.
fn ascii_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn cancel_download(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .downloads
        .cancel(&id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "success": true,
        "message": "Download cancelled",
    })))
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.downloads.stats();
    let tracked_jobs = state
        .downloads
        .store()
        .len()
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "status": "active",
        "message": "Service is running",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": state.downloads.extractor().name(),
        "active_downloads": stats.active,
        "queued_downloads": stats.queued,
        "max_concurrent": stats.max_concurrent,
        "max_queued": stats.max_queued,
        "tracked_jobs": tracked_jobs,
    })))
}

const TIPS: &[&str] = &[
    "Paste a full YouTube link (watch, youtu.be, shorts or embed) and press Get info.",
    "Pick \"Best video quality\" for a single file with picture and sound.",
    "Choose \"Best audio quality\" to save only the soundtrack.",
    "High resolutions are often video only; pick an entry marked \"with audio\" if you need sound.",
    "If the service reports too many requests, wait a few minutes before trying again.",
    "Each finished download can be fetched once; start it again if you need another copy.",
];

async fn tips() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "tips": TIPS,
    }))
}

const INDEX_PAGE: &str = "index.html";

/// Serves the bundled web client. Extension-less paths are client routes and
/// get the index page.
async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    let served = match web_asset(&state.www_root, path).await {
        Some(target) => static_file(&target).await,
        None => Err(ApiError::not_found("file not found")),
    };
    served.unwrap_or_else(IntoResponse::into_response)
}

/// Picks the file under `root` that answers `request_path`.
async fn web_asset(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = web_relative_path(request_path)?;
    let target = root.join(&relative);
    let is_file = tokio::fs::metadata(&target)
        .await
        .is_ok_and(|meta| meta.is_file());
    if is_file {
        Some(target)
    } else if relative.extension().is_none() {
        Some(root.join(INDEX_PAGE))
    } else {
        None
    }
}

/// Request path as a relative path. Each segment must be a plain name that is
/// not hidden.
fn web_relative_path(request_path: &str) -> Option<PathBuf> {
    request_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            (is_plain_file_name(segment) && !segment.starts_with('.')).then_some(segment)
        })
        .collect()
}

async fn static_file(path: &Path) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    if let Some(mime) = MimeGuess::from_path(path).first()
        && let Ok(value) = HeaderValue::from_str(mime.as_ref())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};
    use tubegrab::{
        extractor::{Extractor, StreamDescriptor, StreamKind, VideoInfo},
        jobs::JobStatus,
    };

    struct FakeExtractor {
        answer: Result<VideoInfo, ExtractError>,
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        fn name(&self) -> &str {
            "fake"
        }

        async fn resolve(&self, _url: &str) -> Result<VideoInfo, ExtractError> {
            self.answer.clone()
        }
    }

    struct TestContext {
        _temp: TempDir,
        state: AppState,
        download_dir: PathBuf,
        www_root: PathBuf,
    }

    impl TestContext {
        fn new(answer: Result<VideoInfo, ExtractError>) -> Self {
            let temp = tempdir().unwrap();
            let download_dir = temp.path().join("downloads");
            let www_root = temp.path().join("www");
            std::fs::create_dir_all(&download_dir).unwrap();
            std::fs::create_dir_all(&www_root).unwrap();

            let settings = RuntimeSettings {
                www_root: www_root.clone(),
                max_concurrent: 1,
                max_queued: 1,
                ..RuntimeSettings::with_download_dir(download_dir.clone())
            };
            let downloads = DownloadManager::new(
                Arc::new(MemoryJobStore::new()),
                Arc::new(FakeExtractor { answer }),
                Fetcher::from_settings(&settings),
                &settings,
            );
            Self {
                _temp: temp,
                state: AppState {
                    downloads,
                    www_root: Arc::new(www_root.clone()),
                },
                download_dir,
                www_root,
            }
        }
    }

    fn sample_info(streams: Vec<StreamDescriptor>) -> VideoInfo {
        VideoInfo {
            video_id: Some("dQw4w9WgXcQ".into()),
            title: "Test Clip".into(),
            duration: Some(61),
            thumbnail: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/maxresdefault.jpg".into()),
            description: Some("x".repeat(600)),
            view_count: Some(12),
            streams,
            backend: "fake".into(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn progress_json(ctx: &TestContext, id: &str) -> Value {
        let response = progress(State(ctx.state.clone()), AxumPath(id.to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    async fn download_json(ctx: &TestContext, id: &str) -> (StatusCode, Value) {
        let response = download_file(State(ctx.state.clone()), AxumPath(id.to_string()))
            .await
            .into_response();
        let status = response.status();
        (status, body_json(response).await)
    }

    #[tokio::test]
    async fn progress_defaults_to_unknown() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        let body = progress_json(&ctx, "never-issued").await;
        assert_eq!(body, json!({"status": "unknown", "progress": 0}));
    }

    #[tokio::test]
    async fn video_info_returns_listing_and_truncated_description() {
        let mut muxed = StreamDescriptor::new("18", StreamKind::Muxed, "mp4", "https://cdn/18");
        muxed.height = Some(360);
        let ctx = TestContext::new(Ok(sample_info(vec![muxed])));

        let response = video_info(
            State(ctx.state.clone()),
            Json(VideoInfoRequest {
                url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;

        assert_eq!(body["success"], true);
        assert_eq!(body["title"], "Test Clip");
        assert_eq!(body["duration"], 61);
        assert_eq!(body["method"], "fake");
        assert_eq!(body["video_id"], "dQw4w9WgXcQ");
        let description = body["description"].as_str().unwrap();
        assert_eq!(description.chars().count(), DESCRIPTION_PREVIEW_CHARS + 3);
        assert!(description.ends_with("..."));
        assert_eq!(body["formats"]["video"][0]["id"], "18");
        assert_eq!(body["formats"]["video"][0]["has_audio"], true);
        assert_eq!(body["formats"]["predefined"][0]["id"], "best");
    }

    #[tokio::test]
    async fn video_info_failures_use_success_envelope() {
        let ctx = TestContext::new(Err(ExtractError::AgeRestricted));

        let response = video_info(
            State(ctx.state.clone()),
            Json(VideoInfoRequest {
                url: "https://vimeo.com/42".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body, json!({"success": false, "error": "Not a valid YouTube URL"}));

        let response = video_info(
            State(ctx.state.clone()),
            Json(VideoInfoRequest {
                url: "https://youtu.be/dQw4w9WgXcQ".into(),
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(
            body["error"],
            "The video is age restricted and cannot be downloaded"
        );
    }

    #[tokio::test]
    async fn start_download_requires_url_and_reports_format_type() {
        let ctx = TestContext::new(Err(ExtractError::Unavailable));

        let response = start_download(
            State(ctx.state.clone()),
            Json(StartDownloadRequest {
                url: String::new(),
                format_id: None,
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body, json!({"success": false, "error": "A video URL is required"}));

        let response = start_download(
            State(ctx.state.clone()),
            Json(StartDownloadRequest {
                url: "https://youtu.be/dQw4w9WgXcQ".into(),
                format_id: Some("audio_best".into()),
            }),
        )
        .await
        .into_response();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["format_type"], "audio");
        assert!(body["download_id"].as_str().unwrap().starts_with("dl_"));
    }

    #[tokio::test]
    async fn download_before_completion_is_a_failure() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        ctx.state.downloads.store().create("dl_pending").await.unwrap();

        let (status, body) = download_json(&ctx, "dl_pending").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": false, "error": "Download not completed"}));

        let (_, body) = download_json(&ctx, "dl_never").await;
        assert_eq!(body, json!({"success": false, "error": "Download not found"}));
    }

    #[tokio::test]
    async fn completed_download_is_served_once() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        std::fs::write(ctx.download_dir.join("Test_Clip.mp4"), b"clip-bytes").unwrap();
        ctx.state
            .downloads
            .store()
            .update("dl_done", JobRecord::completed("Test_Clip.mp4", "Test Clip"))
            .await
            .unwrap();

        let response = download_file(State(ctx.state.clone()), AxumPath("dl_done".into()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"Test_Clip.mp4\""
        );
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"clip-bytes");

        let (_, body) = download_json(&ctx, "dl_done").await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Download not found");
        assert!(ctx.download_dir.join("Test_Clip.mp4").exists());
    }

    #[tokio::test]
    async fn empty_or_missing_files_are_rejected() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        std::fs::write(ctx.download_dir.join("empty.mp4"), b"").unwrap();
        let store = ctx.state.downloads.store();
        store
            .update("dl_empty", JobRecord::completed("empty.mp4", "Empty"))
            .await
            .unwrap();
        store
            .update("dl_gone", JobRecord::completed("gone.mp4", "Gone"))
            .await
            .unwrap();

        let (_, body) = download_json(&ctx, "dl_empty").await;
        assert_eq!(body["error"], "The downloaded file is empty");
        let (_, body) = download_json(&ctx, "dl_gone").await;
        assert_eq!(body["error"], "The downloaded file no longer exists");
    }

    #[tokio::test]
    async fn cancel_resets_progress_to_unknown() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        ctx.state
            .downloads
            .store()
            .update("dl_live", JobRecord::new(JobStatus::Downloading, 40))
            .await
            .unwrap();

        let response = cancel_download(State(ctx.state.clone()), AxumPath("dl_live".into()))
            .await
            .into_response();
        let body = body_json(response).await;
        assert_eq!(body, json!({"success": true, "message": "Download cancelled"}));

        let body = progress_json(&ctx, "dl_live").await;
        assert_eq!(body["status"], "unknown");
    }

    #[tokio::test]
    async fn failed_worker_surfaces_error_in_progress() {
        let ctx = TestContext::new(Err(ExtractError::RateLimited));
        let started = ctx
            .state
            .downloads
            .start("https://youtu.be/dQw4w9WgXcQ", "best")
            .await
            .unwrap();

        let mut body = Value::Null;
        for _ in 0..100 {
            body = progress_json(&ctx, &started.job_id).await;
            if body["status"] == "error" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(body["status"], "error");
        assert_eq!(body["progress"], 0);
        assert_eq!(body["error"], ExtractError::RateLimited.to_string());
    }

    #[tokio::test]
    async fn status_and_tips_report_service_state() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        let body = body_json(status(State(ctx.state.clone())).await.into_response()).await;
        assert_eq!(body["status"], "active");
        assert_eq!(body["backends"], "fake");
        assert_eq!(body["active_downloads"], 0);
        assert_eq!(body["tracked_jobs"], 0);

        let body = body_json(tips().await.into_response()).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["tips"].as_array().unwrap().len(), TIPS.len());
    }

    #[tokio::test]
    async fn static_fallback_serves_index_and_blocks_traversal() {
        let ctx = TestContext::new(Ok(sample_info(vec![])));
        std::fs::write(ctx.www_root.join("index.html"), "<h1>tubegrab</h1>").unwrap();
        std::fs::write(ctx.www_root.join("app.js"), "console.log(1)").unwrap();

        let fetch = |uri: &'static str| {
            let state = ctx.state.clone();
            async move {
                let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
                static_fallback(State(state), request).await
            }
        };

        let response = fetch("/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/html");

        let response = fetch("/history").await;
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<h1>tubegrab</h1>");

        let response = fetch("/app.js").await;
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(fetch("/missing.css").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(fetch("/../secret").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(fetch("/.env").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(fetch("/api/nope").await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn web_paths_keep_plain_visible_segments() {
        assert_eq!(web_relative_path("/"), Some(PathBuf::new()));
        assert_eq!(
            web_relative_path("/assets//app.js"),
            Some(PathBuf::from("assets/app.js"))
        );
        assert_eq!(web_relative_path("/assets/../../etc/passwd"), None);
        assert_eq!(web_relative_path("/./index.html"), None);
        assert_eq!(web_relative_path("/.git/config"), None);
    }

    #[test]
    fn description_preview_handles_short_and_missing_text() {
        assert_eq!(description_preview(None), "No description");
        assert_eq!(description_preview(Some("   ")), "No description");
        assert_eq!(description_preview(Some("short")), "short");
    }

    #[test]
    fn header_file_names_are_ascii() {
        assert_eq!(ascii_filename("Café_Live.mp4"), "Caf__Live.mp4");
        assert_eq!(ascii_filename("a\"b.mp4"), "a_b.mp4");
    }

    #[test]
    fn cli_flags_become_overrides() {
        let args = ServerArgs::parse_from([
            "tubegrab-server",
            "--port",
            "8080",
            "--download-dir",
            "/tmp/dl",
            "--env-file",
            "custom.env",
        ]);
        let overrides = args.into_overrides();
        assert_eq!(overrides.port, Some(8080));
        assert_eq!(overrides.download_dir, Some(PathBuf::from("/tmp/dl")));
        assert_eq!(overrides.env_path, Some(PathBuf::from("custom.env")));
        assert_eq!(overrides.host, None);
    }
}
