use std::sync::Arc;
use std::time::Instant;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, Method},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use shared::protocol::{FILE_NAME_HEADER, STATUS_PATH, UPLOAD_PATH};
use shared::types::{StatusResponse, UploadResponse};
use crate::error::{Error, Result};
use crate::storage::ingest::UploadIngestor;

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<UploadIngestor>,
    /// When the listener came up; uptime is measured from here
    pub started: Instant,
    /// Fired when shutdown stops waiting for in-flight uploads
    pub abort: CancellationToken,
}

impl AppState {
    pub fn new(ingestor: Arc<UploadIngestor>, abort: CancellationToken) -> Self {
        Self {
            ingestor,
            started: Instant::now(),
            abort,
        }
    }

    fn uptime_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

pub fn router(state: AppState) -> Router {
    // Trusted-LAN tool: any origin, any header, credentials allowed.
    // Origins and headers are mirrored since wildcards can't be combined with credentials.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    Router::new()
        .route("/", get(landing))
        .route(STATUS_PATH, get(get_status))
        .route(UPLOAD_PATH, post(upload))
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running".to_string(),
        timestamp: now_rfc3339(),
        uptime: state.uptime_secs(),
    })
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<html>\n  <body>\n    <h1>Photo Backup Server</h1>\n    <p>Server is running</p>\n    \
         <p>Uptime: {:.0} seconds</p>\n    <p>Timestamp: {}</p>\n  </body>\n</html>\n",
        state.uptime_secs(),
        now_rfc3339()
    ))
}

async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let multipart = multipart.map_err(|e| Error::validation(e.body_text()))?;
    let declared = headers
        .get(FILE_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    tracing::debug!("Upload request, declared name {:?}", declared);

    // Dropping the ingest future on abort removes whatever was partially written
    let stored = tokio::select! {
        stored = state.ingestor.ingest_multipart(multipart, declared) => stored?,
        _ = state.abort.cancelled() => {
            tracing::warn!("Upload aborted by shutdown");
            return Err(Error::ShuttingDown);
        }
    };

    Ok(Json(UploadResponse {
        success: true,
        file: stored.file_name,
        path: stored.relative_path,
    }))
}
