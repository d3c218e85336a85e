use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::amplify;
use crate::config::AppConfig;
use crate::forwarder::{CallbackForwarder, ForwardOutcome};
use crate::registry::TaskRegistry;
use crate::task::{self, CallbackPayload, TaskResult};
use crate::vidu::{self, GenerationJob, ViduClient};

/// Path the provider posts callbacks to, on both the edge and the
/// application server.
pub const CALLBACK_PATH: &str = "/api/vidu-callback";

/// Clone-cheap handle over the application server's shared state. The
/// registry is injected rather than global so tests get a fresh instance and
/// a later externalized cache can slot in without touching handlers.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: TaskRegistry,
    vidu: Option<ViduClient>,
    config: AppConfig,
}

impl AppState {
    /// `vidu` is `None` when no API key is configured; submission endpoints
    /// report that as a server-side configuration error while callback
    /// ingestion and reads keep working.
    pub fn new(registry: TaskRegistry, vidu: Option<ViduClient>, config: AppConfig) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                vidu,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }
}

// ─── Routers ─────────────────────────────────────────────────────────────────

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate", post(generate))
        .route(CALLBACK_PATH, post(vidu_callback))
        .route("/api/vidu-task/{task_id}", get(get_task))
        .route("/api/{*path}", any(api_route_not_found))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Router for the public edge process: relays provider callbacks to the
/// private application server and exposes a liveness probe. No business
/// logic lives here.
pub fn edge_router(forwarder: Arc<CallbackForwarder>) -> Router {
    Router::new()
        .route("/healthz", get(edge_health))
        .route(CALLBACK_PATH, any(relay_callback))
        .route("/api/vidu-callback/{*path}", any(relay_callback))
        .layer(CorsLayer::permissive())
        .with_state(forwarder)
}

// ─── Application handlers ────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub payload: Option<String>,
    /// Off-peak submissions are cheaper but may queue longer.
    #[serde(default = "default_off_peak")]
    pub off_peak: bool,
    /// Run the prompt through smart amplification before submission.
    #[serde(default)]
    pub amplify_prompt: bool,
}

fn default_model() -> String {
    task::DEFAULT_MODEL.to_string()
}

fn default_off_peak() -> bool {
    true
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub task_id: String,
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, AppError> {
    let request_id = short_request_id();
    let job = build_generation_job(&request, &state.inner.config, &request_id)?;

    let client = state.inner.vidu.as_ref().ok_or_else(|| {
        AppError::Internal(format!(
            "{} not configured",
            crate::config::ENV_API_KEY
        ))
    })?;

    info!(
        %request_id,
        model = %job.model,
        image_count = job.images.len(),
        prompt_chars = job.prompt.chars().count(),
        off_peak = job.off_peak,
        "submitting generation task"
    );

    let ack = client.submit(&job).await.map_err(|err| {
        error!(%request_id, error = %format!("{err:#}"), "generation submission failed");
        AppError::BadGateway(format!("{err:#}"))
    })?;

    info!(
        %request_id,
        task_id = %ack.task_id,
        state = %ack.state,
        credits = ack.credits,
        "generation task created"
    );

    Ok(Json(GenerateResponse {
        success: true,
        task_id: ack.task_id,
    }))
}

fn build_generation_job(
    request: &GenerateRequest,
    config: &AppConfig,
    request_id: &str,
) -> Result<GenerationJob, AppError> {
    if request.images.len() > vidu::MAX_REFERENCE_IMAGES {
        return Err(AppError::BadRequest(format!(
            "maximum {} images allowed, got {}",
            vidu::MAX_REFERENCE_IMAGES,
            request.images.len()
        )));
    }

    if !vidu::SUPPORTED_MODELS.contains(&request.model.as_str()) {
        return Err(AppError::BadRequest(format!(
            "invalid model: {} (expected one of {:?})",
            request.model,
            vidu::SUPPORTED_MODELS
        )));
    }

    if request.model == "viduq1" && request.images.is_empty() {
        return Err(AppError::BadRequest(
            "viduq1 requires at least one reference image".to_string(),
        ));
    }

    let trimmed = request.prompt.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("prompt is required".to_string()));
    }
    if trimmed.chars().count() > vidu::MAX_PROMPT_CHARS {
        return Err(AppError::BadRequest(format!(
            "prompt is too long, maximum {} characters allowed",
            vidu::MAX_PROMPT_CHARS
        )));
    }

    // Amplified prompts stay inside the provider limit: the smart band caps
    // eligible prompts at 500 characters before tripling.
    let prompt = if request.amplify_prompt {
        let amplification = amplify::smart_amplify_default(trimmed);
        if amplification.was_enhanced {
            info!(
                %request_id,
                repeat_count = amplification.repeat_count,
                original_chars = amplification.original.chars().count(),
                enhanced_chars = amplification.enhanced.chars().count(),
                "prompt amplified before submission"
            );
        }
        amplification.enhanced
    } else {
        trimmed.to_string()
    };

    let images = request
        .images
        .iter()
        .map(|image| vidu::ensure_data_url(image))
        .collect();

    Ok(GenerationJob {
        model: request.model.clone(),
        images,
        prompt,
        seed: request.seed.unwrap_or(0),
        off_peak: request.off_peak,
        aspect_ratio: request.aspect_ratio.clone(),
        resolution: request.resolution.clone(),
        payload: request.payload.clone(),
        callback_url: config.vidu.callback_url(),
    })
}

#[derive(Serialize)]
struct CallbackAck {
    success: bool,
}

/// Ingest one provider callback. Acknowledgement is unconditional once the
/// payload parses and carries a task id; nothing downstream of the registry
/// write can fail the provider's delivery.
async fn vidu_callback(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = short_request_id();

    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%request_id, error = %err, "rejected unparseable callback body");
            return callback_rejected();
        }
    };

    let result = match task::normalize(payload, Utc::now()) {
        Ok(result) => result,
        Err(err) => {
            warn!(%request_id, error = %err, "rejected malformed callback");
            return callback_rejected();
        }
    };

    info!(
        %request_id,
        task_id = %result.task_id,
        state = %result.state,
        has_image_url = result.image_url.is_some(),
        has_error = result.error.is_some(),
        "callback ingested"
    );
    state.inner.registry.put(result);

    (StatusCode::OK, Json(CallbackAck { success: true })).into_response()
}

fn callback_rejected() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(CallbackAck { success: false }),
    )
        .into_response()
}

/// Read side for pollers. Absent covers "not yet arrived", "expired", and
/// "lost to a restart" alike; callers keep polling until their own timeout.
async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskResult>, AppError> {
    match state.inner.registry.get(&task_id) {
        Some(result) => Ok(Json(result)),
        None => Err(AppError::NotFound(format!("task not found: {task_id}"))),
    }
}

async fn api_route_not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no such API route: {}", uri.path()))
}

// ─── Edge handlers ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EdgeHealthResponse {
    status: String,
    upstream: String,
}

async fn edge_health(State(forwarder): State<Arc<CallbackForwarder>>) -> Json<EdgeHealthResponse> {
    Json(EdgeHealthResponse {
        status: "ok".to_string(),
        upstream: forwarder.upstream_base().to_string(),
    })
}

#[derive(Serialize)]
struct RelayFailure {
    success: bool,
    error: String,
}

/// Relay one inbound callback to the private upstream. The provider always
/// gets a well-formed response: the upstream body under a fixed 200 when any
/// attempt lands, a 502 envelope when retries are exhausted.
async fn relay_callback(
    State(forwarder): State<Arc<CallbackForwarder>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
        .to_string();
    let content_type = headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok());

    match forwarder
        .forward(method, &path_and_query, content_type, body.to_vec())
        .await
    {
        ForwardOutcome::Relayed { body, .. } => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        ForwardOutcome::Exhausted { attempts, error } => {
            error!(attempts, error = %error, "callback relay exhausted retries");
            (
                StatusCode::BAD_GATEWAY,
                Json(RelayFailure {
                    success: false,
                    error,
                }),
            )
                .into_response()
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

fn short_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
