// 🌐 Serving Placeholder - REST API with Axum
// Stands where the served model would be: reports health, the compiled
// pipeline, and a shuffled-truth score for any event in the input dir.

use crate::config::{ImageConfig, PipelineConfig};
use crate::dataset::{list_events, load_event_parts, parse_event_id, EventPart, Submission};
use crate::pipeline::{compile, trackml_pipeline};
use crate::randomize::{seeded_rng, shuffle_hits};
use crate::scoring::{ScoreReport, ScoringEngine};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Component, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PipelineConfig>,
    pub images: Arc<ImageConfig>,
}

impl AppState {
    pub fn new(config: PipelineConfig, images: ImageConfig) -> Self {
        AppState {
            config: Arc::new(config),
            images: Arc::new(images),
        }
    }
}

/// API Response wrapper
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn fail(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => {
                log::error!("request failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(ApiResponse::fail(message))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ScoreQuery {
    pub fraction: Option<f64>,
    pub seed: Option<u64>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/pipeline - Compiled workflow of the current pipeline
async fn get_pipeline(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let workflow = compile(&trackml_pipeline(&state.images))
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(ApiResponse::ok(workflow)))
}

/// GET /api/events - Events available in the input directory
async fn get_events(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let events = list_events(&state.config.input_dir)
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(ApiResponse::ok(events)))
}

/// Prefix of a named event inside the input dir.
/// The name must be a single `eventNNN` component.
fn event_prefix(input_dir: &std::path::Path, event: &str) -> Result<PathBuf, ApiError> {
    let mut components = std::path::Path::new(event).components();
    if !matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) {
        return Err(ApiError::BadRequest(format!("Invalid event name: {:?}", event)));
    }

    let prefix = input_dir.join(event);
    parse_event_id(&prefix).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(prefix)
}

/// GET /api/events/:event/score - Shuffle an event's truth and score it
async fn get_event_score(
    State(state): State<AppState>,
    Path(event): Path<String>,
    Query(query): Query<ScoreQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let prefix = event_prefix(&state.config.input_dir, &event)?;
    if !EventPart::Truth.path_for(&prefix).exists() {
        return Err(ApiError::NotFound(format!("Unknown event: {}", event)));
    }

    let fraction = query.fraction.unwrap_or(state.config.shuffle_fraction);
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(ApiError::BadRequest(format!(
            "fraction must be within [0, 1], got {}",
            fraction
        )));
    }
    let seed = query.seed.or(state.config.seed);

    let report = tokio::task::spawn_blocking(move || -> anyhow::Result<ScoreReport> {
        let loaded = load_event_parts(&prefix, &[EventPart::Truth])?;
        let mut rng = seeded_rng(seed);
        let submission = shuffle_hits(&Submission::from_truth(&loaded.truth), fraction, &mut rng)?;
        ScoringEngine::new().score(loaded.event_id, &loaded.truth, &submission)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;

    Ok(Json(ApiResponse::ok(report)))
}

// ============================================================================
// Router / Server
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/pipeline", get(get_pipeline))
        .route("/events", get(get_events))
        .route("/events/:event/score", get(get_event_score))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(addr: &str, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
