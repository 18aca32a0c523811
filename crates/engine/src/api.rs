//! HTTP API for the learning engine, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use engine_lib::{health::ComponentStatus, EngineError, LearningEngine, NewInteraction, TriggerReason};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: LearningEngine,
}

impl AppState {
    pub fn new(engine: LearningEngine) -> Self {
        Self { engine }
    }
}

/// Engine error mapped onto an HTTP status
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::DataInsufficient { .. } | EngineError::DegenerateLabels { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::TrainingInProgress | EngineError::NotTrained | EngineError::StaleLabelSet { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub text: String,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub id: String,
    pub total_samples: usize,
    pub training_triggered: Option<TriggerReason>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub predicted_success: bool,
    pub actual_success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LearningToggle {
    pub enabled: bool,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health().health();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health().readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn predict(State(state): State<Arc<AppState>>, Json(request): Json<PredictRequest>) -> impl IntoResponse {
    Json(state.engine.predict(&request.text, request.tools.as_deref()))
}

/// Start a training run; its outcome shows up in `/v1/status`
async fn train(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    // The run owns its task; dropping the handle does not cancel it
    drop(state.engine.train()?);
    Ok((StatusCode::ACCEPTED, Json(state.engine.status())))
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.engine.status())
}

async fn record(
    State(state): State<Arc<AppState>>,
    Json(interaction): Json<NewInteraction>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.engine.record_interaction(interaction).await?;
    let response = RecordResponse {
        id: outcome.id,
        total_samples: outcome.total_samples,
        training_triggered: outcome.triggered,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

async fn insights(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    state.engine.insights().map(Json).ok_or(ApiError(EngineError::NotTrained))
}

async fn feature_importance(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    state
        .engine
        .feature_importance()
        .map(Json)
        .ok_or(ApiError(EngineError::NotTrained))
}

async fn optimize(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.optimize_hyperparameters().await?))
}

async fn feedback(State(state): State<Arc<AppState>>, Json(request): Json<FeedbackRequest>) -> impl IntoResponse {
    Json(
        state
            .engine
            .record_feedback(request.predicted_success, request.actual_success),
    )
}

async fn learning(State(state): State<Arc<AppState>>, Json(toggle): Json<LearningToggle>) -> impl IntoResponse {
    state.engine.set_learning_enabled(toggle.enabled);
    Json(LearningToggle {
        enabled: state.engine.learning_enabled(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/predict", post(predict))
        .route("/v1/train", post(train))
        .route("/v1/status", get(status))
        .route("/v1/interactions", post(record))
        .route("/v1/insights", get(insights))
        .route("/v1/feature-importance", get(feature_importance))
        .route("/v1/optimize", post(optimize))
        .route("/v1/feedback", post(feedback))
        .route("/v1/learning", post(learning))
        .with_state(state)
}

/// Start the API server and stop accepting requests on shutdown
pub async fn serve(port: u16, state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
