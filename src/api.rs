//! REST API Server for the report pipeline
//!
//! Runs are started in the background and polled by id.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{CancelToken, Orchestrator, RunContext};
use crate::client::request::SUPPORTED_MEDIA_TYPES;
use crate::client::{Priority, Requirements, ResilientClient, TaskType};
use crate::error::OrchestrationError;
use crate::models::{ReportRequest, SourceDocument};
use crate::state::{RunStatus, RunStore};
use crate::workflow::{GenerationPreferences, WorkflowClassifier};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DocumentUpload {
    pub name: String,
    pub media_type: String,
    /// Standard base64 of the file contents
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReportRunRequest {
    pub company_name: Option<String>,
    pub current_period: DocumentUpload,
    pub prior_period: DocumentUpload,
    /// Free-text workflow instructions, e.g. "keep it cheap"
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionQuery {
    pub task: TaskType,
    pub priority: Option<Priority>,
    pub needs_vision: Option<bool>,
    pub max_cost_per_request: Option<f64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn reply<T: Serialize>(status: StatusCode, data: T) -> ApiResult {
    (status, Json(ApiResponse::success(data)))
}

fn reject(status: StatusCode, message: impl Into<String>) -> ApiResult {
    (status, Json(ApiResponse::error(message.into())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub client: Arc<ResilientClient>,
    pub store: Arc<dyn RunStore>,
    pub cancellations: Arc<RwLock<HashMap<Uuid, CancelToken>>>,
    pub default_preferences: GenerationPreferences,
}

impl ApiState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        client: Arc<ResilientClient>,
        store: Arc<dyn RunStore>,
        default_preferences: GenerationPreferences,
    ) -> Self {
        Self {
            orchestrator,
            client,
            store,
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            default_preferences,
        }
    }
}

fn decode_document(upload: &DocumentUpload) -> std::result::Result<SourceDocument, String> {
    if !SUPPORTED_MEDIA_TYPES.contains(&upload.media_type.as_str()) {
        return Err(format!(
            "{}: unsupported media type {}",
            upload.name, upload.media_type
        ));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(upload.data.trim())
        .map_err(|_| format!("{}: data is not valid base64", upload.name))?;

    if bytes.is_empty() {
        return Err(format!("{}: document is empty", upload.name));
    }

    Ok(SourceDocument::new(&upload.name, &upload.media_type, bytes))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Report Runs
/// =============================

async fn start_report(
    State(state): State<ApiState>,
    Json(req): Json<ReportRunRequest>,
) -> ApiResult {
    let documents = decode_document(&req.current_period)
        .and_then(|current| decode_document(&req.prior_period).map(|prior| (current, prior)));
    let (current_period, prior_period) = match documents {
        Ok(documents) => documents,
        Err(message) => return reject(StatusCode::BAD_REQUEST, message),
    };

    let preferences = req
        .instructions
        .as_deref()
        .map(|text| WorkflowClassifier::classify(text, state.default_preferences))
        .unwrap_or(state.default_preferences);

    let request = ReportRequest {
        company_name: req.company_name,
        current_period,
        prior_period,
        preferences,
    };

    let run_id = Uuid::new_v4();
    if let Err(e) = state.store.create(run_id).await {
        error!(run_id = %run_id, error = %e, "Could not record run");
        return reject(StatusCode::INTERNAL_SERVER_ERROR, e.user_message());
    }

    let ctx = RunContext::new(run_id);
    state
        .cancellations
        .write()
        .await
        .insert(run_id, ctx.cancel_token());

    info!(
        run_id = %run_id,
        priority = %preferences.priority,
        needs_vision = preferences.needs_vision,
        "Report run accepted"
    );

    tokio::spawn(execute_run(state, request, ctx));

    reply(
        StatusCode::ACCEPTED,
        serde_json::json!({ "run_id": run_id, "status": RunStatus::Running }),
    )
}

async fn execute_run(state: ApiState, request: ReportRequest, ctx: RunContext) {
    let run_id = ctx.run_id();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let ctx = ctx.with_progress(tx);

    let progress_store = state.store.clone();
    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Err(e) = progress_store.record_progress(&event).await {
                warn!(run_id = %event.run_id, error = %e, "Could not record progress");
            }
        }
    });

    let outcome = state.orchestrator.run(&request, &ctx).await;

    // closing the channel lets the forwarder drain before the terminal write
    drop(ctx);
    if let Err(e) = forward.await {
        warn!(run_id = %run_id, error = %e, "Progress forwarder stopped");
    }

    let recorded = match outcome {
        Ok(report) => state.store.complete(run_id, report).await,
        Err(e) => {
            let status = match &e {
                OrchestrationError::Cancelled { .. } => RunStatus::Cancelled,
                _ => RunStatus::Failed,
            };
            error!(run_id = %run_id, error = %e, "Report run did not complete");
            state.store.fail(run_id, status, e.user_message()).await
        }
    };
    if let Err(e) = recorded {
        error!(run_id = %run_id, error = %e, "Could not record run outcome");
    }

    state.cancellations.write().await.remove(&run_id);
}

async fn get_report(State(state): State<ApiState>, Path(run_id): Path<Uuid>) -> ApiResult {
    match state.store.load(run_id).await {
        Ok(Some(record)) => reply(StatusCode::OK, record),
        Ok(None) => reject(StatusCode::NOT_FOUND, format!("No run {}", run_id)),
        Err(e) => reject(StatusCode::INTERNAL_SERVER_ERROR, e.user_message()),
    }
}

async fn cancel_report(State(state): State<ApiState>, Path(run_id): Path<Uuid>) -> ApiResult {
    // Runs write their terminal status before dropping their token
    let record = match state.store.load(run_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return reject(StatusCode::NOT_FOUND, format!("No run {}", run_id)),
        Err(e) => return reject(StatusCode::INTERNAL_SERVER_ERROR, e.user_message()),
    };

    let finished = || {
        reject(
            StatusCode::CONFLICT,
            format!("Run {} already finished ({:?})", run_id, record.status),
        )
    };
    if record.status.is_terminal() {
        return finished();
    }

    match state.cancellations.read().await.get(&run_id) {
        Some(token) => {
            token.cancel();
            info!(run_id = %run_id, "Cancellation requested");
            reply(
                StatusCode::ACCEPTED,
                serde_json::json!({ "run_id": run_id, "status": "cancelling" }),
            )
        }
        None => finished(),
    }
}

/// =============================
/// Client Surfaces
/// =============================

async fn select_model(
    State(state): State<ApiState>,
    Query(query): Query<SelectionQuery>,
) -> ApiResult {
    let requirements = Requirements {
        priority: query.priority.unwrap_or(state.default_preferences.priority),
        needs_vision: query.needs_vision.unwrap_or(false),
    };
    let mut budget = state.default_preferences.budget();
    if let Some(max_cost) = query.max_cost_per_request {
        budget.max_cost_per_request = max_cost;
    }

    match state.client.select_model(query.task, requirements, budget) {
        Ok(selection) => reply(StatusCode::OK, selection),
        Err(e) => reject(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn validate_credential(State(state): State<ApiState>) -> ApiResult {
    let valid = state.client.validate_credential().await;
    reply(StatusCode::OK, serde_json::json!({ "valid": valid }))
}

async fn usage(State(state): State<ApiState>) -> ApiResult {
    let breaker = state.client.breaker_state();
    reply(
        StatusCode::OK,
        serde_json::json!({
            "usage": state.client.usage(),
            "circuit": breaker.state,
            "failure_count": breaker.failure_count,
        }),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/reports", post(start_report))
        .route("/api/reports/:id", get(get_report))
        .route("/api/reports/:id/cancel", post(cancel_report))
        .route("/api/models/select", get(select_model))
        .route("/api/credentials/validate", get(validate_credential))
        .route("/api/usage", get(usage))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::PipelineConfig;
    use crate::client::{ClientConfig, RetryPolicy};
    use crate::corrector::LlmCorrector;
    use crate::generator::LlmGenerator;
    use crate::state::InMemoryRunStore;
    use crate::testing::{balanced_report, ScriptedTransport};
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(transport: Arc<ScriptedTransport>) -> ApiState {
        let client = Arc::new(ResilientClient::new(
            transport,
            ClientConfig {
                retry: RetryPolicy::no_retries(),
                ..ClientConfig::default()
            },
        ));
        let orchestrator = Arc::new(Orchestrator::from_config(
            Box::new(LlmGenerator::new(client.clone())),
            Box::new(LlmCorrector::new(client.clone())),
            PipelineConfig::default(),
        ));
        ApiState::new(
            orchestrator,
            client,
            Arc::new(InMemoryRunStore::new()),
            GenerationPreferences::default(),
        )
    }

    fn app(transport: Arc<ScriptedTransport>) -> Router {
        create_router(state(transport))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload(name: &str, contents: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "media_type": "text/plain",
            "data": base64::engine::general_purpose::STANDARD.encode(contents),
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = app(Arc::new(ScriptedTransport::new()))
            .oneshot(get_request("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_report_run_completes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text(
            &serde_json::to_string(&balanced_report(1_500_000.0, 500_000.0, 1_000_000.0))
                .unwrap(),
        );
        let app = app(transport.clone());

        let (status, body) = send(
            &app,
            post_json(
                "/api/reports",
                serde_json::json!({
                    "company_name": "Acme Holdings",
                    "current_period": upload("fy2024.txt", b"Revenue 900000"),
                    "prior_period": upload("fy2023.txt", b"Revenue 800000"),
                    "instructions": "keep it cheap",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body.data.unwrap()["run_id"].as_str().unwrap().to_string();

        let mut record = serde_json::Value::Null;
        for _ in 0..100 {
            let (status, body) = send(&app, get_request(&format!("/api/reports/{}", run_id))).await;
            assert_eq!(status, StatusCode::OK);
            record = body.data.unwrap();
            if record["status"] != "running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(record["status"], "completed");
        assert_eq!(record["result"]["attempts"], 1);
        assert_eq!(record["result"]["company_name"], "Acme Holdings");
        assert_eq!(record["result"]["verification"]["overall_status"], "passed");
        assert_eq!(transport.calls(), 1);

        // finished runs can no longer be cancelled
        let (status, _) = send(
            &app,
            post_json(&format!("/api/reports/{}/cancel", run_id), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_checks_run_status() {
        let state = state(Arc::new(ScriptedTransport::new()));
        let app = create_router(state.clone());

        let running = Uuid::new_v4();
        let running_token = CancelToken::new();
        state.store.create(running).await.unwrap();
        state.cancellations.write().await.insert(running, running_token.clone());

        let (status, body) = send(
            &app,
            post_json(&format!("/api/reports/{}/cancel", running), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body.data.unwrap()["status"], "cancelling");
        assert!(running_token.is_cancelled());

        // finished, but its token has not been dropped yet
        let finished = Uuid::new_v4();
        let finished_token = CancelToken::new();
        state.store.create(finished).await.unwrap();
        state.cancellations.write().await.insert(finished, finished_token.clone());
        state
            .store
            .fail(finished, RunStatus::Failed, "The report could not be generated.".to_string())
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            post_json(&format!("/api/reports/{}/cancel", finished), serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);
        assert!(!finished_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_rejects_bad_upload() {
        let app = app(Arc::new(ScriptedTransport::new()));

        let mut prior = upload("fy2023.txt", b"x");
        prior["data"] = serde_json::json!("not base64!!");
        let (status, body) = send(
            &app,
            post_json(
                "/api/reports",
                serde_json::json!({
                    "current_period": upload("fy2024.txt", b"x"),
                    "prior_period": prior,
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.error.unwrap().contains("fy2023.txt"));
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let app = app(Arc::new(ScriptedTransport::new()));
        let uri = format!("/api/reports/{}", Uuid::new_v4());

        let (status, body) = send(&app, get_request(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);

        let (status, _) = send(&app, post_json(&format!("{}/cancel", uri), serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_model_selection_endpoint() {
        let app = app(Arc::new(ScriptedTransport::new()));

        let (status, body) = send(
            &app,
            get_request("/api/models/select?task=generation&priority=cost"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert!(data["model"]["model_id"].is_string());
        assert!(data["estimated_cost"].as_f64().unwrap() <= 0.50);

        let (status, _) = send(
            &app,
            get_request("/api/models/select?task=generation&max_cost_per_request=0.000001"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_credential_and_usage() {
        let app = app(Arc::new(ScriptedTransport::without_credential()));

        let (status, body) = send(&app, get_request("/api/credentials/validate")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["valid"], false);

        let (status, body) = send(&app, get_request("/api/usage")).await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["usage"]["requests"], 0);
        assert_eq!(data["circuit"], "closed");
    }
}
