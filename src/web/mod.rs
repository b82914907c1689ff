// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP API for uploads, analysis progress, results and on-demand queries

pub mod progress;

use axum::{
    extract::{
        multipart::MultipartRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agents::{file_name, Agents, AnalysisResults, ForecastOutcome, ReportType};
use crate::config::AppConfig;
use crate::dataset::{self, Dataset};
use crate::db::{self, Database, TaskRecord};
use crate::llm::LlmRouter;
use crate::workflow::{AnalysisType, Workflow, WorkflowState};
use crate::CopilotError;
use progress::{ProgressEvent, ProgressHub, TaskObserver};

/// API error rendered as `{"detail": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Copilot(#[from] CopilotError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Copilot(CopilotError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            ApiError::Copilot(err) => {
                error!("Request failed: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Small LRU of loaded datasets keyed by task id
struct DatasetCache {
    capacity: usize,
    entries: VecDeque<(String, Arc<Dataset>)>,
}

impl DatasetCache {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), entries: VecDeque::new() }
    }

    fn get(&mut self, key: &str) -> Option<Arc<Dataset>> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos)?;
        let ds = entry.1.clone();
        self.entries.push_front(entry);
        Some(ds)
    }

    fn insert(&mut self, key: &str, ds: Arc<Dataset>) {
        self.entries.retain(|(k, _)| k != key);
        self.entries.push_front((key.to_string(), ds));
        self.entries.truncate(self.capacity);
    }
}

/// Shared application state
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub agents: Arc<Agents>,
    pub progress: ProgressHub,
    datasets: Mutex<DatasetCache>,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database, llm: Arc<LlmRouter>) -> Self {
        let agents = Arc::new(Agents::new(&config, llm));
        let cache = DatasetCache::new(config.api.dataset_cache_entries);
        Self {
            config,
            db,
            agents,
            progress: ProgressHub::new(256),
            datasets: Mutex::new(cache),
        }
    }

    /// Upload path for a task: the recorded one, else `uploads/{task_id}_*`
    fn locate_upload(&self, task_id: &str) -> Option<PathBuf> {
        if let Ok(Some(task)) = self.db.get_task(task_id) {
            let path = PathBuf::from(&task.file_path);
            if path.exists() {
                return Some(path);
            }
        }
        let pattern = self
            .config
            .storage
            .uploads_dir
            .join(format!("{}_*", glob::Pattern::escape(task_id)));
        glob::glob(&pattern.to_string_lossy())
            .ok()?
            .filter_map(|p| p.ok())
            .find(|p| p.is_file())
    }

    /// Loaded dataset for a task, through the cache
    fn dataset(&self, task_id: &str) -> Option<Arc<Dataset>> {
        if let Some(ds) = self.datasets.lock().ok()?.get(task_id) {
            return Some(ds);
        }
        let path = self.locate_upload(task_id)?;
        let ds = match Dataset::load(&path) {
            Ok(ds) => Arc::new(ds),
            Err(e) => {
                warn!("Could not load dataset for {}: {}", task_id, e);
                return None;
            }
        };
        if let Ok(mut cache) = self.datasets.lock() {
            cache.insert(task_id, ds.clone());
        }
        Some(ds)
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let storage = &state.config.storage;
    let body_limit = state.config.api.max_upload_mb * 1024 * 1024;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/analyze_dataset", post(analyze_dataset))
        .route("/semantic_query", post(semantic_query))
        .route("/sql_query", post(sql_query))
        .route("/status/:task_id", get(task_status))
        .route("/charts/:task_id", get(task_charts))
        .route("/report/:task_id", get(task_report))
        .route("/results/:task_id", get(task_results))
        .route("/tasks", get(list_tasks))
        .route("/feedback", post(submit_feedback))
        .route("/ws/:task_id", get(progress_socket))
        .nest_service("/artifacts/charts", ServeDir::new(&storage.charts_dir))
        .nest_service("/artifacts/forecasts", ServeDir::new(&storage.forecasts_dir))
        .nest_service("/downloads", ServeDir::new(&storage.reports_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Handlers ===

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "AI BI Copilot Backend is Running 🚀" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct AnalyzeParams {
    analysis_type: Option<String>,
    report_type: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub task_id: String,
    pub status: String,
    pub message: String,
}

/// Keep the base name and a conservative character set
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

async fn analyze_dataset(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AnalyzeParams>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let mut multipart = multipart.map_err(|_| ApiError::Unprocessable("Field required: file".to_string()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or("upload"));
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed upload: {}", e)))?;
        upload = Some((filename, bytes));
        break;
    }
    let (filename, bytes) = upload.ok_or_else(|| ApiError::Unprocessable("Field required: file".to_string()))?;

    if !dataset::loader::is_supported(std::path::Path::new(&filename)) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported file type: {}. Upload a CSV or Excel file.",
            filename
        )));
    }

    let analysis_type = AnalysisType::from_param(params.analysis_type.as_deref().unwrap_or("full"));
    let report_type = ReportType::from_param(params.report_type.as_deref().unwrap_or("pdf"));
    let task_id = db::new_task_id();
    let uploads = &state.config.storage.uploads_dir;
    let file_path = uploads.join(format!("{}_{}", task_id, filename));

    let written = async {
        tokio::fs::create_dir_all(uploads).await?;
        tokio::fs::write(&file_path, &bytes).await
    }
    .await;
    if let Err(e) = written {
        error!("Upload failed: {}", e);
        return Err(ApiError::Internal("File upload failed.".to_string()));
    }
    info!("File uploaded: {} (Task ID: {})", filename, task_id);

    let hash = blake3::hash(&bytes).to_hex().to_string();
    if let Ok(Some(previous)) = state.db.find_task_by_hash(&hash) {
        info!("{} was already analyzed as task {}", filename, previous);
    }
    state.db.insert_task(
        &task_id,
        &filename,
        &file_path.to_string_lossy(),
        &hash,
        analysis_type.as_str(),
        report_type.as_str(),
    )?;

    let bg = state.clone();
    let id = task_id.clone();
    tokio::spawn(async move {
        let observer = TaskObserver::new(bg.db.clone(), bg.progress.clone());
        let workflow = Workflow::for_analysis(analysis_type);
        let run_state = WorkflowState::new(&id, &file_path, report_type);
        // failures are already recorded by the observer
        let _ = workflow.run(&bg.agents, run_state, &observer).await;
    });

    Ok(Json(AnalyzeResponse {
        task_id,
        status: "processing".to_string(),
        message: "Analysis started successfully.".to_string(),
    }))
}

#[derive(Deserialize)]
struct SemanticRequest {
    query: String,
    context_id: Option<String>,
}

async fn semantic_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SemanticRequest>,
) -> Json<serde_json::Value> {
    let Some(context_id) = request.context_id.filter(|c| !c.is_empty()) else {
        return Json(json!({ "error": "Context ID (Task ID) is required." }));
    };
    let Some(ds) = state.dataset(&context_id) else {
        return Json(json!({ "error": "Dataset not found." }));
    };

    let context = state
        .db
        .get_results::<AnalysisResults>(&context_id)
        .ok()
        .flatten()
        .map(|r| r.highlights());
    let answer = state
        .agents
        .semantic
        .answer_query(&ds, &request.query, context.as_ref())
        .await;
    Json(serde_json::to_value(answer).unwrap_or_else(|e| json!({ "error": e.to_string() })))
}

#[derive(Deserialize)]
struct SqlRequest {
    query: String,
    dataset_id: String,
}

async fn sql_query(State(state): State<Arc<AppState>>, Json(request): Json<SqlRequest>) -> Json<serde_json::Value> {
    let Some(ds) = state.dataset(&request.dataset_id) else {
        return Json(json!({ "error": "Dataset not found." }));
    };
    let outcome = state.agents.sql.execute_query(&ds, &request.query).await;
    Json(serde_json::to_value(outcome).unwrap_or_else(|e| json!({ "error": e.to_string() })))
}

fn require_task(state: &AppState, task_id: &str) -> ApiResult<TaskRecord> {
    state
        .db
        .get_task(task_id)?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))
}

async fn task_status(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> ApiResult<Json<ProgressEvent>> {
    let task = require_task(&state, &task_id)?;
    Ok(Json(ProgressEvent::from(&task)))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChartEntry {
    pub category: String,
    pub title: String,
    pub url: String,
}

async fn task_charts(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let mut charts = Vec::new();
    if let Some(results) = state.db.get_results::<AnalysisResults>(&task_id)? {
        if let Some(set) = &results.visualizations {
            for (category, path) in set.iter() {
                charts.push(ChartEntry {
                    category: category.to_string(),
                    title: crate::agents::visualization::chart_title(path),
                    url: format!("/artifacts/charts/{}", file_name(std::path::Path::new(path))),
                });
            }
        }
        if let Some(ForecastOutcome::Success(f)) = &results.forecast {
            for (title, path) in [("Forecast", &f.forecast_plot), ("Forecast components", &f.components_plot)] {
                charts.push(ChartEntry {
                    category: "forecast".to_string(),
                    title: title.to_string(),
                    url: format!("/artifacts/forecasts/{}", file_name(std::path::Path::new(path))),
                });
            }
        }
    }
    Ok(Json(json!({ "charts": charts })))
}

async fn task_report(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let task = require_task(&state, &task_id)?;
    let report = state
        .db
        .get_results::<AnalysisResults>(&task_id)?
        .and_then(|r| r.report);

    let body = match report {
        Some(report) => json!({
            "report_url": format!("/downloads/{}", file_name(std::path::Path::new(report.primary_path()))),
            "markdown_url": format!("/downloads/{}", file_name(std::path::Path::new(&report.markdown_path))),
            "status": "ready",
        }),
        None => json!({
            "report_url": null,
            "markdown_url": null,
            "status": task.status.as_str(),
        }),
    };
    Ok(Json(body))
}

async fn task_results(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> ApiResult<Json<AnalysisResults>> {
    state
        .db
        .get_results::<AnalysisResults>(&task_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Results not found".to_string()))
}

#[derive(Deserialize)]
struct TasksQuery {
    limit: Option<usize>,
}

async fn list_tasks(State(state): State<Arc<AppState>>, Query(query): Query<TasksQuery>) -> ApiResult<Json<Vec<TaskRecord>>> {
    Ok(Json(state.db.recent_tasks(query.limit.unwrap_or(20))?))
}

#[derive(Deserialize)]
struct FeedbackRequest {
    task_id: String,
    rating: bool,
    comment: Option<String>,
}

async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    info!("Feedback received for {}: {}", request.task_id, request.rating);
    state
        .db
        .insert_feedback(&request.task_id, request.rating, request.comment.as_deref())?;
    Ok(Json(json!({ "message": "Feedback recorded." })))
}

async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| stream_progress(socket, state, task_id))
}

async fn send_event(socket: &mut WebSocket, event: &ProgressEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

/// Current state first, then live updates until the task finishes
async fn stream_progress(mut socket: WebSocket, state: Arc<AppState>, task_id: String) {
    // subscribe before reading the row so no update falls in between
    let mut rx = state.progress.subscribe();

    let task = match state.db.get_task(&task_id) {
        Ok(Some(task)) => task,
        _ => {
            let _ = socket
                .send(Message::Text(json!({ "error": "Task not found" }).to_string()))
                .await;
            let _ = socket.close().await;
            return;
        }
    };

    let current = ProgressEvent::from(&task);
    if !send_event(&mut socket, &current).await || current.status.is_finished() {
        let _ = socket.close().await;
        return;
    }

    loop {
        match rx.recv().await {
            Ok(event) if event.task_id == task_id => {
                let finished = event.status.is_finished();
                if !send_event(&mut socket, &event).await || finished {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("Progress stream for {} skipped {} events", task_id, n),
            Err(RecvError::Closed) => break,
        }
    }
    let _ = socket.close().await;
}

/// Start the API server
pub async fn start_server(config: AppConfig, db: Database) -> crate::Result<()> {
    config.storage.ensure_dirs()?;
    let interrupted = db.fail_interrupted()?;
    if interrupted > 0 {
        warn!("Marked {} interrupted task(s) as failed", interrupted);
    }

    let llm = Arc::new(LlmRouter::from_config(&config.llm)?);
    info!(
        "LLM chain: {}",
        llm.active_chain().iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> ")
    );

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let state = Arc::new(AppState::new(config, db, llm));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(crate::supervisor::shutdown_signal())
        .await
        .map_err(|e| CopilotError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
