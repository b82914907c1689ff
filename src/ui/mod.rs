// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web dashboard: a thin HTML front end that talks to the API service

mod templates;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use base64::Engine;
use futures_util::future::join_all;
use minijinja::value::ValueKind;
use minijinja::{context, Environment, Value};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::UiConfig;
use crate::db::{TaskRecord, TaskStatus};
use crate::web::progress::ProgressEvent;
use crate::web::{AnalyzeResponse, ChartEntry};
use crate::{CopilotError, Result};

/// HTTP client for the API service
#[derive(Clone)]
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Decode a JSON body, turning `{"detail": ...}` replies into errors
    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let detail = body
            .get("detail")
            .and_then(|d| d.as_str())
            .or(status.canonical_reason())
            .unwrap_or("request failed")
            .to_string();
        if status == reqwest::StatusCode::NOT_FOUND {
            Err(CopilotError::NotFound(detail))
        } else {
            Err(CopilotError::Remote { status: status.as_u16(), detail })
        }
    }

    pub async fn health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn upload(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        analysis_type: &str,
        report_type: &str,
    ) -> Result<AnalyzeResponse> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .http
            .post(self.url("/analyze_dataset"))
            .query(&[("analysis_type", analysis_type), ("report_type", report_type)])
            .multipart(form)
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn status(&self, task_id: &str) -> Result<ProgressEvent> {
        let resp = self.http.get(self.url(&format!("/status/{}", task_id))).send().await?;
        Self::decode(resp).await
    }

    /// Stored results, `None` while the task has none yet
    pub async fn results(&self, task_id: &str) -> Result<Option<serde_json::Value>> {
        let resp = self.http.get(self.url(&format!("/results/{}", task_id))).send().await?;
        match Self::decode(resp).await {
            Ok(results) => Ok(Some(results)),
            Err(CopilotError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn charts(&self, task_id: &str) -> Result<Vec<ChartEntry>> {
        #[derive(Deserialize)]
        struct Charts {
            charts: Vec<ChartEntry>,
        }
        let resp = self.http.get(self.url(&format!("/charts/{}", task_id))).send().await?;
        Ok(Self::decode::<Charts>(resp).await?.charts)
    }

    pub async fn report(&self, task_id: &str) -> Result<serde_json::Value> {
        let resp = self.http.get(self.url(&format!("/report/{}", task_id))).send().await?;
        Self::decode(resp).await
    }

    pub async fn tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let resp = self
            .http
            .get(self.url("/tasks"))
            .query(&[("limit", limit)])
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn sql(&self, query: &str, dataset_id: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/sql_query"))
            .json(&json!({ "query": query, "dataset_id": dataset_id }))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn semantic(&self, query: &str, context_id: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .post(self.url("/semantic_query"))
            .json(&json!({ "query": query, "context_id": context_id }))
            .send()
            .await?;
        Self::decode(resp).await
    }

    pub async fn feedback(&self, task_id: &str, rating: bool, comment: Option<&str>) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/feedback"))
            .json(&json!({ "task_id": task_id, "rating": rating, "comment": comment }))
            .send()
            .await?;
        Self::decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    /// Raw artifact bytes plus their content type
    pub async fn fetch(&self, path: &str) -> Result<(String, Vec<u8>)> {
        let resp = self.http.get(self.url(path)).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CopilotError::NotFound(path.to_string()));
        }
        let resp = resp.error_for_status()?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok((content_type, resp.bytes().await?.to_vec()))
    }
}

/// Where a free-form question is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRoute {
    Sql,
    Semantic,
}

impl QueryRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryRoute::Sql => "sql",
            QueryRoute::Semantic => "semantic",
        }
    }
}

const SQL_KEYWORDS: [&str; 5] = ["show", "list", "count", "sum", "average"];

/// Questions asking for rows or aggregates go to SQL, the rest to the analyst
pub fn route_query(question: &str) -> QueryRoute {
    let lower = question.to_lowercase();
    if SQL_KEYWORDS.iter().any(|k| lower.contains(k)) {
        QueryRoute::Sql
    } else {
        QueryRoute::Semantic
    }
}

/// Template filter: compact numbers, `-` for missing values
fn num(value: Value) -> String {
    if value.is_none() || value.is_undefined() {
        return "-".to_string();
    }
    if value.kind() != ValueKind::Number {
        return value.to_string();
    }
    match f64::try_from(value.clone()) {
        Ok(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        Ok(f) => {
            let s = format!("{:.3}", f);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        Err(_) => value.to_string(),
    }
}

fn build_templates() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("base.html", templates::BASE)?;
    env.add_template("index.html", templates::INDEX)?;
    env.add_template("dashboard.html", templates::DASHBOARD)?;
    env.add_template("query.html", templates::QUERY)?;
    env.add_template("reports.html", templates::REPORTS)?;
    env.add_template("error.html", templates::ERROR)?;
    env.add_filter("num", num);
    Ok(env)
}

/// Shared dashboard state
pub struct UiState {
    pub config: UiConfig,
    pub api: ApiClient,
    templates: Environment<'static>,
}

impl UiState {
    pub fn new(config: UiConfig, api: ApiClient) -> Result<Self> {
        Ok(Self {
            config,
            api,
            templates: build_templates()?,
        })
    }

    fn render(&self, name: &str, ctx: Value) -> Response {
        let rendered = self
            .templates
            .get_template(name)
            .and_then(|t| t.render(ctx));
        match rendered {
            Ok(html) => Html(html).into_response(),
            Err(e) => {
                error!("Template {} failed: {}", name, e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }

    fn error_page(&self, status: StatusCode, title: &str, message: &str) -> Response {
        let mut resp = self.render("error.html", context! { title, message });
        *resp.status_mut() = status;
        resp
    }

    fn backend_error(&self, err: CopilotError) -> Response {
        match err {
            CopilotError::NotFound(msg) => self.error_page(StatusCode::NOT_FOUND, "Not found", &msg),
            CopilotError::Remote { detail, .. } => self.error_page(StatusCode::BAD_GATEWAY, "Backend error", &detail),
            other => {
                warn!("Backend unreachable: {}", other);
                self.error_page(
                    StatusCode::BAD_GATEWAY,
                    "Backend unavailable",
                    &format!("Could not reach the API at {}.", self.config.api_url),
                )
            }
        }
    }
}

/// Create the dashboard router
pub fn create_router(state: Arc<UiState>) -> Router {
    let body_limit = state.config.max_upload_mb * 1024 * 1024;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/dashboard/:task_id", get(dashboard))
        .route("/query/:task_id", post(ask))
        .route("/feedback/:task_id", post(feedback))
        .route("/reports", get(reports))
        .route("/downloads/:file", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Handlers ===

async fn health(State(state): State<Arc<UiState>>) -> impl IntoResponse {
    let backend = state.api.health().await;
    axum::Json(json!({ "status": "ok", "backend": backend }))
}

async fn index_page(state: &UiState, error: Option<String>) -> Response {
    let (tasks, error) = match state.api.tasks(20).await {
        Ok(tasks) => (tasks, error),
        Err(e) => {
            warn!("Could not list tasks: {}", e);
            (Vec::new(), error.or_else(|| Some(format!("Backend unavailable at {}.", state.config.api_url))))
        }
    };
    state.render("index.html", context! { title => "Upload", tasks, error })
}

async fn index(State(state): State<Arc<UiState>>) -> Response {
    index_page(&state, None).await
}

async fn upload(State(state): State<Arc<UiState>>, mut multipart: Multipart) -> Response {
    let mut file = None;
    let mut analysis_type = "full".to_string();
    let mut report_type = "pdf".to_string();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return index_page(&state, Some(format!("Upload failed: {}", e))).await,
        };
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                match field.bytes().await {
                    Ok(bytes) if !bytes.is_empty() => file = Some((name, bytes.to_vec())),
                    Ok(_) => {}
                    Err(e) => return index_page(&state, Some(format!("Upload failed: {}", e))).await,
                }
            }
            Some("analysis_type") => analysis_type = field.text().await.unwrap_or_default(),
            Some("report_type") => report_type = field.text().await.unwrap_or_default(),
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return index_page(&state, Some("Choose a file to analyze.".to_string())).await;
    };
    match state.api.upload(&filename, bytes, &analysis_type, &report_type).await {
        Ok(resp) => {
            info!("Started analysis {} for {}", resp.task_id, filename);
            Redirect::to(&format!("/dashboard/{}", resp.task_id)).into_response()
        }
        Err(CopilotError::Remote { detail, .. }) => index_page(&state, Some(detail)).await,
        Err(e) => state.backend_error(e),
    }
}

#[derive(Deserialize)]
struct DashboardParams {
    feedback: Option<String>,
}

/// Chart image as a data URI so the page works without reaching the API
async fn inline_chart(api: &ApiClient, chart: &ChartEntry) -> Option<serde_json::Value> {
    match api.fetch(&chart.url).await {
        Ok((content_type, bytes)) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            Some(json!({
                "title": chart.title,
                "category": chart.category,
                "src": format!("data:{};base64,{}", content_type, encoded),
            }))
        }
        Err(e) => {
            warn!("Could not fetch chart {}: {}", chart.url, e);
            None
        }
    }
}

async fn dashboard(
    State(state): State<Arc<UiState>>,
    Path(task_id): Path<String>,
    Query(params): Query<DashboardParams>,
) -> Response {
    let task = match state.api.status(&task_id).await {
        Ok(task) => task,
        Err(e) => return state.backend_error(e),
    };
    let filename = state
        .api
        .tasks(100)
        .await
        .ok()
        .and_then(|tasks| tasks.into_iter().find(|t| t.id == task_id))
        .map(|t| t.filename)
        .unwrap_or_else(|| task_id.clone());

    let processing = task.status == TaskStatus::Processing;
    let (results, charts, report) = if processing {
        (None, Vec::new(), serde_json::Value::Null)
    } else {
        let results = state.api.results(&task_id).await.unwrap_or_else(|e| {
            warn!("Could not load results for {}: {}", task_id, e);
            None
        });
        let entries = state.api.charts(&task_id).await.unwrap_or_default();
        let charts: Vec<_> = join_all(entries.iter().map(|c| inline_chart(&state.api, c)))
            .await
            .into_iter()
            .flatten()
            .collect();
        let report = state.api.report(&task_id).await.unwrap_or_default();
        (results, charts, report)
    };

    let refresh = processing.then_some(state.config.refresh_secs);
    let task = json!({
        "id": task.task_id,
        "filename": filename,
        "status": task.status,
        "progress": task.progress,
        "current_agent": task.current_agent,
        "error": task.error,
    });
    state.render(
        "dashboard.html",
        context! {
            title => filename,
            refresh,
            task,
            results,
            charts,
            report,
            feedback_sent => params.feedback.is_some(),
        },
    )
}

#[derive(Deserialize)]
struct AskForm {
    question: String,
}

async fn ask(State(state): State<Arc<UiState>>, Path(task_id): Path<String>, Form(form): Form<AskForm>) -> Response {
    let question = form.question.trim().to_string();
    if question.is_empty() {
        return Redirect::to(&format!("/dashboard/{}", task_id)).into_response();
    }
    let route = route_query(&question);
    let answer = match route {
        QueryRoute::Sql => state.api.sql(&question, &task_id).await,
        QueryRoute::Semantic => state.api.semantic(&question, &task_id).await,
    };
    let answer = match answer {
        Ok(answer) => answer,
        Err(e) => return state.backend_error(e),
    };
    state.render(
        "query.html",
        context! {
            title => "Question",
            task_id,
            question,
            route => route.as_str(),
            answer,
        },
    )
}

#[derive(Deserialize)]
struct FeedbackForm {
    rating: String,
    comment: Option<String>,
}

async fn feedback(
    State(state): State<Arc<UiState>>,
    Path(task_id): Path<String>,
    Form(form): Form<FeedbackForm>,
) -> Response {
    let comment = form.comment.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Err(e) = state.api.feedback(&task_id, form.rating == "true", comment).await {
        return state.backend_error(e);
    }
    Redirect::to(&format!("/dashboard/{}?feedback=1", task_id)).into_response()
}

async fn reports(State(state): State<Arc<UiState>>) -> Response {
    let tasks = match state.api.tasks(50).await {
        Ok(tasks) => tasks,
        Err(e) => return state.backend_error(e),
    };
    let finished: Vec<_> = tasks.into_iter().filter(|t| t.status == TaskStatus::Completed).collect();
    let links = join_all(finished.iter().map(|t| state.api.report(&t.id))).await;
    let reports: Vec<_> = finished
        .iter()
        .zip(links)
        .map(|(task, report)| json!({ "task": task, "report": report.unwrap_or_default() }))
        .collect();
    state.render("reports.html", context! { title => "Reports", reports })
}

async fn download(State(state): State<Arc<UiState>>, Path(file): Path<String>) -> Response {
    match state.api.fetch(&format!("/downloads/{}", file)).await {
        Ok((content_type, bytes)) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(e) => state.backend_error(e),
    }
}

/// Start the dashboard server
pub async fn start_server(config: UiConfig, timeout: Duration) -> Result<()> {
    let api = ApiClient::new(&config.api_url, timeout)?;
    if !api.health().await {
        warn!("API at {} is not reachable yet", config.api_url);
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(UiState::new(config, api)?);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Dashboard available at http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(crate::supervisor::shutdown_signal())
        .await
        .map_err(|e| CopilotError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
