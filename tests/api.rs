// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP-level tests for the API router

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use bicopilot::config::{AppConfig, LlmConfig};
use bicopilot::db::{Database, TaskStatus};
use bicopilot::llm::{ChatMessage, ChatModel, LlmRouter, Provider};
use bicopilot::web::progress::ProgressEvent;
use bicopilot::web::{create_router, AppState};

/// Backend that always returns the same completion
struct FixedModel(String);

#[async_trait]
impl ChatModel for FixedModel {
    async fn complete(&self, _model: &str, _messages: &[ChatMessage], _temperature: f32) -> bicopilot::Result<String> {
        Ok(self.0.clone())
    }
}

struct TestApp {
    router: axum::Router,
    state: Arc<AppState>,
    _dir: TempDir,
}

fn setup_with(llm: LlmRouter) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage = config.storage.rooted_at(dir.path());
    config.storage.ensure_dirs().unwrap();
    config.analysis.llm_summary = false;

    let db = Database::in_memory().unwrap();
    let state = Arc::new(AppState::new(config, db, Arc::new(llm)));
    TestApp {
        router: create_router(state.clone()),
        state,
        _dir: dir,
    }
}

fn setup() -> TestApp {
    setup_with(LlmRouter::with_backends(&LlmConfig::default(), Vec::new()))
}

fn setup_answering(text: &str) -> TestApp {
    let backend: Arc<dyn ChatModel> = Arc::new(FixedModel(text.to_string()));
    setup_with(LlmRouter::with_backends(&LlmConfig::default(), vec![(Provider::Groq, backend)]))
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &axum::Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn post_json(app: &axum::Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

const BOUNDARY: &str = "bicopilot-test-boundary";

fn upload_request(path: &str, filename: &str, content: &str) -> Request<Body> {
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/csv\r\n\r\n{c}\r\n--{b}--\r\n",
        b = BOUNDARY,
        f = filename,
        c = content
    );
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

/// Thirty days of sales for two regions
fn sales_csv() -> String {
    let mut csv = String::from("Date,Region,Sales,Units\n");
    for day in 1..=30 {
        let region = if day % 2 == 0 { "North" } else { "South" };
        let sales = 100 + day * 3 + if day % 7 == 0 { 40 } else { 0 };
        csv.push_str(&format!("2024-01-{:02},{},{},{}\n", day, region, sales, day % 5 + 1));
    }
    csv
}

async fn upload(app: &TestApp, query: &str) -> String {
    let request = upload_request(&format!("/analyze_dataset{}", query), "sales.csv", &sales_csv());
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "processing");
    assert_eq!(body["message"], "Analysis started successfully.");
    body["task_id"].as_str().unwrap().to_string()
}

async fn wait_finished(app: &TestApp, task_id: &str) -> Value {
    for _ in 0..300 {
        let (status, body) = get_json(&app.router, &format!("/status/{}", task_id)).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "processing" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("task {} did not finish", task_id);
}

#[tokio::test]
async fn test_health_and_root() {
    let app = setup();
    let (status, body) = get_json(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    let (status, body) = get_json(&app.router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].as_str().unwrap().contains("Running"));
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let app = setup();
    let (status, body) = get_json(&app.router, "/status/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Task not found");

    let (status, _) = get_json(&app.router, "/results/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get_json(&app.router, "/charts/nope").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["charts"], json!([]));
}

#[tokio::test]
async fn test_upload_without_file_is_422() {
    let app = setup();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/analyze_dataset")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_upload_rejects_unsupported_type() {
    let app = setup();
    let request = upload_request("/analyze_dataset", "notes.txt", "hello");
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["detail"].as_str().unwrap().contains("notes.txt"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_analysis_flow() {
    let app = setup();
    let task_id = upload(&app, "?report_type=markdown").await;

    let status = wait_finished(&app, &task_id).await;
    assert_eq!(status["status"], "completed", "task failed: {}", status["error"]);
    assert_eq!(status["progress"], 1.0);

    let (code, results) = get_json(&app.router, &format!("/results/{}", task_id)).await;
    assert_eq!(code, StatusCode::OK);
    assert_eq!(results["summary"]["rows"], 30);
    assert_eq!(results["summary"]["columns"], 4);
    assert_eq!(results["forecast"]["status"], "success");
    assert_eq!(results["report"]["report_type"], "markdown");

    let (_, charts) = get_json(&app.router, &format!("/charts/{}", task_id)).await;
    let charts = charts["charts"].as_array().unwrap().clone();
    assert!(!charts.is_empty());
    let url = charts[0]["url"].as_str().unwrap();
    let (code, bytes) = send(&app.router, Request::builder().uri(url).body(Body::empty()).unwrap()).await;
    assert_eq!(code, StatusCode::OK);
    assert!(!bytes.is_empty());

    let (_, report) = get_json(&app.router, &format!("/report/{}", task_id)).await;
    assert_eq!(report["status"], "ready");
    let report_url = report["report_url"].as_str().unwrap();
    assert!(report_url.starts_with("/downloads/"));
    let (code, bytes) = send(&app.router, Request::builder().uri(report_url).body(Body::empty()).unwrap()).await;
    assert_eq!(code, StatusCode::OK);
    assert!(String::from_utf8_lossy(&bytes).contains("# Analysis Report"));

    let (_, tasks) = get_json(&app.router, "/tasks?limit=5").await;
    assert_eq!(tasks[0]["id"], task_id.as_str());
    assert_eq!(tasks[0]["filename"], "sales.csv");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quick_analysis_skips_charts_and_forecast() {
    let app = setup();
    let task_id = upload(&app, "?analysis_type=quick&report_type=markdown").await;
    let status = wait_finished(&app, &task_id).await;
    assert_eq!(status["status"], "completed");

    let (_, results) = get_json(&app.router, &format!("/results/{}", task_id)).await;
    assert!(results["visualizations"].is_null());
    assert!(results["forecast"].is_null());
    assert!(results["statistical_analysis"].is_object());
}

#[tokio::test]
async fn test_report_pending_for_processing_task() {
    let app = setup();
    app.state
        .db
        .insert_task("t1", "a.csv", "/missing/a.csv", "h", "full", "pdf")
        .unwrap();
    let (status, body) = get_json(&app.router, "/report/t1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["report_url"].is_null());
    assert_eq!(body["status"], "processing");
}

#[tokio::test]
async fn test_queries_require_known_dataset() {
    let app = setup();
    let (_, body) = post_json(&app.router, "/sql_query", json!({"query": "show all", "dataset_id": "nope"})).await;
    assert_eq!(body["error"], "Dataset not found.");

    let (_, body) = post_json(&app.router, "/semantic_query", json!({"query": "why?"})).await;
    assert_eq!(body["error"], "Context ID (Task ID) is required.");

    let (_, body) = post_json(&app.router, "/semantic_query", json!({"query": "why?", "context_id": "nope"})).await;
    assert_eq!(body["error"], "Dataset not found.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sql_query_runs_generated_sql() {
    let app = setup_answering("```sql\nSELECT Region, COUNT(*) AS n FROM dataset GROUP BY Region ORDER BY Region\n```");
    let task_id = upload(&app, "?report_type=markdown").await;

    let (status, body) = post_json(
        &app.router,
        "/sql_query",
        json!({"query": "count rows per region", "dataset_id": task_id}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["row_count"], 2);
    assert_eq!(body["result"][0]["Region"], "North");
    assert_eq!(body["result"][0]["n"], 15);
    assert!(body["sql"].as_str().unwrap().starts_with("SELECT"));

    wait_finished(&app, &task_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sql_query_rejects_writes() {
    let app = setup_answering("DROP TABLE dataset");
    let task_id = upload(&app, "?report_type=markdown").await;

    let (_, body) = post_json(&app.router, "/sql_query", json!({"query": "remove it", "dataset_id": task_id})).await;
    assert_eq!(body["error"], "Only read-only queries are allowed.");
    assert_eq!(body["sql"], "DROP TABLE dataset");

    wait_finished(&app, &task_id).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_semantic_query_answers() {
    let app = setup_answering("Sales rise steadily through January.");
    let task_id = upload(&app, "?report_type=markdown").await;

    let (_, body) = post_json(
        &app.router,
        "/semantic_query",
        json!({"query": "How are sales trending?", "context_id": task_id}),
    )
    .await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["answer"], "Sales rise steadily through January.");

    wait_finished(&app, &task_id).await;
}

#[tokio::test]
async fn test_feedback_is_recorded() {
    let app = setup();
    let (status, body) = post_json(
        &app.router,
        "/feedback",
        json!({"task_id": "t1", "rating": true, "comment": "useful"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Feedback recorded.");

    post_json(&app.router, "/feedback", json!({"task_id": "t1", "rating": false})).await;
    let summary = app.state.db.feedback_summary().unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.positive, 1);
}

async fn serve(app: &TestApp) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn parse_event(message: tokio_tungstenite::tungstenite::Message) -> ProgressEvent {
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn test_websocket_streams_until_finished() {
    let app = setup();
    app.state
        .db
        .insert_task("t1", "a.csv", "/missing/a.csv", "h", "full", "pdf")
        .unwrap();
    let addr = serve(&app).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/t1", addr))
        .await
        .unwrap();
    let first = parse_event(socket.next().await.unwrap().unwrap());
    assert_eq!(first.status, TaskStatus::Processing);
    assert_eq!(first.progress, 0.0);

    // an unrelated task's event must not be forwarded
    app.state.progress.publish(ProgressEvent {
        task_id: "other".into(),
        status: TaskStatus::Completed,
        progress: 1.0,
        current_agent: None,
        error: None,
    });
    app.state.progress.publish(ProgressEvent {
        task_id: "t1".into(),
        status: TaskStatus::Processing,
        progress: 0.5,
        current_agent: Some("Visualization Agent".into()),
        error: None,
    });
    app.state.progress.publish(ProgressEvent {
        task_id: "t1".into(),
        status: TaskStatus::Completed,
        progress: 1.0,
        current_agent: None,
        error: None,
    });

    let second = parse_event(socket.next().await.unwrap().unwrap());
    assert_eq!(second.task_id, "t1");
    assert_eq!(second.current_agent.as_deref(), Some("Visualization Agent"));
    let third = parse_event(socket.next().await.unwrap().unwrap());
    assert_eq!(third.status, TaskStatus::Completed);

    // server closes after the terminal event
    let rest: Vec<_> = socket.collect().await;
    assert!(rest.iter().all(|m| matches!(m, Ok(msg) if msg.is_close()) || m.is_err()));
}

#[tokio::test]
async fn test_websocket_finished_task_closes_immediately() {
    let app = setup();
    app.state
        .db
        .insert_task("t2", "a.csv", "/missing/a.csv", "h", "full", "pdf")
        .unwrap();
    app.state.db.mark_failed("t2", "boom").unwrap();
    let addr = serve(&app).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws/t2", addr))
        .await
        .unwrap();
    let event = parse_event(socket.next().await.unwrap().unwrap());
    assert_eq!(event.status, TaskStatus::Failed);
    assert_eq!(event.error.as_deref(), Some("boom"));
}
