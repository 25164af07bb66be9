//! Web server implementation

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use testdeck_common::{Error, HarnessConfig, RunState};
use testdeck_harness::archive::{self, ReportFile};
use testdeck_harness::{interpreter_for, RecorderOptions, RunStore, Supervisor};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::live::ws_handler;

/// Shared handler state
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<RunStore>,
    pub config: HarnessConfig,
}

/// HTTP control surface over one supervisor
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: HarnessConfig) -> Self {
        let store = Arc::new(RunStore::new(&config.limits));
        let interpreter = interpreter_for(&config.engine.interpreter);
        let supervisor = Supervisor::new(
            store.clone(),
            config.engine.clone(),
            interpreter,
            config.limits.clone(),
        )
        .with_tests_dir(config.paths.tests_dir.clone());

        Self {
            state: Arc::new(AppState {
                supervisor: Arc::new(supervisor),
                store,
                config,
            }),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Create router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/status", get(status_handler))
            .route("/run", post(run_handler))
            .route("/stop", post(stop_handler))
            .route("/reset", post(reset_handler))
            .route("/history", get(history_handler))
            .route("/recorder/start", post(recorder_handler))
            .route("/reports", get(reports_handler))
            .route("/reports/view/*path", get(report_view_handler))
            .route("/suites", get(suites_handler))
            .route("/summary", get(summary_handler))
            // Live push channel
            .route("/ws", get(ws_handler))
            .route("/live", get(ws_handler))
            .fallback(not_found_handler)
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the web server
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Testdeck listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

/// Build a server from configuration and run it until the process exits.
pub async fn serve(config: HarnessConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen.parse()?;
    WebServer::new(config).serve(addr).await
}

// ============================================================================
// Errors
// ============================================================================

/// Maps harness errors onto HTTP statuses with a `{ "error": ... }` body
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidState { .. } | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_client_error() {
            debug!("Request rejected ({}): {}", status, self.0);
        } else {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "testdeck",
        "version": testdeck_common::VERSION,
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    state: RunState,
    observers: usize,
}

async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(StatusResponse {
        state: state.store.snapshot(),
        observers: state.store.observer_count(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    trigger: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    message: &'static str,
    #[serde(flatten)]
    ack: testdeck_harness::RunAck,
}

async fn run_handler(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RunRequest>>,
) -> ApiResult<Json<RunResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let trigger = request.trigger.unwrap_or_else(|| "api".to_string());
    let ack = state.supervisor.start(trigger).await?;
    Ok(Json(RunResponse {
        message: "Test run started",
        ack,
    }))
}

async fn stop_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    state.supervisor.stop().await?;
    Ok(Json(serde_json::json!({ "message": "Test run stopped" })))
}

async fn reset_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.supervisor.reset().await;
    Json(state.store.snapshot())
}

async fn history_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.history())
}

#[derive(Serialize)]
struct RecorderResponse {
    message: &'static str,
    #[serde(flatten)]
    handle: testdeck_harness::RecorderHandle,
}

async fn recorder_handler(
    State(state): State<Arc<AppState>>,
    Json(options): Json<RecorderOptions>,
) -> ApiResult<Json<RecorderResponse>> {
    let handle = state.supervisor.start_recorder(&options)?;
    Ok(Json(RecorderResponse {
        message: "Recorder started",
        handle,
    }))
}

async fn reports_handler(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ReportFile>>> {
    let root = state.config.paths.reports_dir.clone();
    let files = tokio::task::spawn_blocking(move || archive::list_reports(&root))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(Json(files))
}

async fn report_view_handler(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let resolved = archive::resolve_report_path(&state.config.paths.reports_dir, &path)?;
    let bytes = tokio::fs::read(&resolved).await.map_err(Error::from)?;
    let mime = mime_guess::from_path(&resolved).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime.essence_str().to_string())],
        bytes,
    )
        .into_response())
}

async fn suites_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let tests_dir = state.config.paths.tests_dir.clone();
    let suites = tokio::task::spawn_blocking(move || archive::discover_suites(&tests_dir))
        .await
        .unwrap_or_default();
    Json(suites)
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let summary = archive::read_summary(&state.config.paths.summary_file)?;
    Ok(Json(summary))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fixture {
        server: WebServer,
        _reports: tempfile::TempDir,
    }

    fn fixture(engine_script: &str) -> Fixture {
        let reports = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(reports.path().join("run-1")).unwrap();
        std::fs::write(reports.path().join("run-1/index.html"), "<html>12 passed</html>").unwrap();

        let mut config = HarnessConfig::default();
        config.engine.program = "sh".to_string();
        config.engine.args = vec!["-c".to_string(), engine_script.to_string()];
        config.paths.reports_dir = reports.path().to_path_buf();
        config.paths.tests_dir = reports.path().join("no-tests-here");
        config.paths.summary_file = reports.path().join("summary.json");
        config.limits.stop_grace_ms = 200;

        Fixture {
            server: WebServer::new(config),
            _reports: reports,
        }
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = router.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture("exit 0");
        let (status, body) = send(f.server.router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\""));
    }

    #[tokio::test]
    async fn test_status_is_idle_initially() {
        let f = fixture("exit 0");
        let (status, body) = send(f.server.router(), "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["observers"], 0);
    }

    #[tokio::test]
    async fn test_suites_degrade_to_empty() {
        let f = fixture("exit 0");
        let (status, body) = send(f.server.router(), "GET", "/suites", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_report_traversal_is_forbidden() {
        let f = fixture("exit 0");
        let (status, _) = send(
            f.server.router(),
            "GET",
            "/reports/view/%2e%2e/%2e%2e/etc/passwd",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_report_view_and_listing() {
        let f = fixture("exit 0");
        let router = f.server.router();

        let (status, body) = send(router.clone(), "GET", "/reports/view/run-1/index.html", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("12 passed"));

        let (status, _) = send(router.clone(), "GET", "/reports/view/run-1/missing.html", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(router, "GET", "/reports", None).await;
        let files: Vec<ReportFile> = serde_json::from_str(&body).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "run-1/index.html");
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_bad_request() {
        let f = fixture("exit 0");
        let (status, body) = send(f.server.router(), "POST", "/stop", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("error"));
    }

    #[tokio::test]
    async fn test_second_run_conflicts() {
        let f = fixture("sleep 10");
        let router = f.server.router();

        let (status, body) = send(router.clone(), "POST", "/run", None).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["runId"].is_string());
        assert!(json["startedAt"].is_string());

        let (status, _) = send(router.clone(), "POST", "/run", Some(r#"{"trigger": "again"}"#)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(router.clone(), "POST", "/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(router, "GET", "/status", None).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "idle");
    }

    #[tokio::test]
    async fn test_recorder_requires_url() {
        let f = fixture("exit 0");
        let (status, _) = send(f.server.router(), "POST", "/recorder/start", Some(r#"{"url": ""}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_summary_missing_is_not_found() {
        let f = fixture("exit 0");
        let (status, _) = send(f.server.router(), "GET", "/summary", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
