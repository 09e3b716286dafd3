//! HTTP server.
//!
//! Exposes the research, issue, template, and VOC upload pipelines as a JSON
//! HTTP API for the dashboard frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/research` | `{question}` → `{answer}` via the tool-using agent |
//! | `POST` | `/api/issues` | `{question, useTools}` → issue record, then Slack notification |
//! | `POST` | `/api/templates` | `{businessDesc, funnelStage, tone, insight}` → 3 messages |
//! | `POST` | `/api/voc` | multipart `file` → `{fileUrl}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "internal", "message": "Issue Error: malformed model output: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400, upload validation and malformed
//! requests) and `internal` (500). Pipeline failures, including a run that
//! outlives the request timeout, carry a stage prefix (`QA Error:`,
//! `Issue Error:`, `LLM Error:`).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser frontend
//! can be served from anywhere.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Instrument};

use crate::agent::{AgentOptions, QuestionAnswerer, ToolAgent};
use crate::config::Config;
use crate::error::PipelineError;
use crate::index::create_index;
use crate::issue::IssueStage;
use crate::llm::create_model;
use crate::models::{IssueRecord, TemplateMessage, TemplateRequest};
use crate::notify::{self, create_notifier, Notifier};
use crate::retriever::{FreshnessGatedRetriever, FreshnessPolicy};
use crate::storage::create_store;
use crate::synthesize::GroundedSynthesizer;
use crate::templates::TemplateStage;
use crate::tools::{PdfSearchTool, ToolRegistry, WebSearchTool};
use crate::upload::{UploadError, VocUploader};
use crate::web_search::create_provider;

const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// The pipeline collaborators behind the HTTP surface.
///
/// Built from configuration by [`Services::from_config`]; tests assemble it
/// directly from stubs.
#[derive(Clone)]
pub struct Services {
    pub retriever: Arc<FreshnessGatedRetriever>,
    pub answerer: Arc<dyn QuestionAnswerer>,
    pub issues: Arc<IssueStage>,
    pub templates: Arc<TemplateStage>,
    pub uploader: Arc<VocUploader>,
    pub notifier: Arc<dyn Notifier>,
    pub notify_timeout: Duration,
    /// Caller-side bound on one whole pipeline run.
    pub request_timeout: Duration,
}

impl Services {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let model = create_model(&config.llm)?;
        let primary = create_index("primary index", config.index.primary.as_ref())?;
        let secondary = create_index("secondary index", config.index.secondary_index().as_ref())?;
        let store = create_store(config.storage.as_ref())?;

        let retriever = Arc::new(FreshnessGatedRetriever::new(
            primary,
            secondary,
            store.clone(),
            FreshnessPolicy::from_config(&config.retrieval),
        ));
        let synthesizer = Arc::new(GroundedSynthesizer::new(model.clone(), config.llm.synthesis));

        let mut tools = ToolRegistry::new();
        tools.register(Box::new(PdfSearchTool::new(retriever.clone(), synthesizer)));
        if let Some(provider) = create_provider(&config.web_search)? {
            tools.register(Box::new(WebSearchTool::new(
                provider,
                config.web_search.max_results,
            )));
        }

        let agent: Arc<dyn QuestionAnswerer> = Arc::new(ToolAgent::new(
            model.clone(),
            tools,
            AgentOptions::from_config(&config.agent, config.llm.agent),
        ));

        Ok(Self {
            retriever,
            answerer: agent.clone(),
            issues: Arc::new(IssueStage::new(model.clone(), config.llm.issue).with_answerer(agent)),
            templates: Arc::new(TemplateStage::new(model, config.llm.templates)),
            uploader: Arc::new(VocUploader::new(
                store,
                config.upload.clone(),
                config.storage.as_ref(),
            )),
            notifier: create_notifier(&config.notify)?,
            notify_timeout: Duration::from_secs(config.notify.timeout_secs),
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::from_config(config)?;
    run_server_with(services, &config.server.bind).await
}

/// Starts the server with pre-built services.
pub async fn run_server_with(services: Services, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(target: "server", "listening on http://{}", bind);
    axum::serve(listener, router(services)).await?;
    Ok(())
}

pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/research", post(handle_research))
        .route("/api/issues", post(handle_issue))
        .route("/api/templates", post(handle_templates))
        .route(
            "/api/voc",
            post(handle_voc).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .layer(middleware::from_fn(request_span))
        .layer(cors)
        .with_state(Arc::new(services))
}

type AppState = Arc<Services>;

/// Wraps each request in a span carrying a fresh request id.
async fn request_span(req: Request, next: Next) -> Response {
    let span = tracing::info_span!(
        "request",
        id = %uuid::Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );
    next.run(req).instrument(span).await
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Run a pipeline under the request timeout, prefixing failures with the
/// stage label.
async fn staged<T>(
    stage: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::error!(target: "server", stage, error = %e, "pipeline failed");
            Err(internal(format!("{}: {}", stage, e)))
        }
        Err(_) => {
            tracing::error!(target: "server", stage, timeout = ?limit, "pipeline timed out");
            Err(internal(format!("{}: timed out after {:?}", stage, limit)))
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/research ============

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
}

#[derive(Serialize)]
struct AnswerResponse {
    answer: String,
}

async fn handle_research(
    State(state): State<AppState>,
    Json(req): Json<QuestionRequest>,
) -> Result<Json<AnswerResponse>, AppError> {
    let answer = staged(
        "QA Error",
        state.request_timeout,
        state.answerer.answer(&req.question),
    )
    .await?;
    Ok(Json(AnswerResponse { answer }))
}

// ============ POST /api/issues ============

#[derive(Deserialize)]
struct IssueRequest {
    question: String,
    #[serde(default, rename = "useTools", alias = "use_tools")]
    use_tools: bool,
}

/// Builds the issue, then hands it to the notifier on a detached task.
/// Notification never affects the response.
async fn handle_issue(
    State(state): State<AppState>,
    Json(req): Json<IssueRequest>,
) -> Result<Json<IssueRecord>, AppError> {
    let issue = staged(
        "Issue Error",
        state.request_timeout,
        state.issues.create_issue(&req.question, req.use_tools),
    )
    .await?;

    notify::dispatch(state.notifier.clone(), issue.clone(), state.notify_timeout);
    Ok(Json(issue))
}

// ============ POST /api/templates ============

async fn handle_templates(
    State(state): State<AppState>,
    Json(req): Json<TemplateRequest>,
) -> Result<Json<Vec<TemplateMessage>>, AppError> {
    let messages = staged(
        "LLM Error",
        state.request_timeout,
        state.templates.generate(&req),
    )
    .await?;
    Ok(Json(messages))
}

// ============ POST /api/voc ============

#[derive(Serialize)]
struct UploadResponse {
    #[serde(rename = "fileUrl")]
    file_url: String,
}

async fn handle_voc(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.to_string()))?;
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) = upload.ok_or_else(|| bad_request(UploadError::MissingFile.to_string()))?;
    let file_url = state
        .uploader
        .upload(&filename, bytes.to_vec())
        .await
        .map_err(|e| {
            if e.is_client_error() {
                bad_request(e.to_string())
            } else {
                internal(e.to_string())
            }
        })?;

    Ok(Json(UploadResponse { file_url }))
}
