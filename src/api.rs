//! HTTP surface for the document QA service.
//!
//! - `GET /` – Unauthenticated service banner with the API base path.
//! - `POST {API_PREFIX}/hackrx/run` – Answer questions about a document URL. Body
//!   `{ "documents": "<url>", "questions": ["..."] }`, reply `{ "answers": ["..."] }` in question
//!   order.
//! - `GET {API_PREFIX}/metrics` – Pipeline counters.
//!
//! Every route under the prefix requires `Authorization: Bearer <TEAM_BEARER_TOKEN>`. The check
//! runs as a route layer, so a rejected request never reaches the pipeline. Errors are returned
//! as `{ "detail": "..." }` with a status chosen from the error category; upstream error text is
//! logged but never sent to clients.

use crate::config::Config;
use crate::metrics::MetricsSnapshot;
use crate::processing::{DocumentSource, ErrorKind, PipelineError, QueryApi};
use axum::{
    Json, Router,
    extract::{Request, State, rejection::JsonRejection},
    http::{StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the HTTP router exposing the query API surface.
pub fn create_router<S>(service: Arc<S>, config: Arc<Config>) -> Router
where
    S: QueryApi + 'static,
{
    let auth = Arc::new(BearerAuth {
        token: config.bearer_token.clone(),
    });
    let api = Router::new()
        .route("/hackrx/run", post(run_query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer))
        .with_state(service);

    let info = Arc::new(ServiceInfo {
        message: "Document QA backend is running",
        docs: format!("POST {}/hackrx/run", config.api_prefix),
        api_base: config.api_prefix.clone(),
    });
    let root = Router::new()
        .route("/", get(service_info))
        .with_state(info);

    let router = if config.api_prefix.is_empty() {
        root.merge(api)
    } else {
        root.nest(&config.api_prefix, api)
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Clone, Serialize)]
struct ServiceInfo {
    message: &'static str,
    docs: String,
    api_base: String,
}

async fn service_info(State(info): State<Arc<ServiceInfo>>) -> Json<ServiceInfo> {
    Json(ServiceInfo::clone(&info))
}

/// Request body for `POST /hackrx/run`.
#[derive(Deserialize)]
struct RunRequest {
    /// URL of the document to answer questions about.
    documents: String,
    /// Questions to answer, in order.
    questions: Vec<String>,
}

/// Success response for `POST /hackrx/run`.
#[derive(Serialize)]
struct RunResponse {
    answers: Vec<String>,
}

/// Download the document, build a transient index, and answer every question.
async fn run_query<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Json<RunResponse>, AppError>
where
    S: QueryApi,
{
    let Json(RunRequest {
        documents,
        questions,
    }) = payload.map_err(|rejection| PipelineError::InvalidRequest(rejection.body_text()))?;

    let source = DocumentSource::parse(&documents).map_err(PipelineError::from)?;
    if !source.is_remote() {
        return Err(PipelineError::InvalidRequest(
            "documents must be an http(s) URL".into(),
        )
        .into());
    }

    let question_count = questions.len();
    let answers = service.answer(source, questions).await?;
    tracing::info!(
        questions = question_count,
        answers = answers.len(),
        "Query request completed"
    );
    Ok(Json(RunResponse { answers }))
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: QueryApi,
{
    Json(service.metrics_snapshot())
}

struct BearerAuth {
    token: String,
}

/// Reasons a request was refused before reaching a handler.
#[derive(Debug, PartialEq, Eq)]
enum AuthError {
    MissingOrMalformed,
    InvalidToken,
}

async fn require_bearer(
    State(auth): State<Arc<BearerAuth>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    check_bearer(header, &auth.token)?;
    Ok(next.run(request).await)
}

fn check_bearer(header: Option<&str>, expected: &str) -> Result<(), AuthError> {
    let token = header
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingOrMalformed)?;
    if token.trim() != expected {
        tracing::warn!("Rejected request with invalid bearer token");
        return Err(AuthError::InvalidToken);
    }
    Ok(())
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::MissingOrMalformed => (
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header",
            ),
            Self::InvalidToken => (StatusCode::FORBIDDEN, "Invalid token provided"),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

struct AppError(PipelineError);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidRequest | ErrorKind::Parsing => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::UnsupportedFormat => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(status = %status, error = ?self.0, "Request failed");
        let body = Json(json!({ "detail": self.0.client_message() }));
        (status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
