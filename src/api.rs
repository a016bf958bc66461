//! HTTP surface for the claims QA service.
//!
//! - `GET /` – Liveness probe.
//! - `POST /extract` – Multipart upload (`file`) of a claim image or PDF. Returns
//!   `{ document_id, data, extraction_confidence }`.
//! - `POST /ask` – `{ document_id, question }` against a previously extracted document. Returns
//!   `{ document_id, question, answer, answer_confidence }`.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /commands` – Machine-readable command catalog for tools and hosts.
//!
//! Every failure is answered with `{ "detail": "..." }`.

use crate::processing::{ClaimsApi, ClaimsError, Confidence, StructuredExtraction, UploadedDocument};
use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

const WELCOME_MESSAGE: &str = "Welcome to the Intelligent Claims QA Service!";
const CONVERSION_FAILED_DETAIL: &str = "Failed to convert PDF to images.";

/// Build the HTTP router. `max_upload_bytes` bounds request bodies.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: ClaimsApi + 'static,
{
    Router::new()
        .route("/", get(read_root))
        .route("/extract", post(extract_document::<S>))
        .route("/ask", post(ask_question::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(service)
}

#[derive(Serialize)]
struct RootResponse {
    status: &'static str,
    message: &'static str,
}

async fn read_root() -> Json<RootResponse> {
    Json(RootResponse {
        status: "ok",
        message: WELCOME_MESSAGE,
    })
}

/// Success response for `POST /extract`.
#[derive(Serialize)]
struct ExtractResponse {
    document_id: String,
    #[serde(flatten)]
    extraction: StructuredExtraction,
}

/// Extract structured data from an uploaded claim document.
async fn extract_document<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractResponse>, AppError>
where
    S: ClaimsApi,
{
    let mut multipart =
        multipart.map_err(|rejection| ClaimsError::InvalidRequest(rejection.body_text()))?;
    let upload = read_upload(&mut multipart).await?;
    let outcome = service.extract(upload).await?;
    tracing::info!(
        document_id = %outcome.document_id,
        pages = outcome.page_count,
        "Extract request completed"
    );
    Ok(Json(ExtractResponse {
        document_id: outcome.document_id,
        extraction: outcome.extraction,
    }))
}

/// Pull the `file` field out of the multipart body. Other fields are ignored.
async fn read_upload(multipart: &mut Multipart) -> Result<UploadedDocument, ClaimsError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(UploadedDocument {
            file_name,
            bytes: bytes.to_vec(),
        });
    }
    Err(ClaimsError::InvalidRequest(
        "multipart field `file` is required".into(),
    ))
}

/// Body-limit overruns keep their 413; every other multipart failure is a bad request.
fn multipart_error(error: MultipartError) -> ClaimsError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ClaimsError::UploadTooLarge(error.body_text())
    } else {
        ClaimsError::InvalidRequest(error.body_text())
    }
}

/// Request body for `POST /ask`.
#[derive(Deserialize)]
struct AskRequest {
    document_id: String,
    question: String,
}

/// Success response for `POST /ask`.
#[derive(Serialize)]
struct AskResponse {
    document_id: String,
    question: String,
    answer: String,
    answer_confidence: Confidence,
}

/// Answer a question about a previously extracted document.
async fn ask_question<S>(
    State(service): State<Arc<S>>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError>
where
    S: ClaimsApi,
{
    let Json(AskRequest {
        document_id,
        question,
    }) = payload.map_err(|rejection| ClaimsError::InvalidRequest(rejection.body_text()))?;
    let answer = service.ask(&document_id, &question).await?;
    Ok(Json(AskResponse {
        document_id,
        question,
        answer: answer.answer,
        answer_confidence: answer.answer_confidence,
    }))
}

/// Return pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: ClaimsApi,
{
    Json(service.metrics_snapshot().await)
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery by hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "extract",
                method: "POST",
                path: "/extract",
                description: "Upload a claim image or PDF as multipart field `file`. Response returns { \"document_id\": string, \"data\": object, \"extraction_confidence\": number }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "ask",
                method: "POST",
                path: "/ask",
                description: "Ask a question about an extracted document. Response returns { \"answer\": string, \"answer_confidence\": number }.",
                request_example: Some(json!({
                    "document_id": "3f0c6a52-5d1e-4c1b-9f0e-2a3b4c5d6e7f",
                    "question": "What is the total amount?"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return extraction and question counters.",
                request_example: None,
            },
        ],
    })
}

struct AppError(ClaimsError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            ClaimsError::NotFound(_) => StatusCode::NOT_FOUND,
            ClaimsError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ClaimsError::UploadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ClaimsError::Model(_) | ClaimsError::Parse(_) => StatusCode::BAD_GATEWAY,
            ClaimsError::Configuration(_)
            | ClaimsError::Conversion(_)
            | ClaimsError::Store(_)
            | ClaimsError::Encode(_)
            | ClaimsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match &self.0 {
            ClaimsError::Conversion(_) => CONVERSION_FAILED_DETAIL.to_string(),
            ClaimsError::Io(_) => "Failed to process the uploaded file.".to_string(),
            ClaimsError::Encode(_) => "Failed to prepare the stored claim data.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "detail": self.detail() }))).into_response()
    }
}

impl From<ClaimsError> for AppError {
    fn from(inner: ClaimsError) -> Self {
        Self(inner)
    }
}
