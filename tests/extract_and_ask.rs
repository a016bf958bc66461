//! End-to-end `/extract` and `/ask` flows through the real router and claims service, with the
//! model and PDF rasterizer replaced by in-process fakes.

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
    response::Response,
};
use claimsqa::{
    api,
    llm::{GenerationRequest, GenerativeClient, ModelClientError},
    processing::{ClaimsService, ConversionError, PageRasterizer, page_file_name},
    store::{DocumentStore, InMemoryDocumentStore},
};
use regex::Regex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

const BOUNDARY: &str = "claims-flow-boundary";

const STRUCTURED_REPLY: &str = r#"```json
{
  "data": {
    "patient": {"name": "Jane Doe", "age": null, "Insurance Scheme Service Provider": null},
    "diagnoses": [],
    "medications": [],
    "procedures": [],
    "admission": {"was_admitted": false, "admission_date": null, "discharge_date": null},
    "total_amount": "$120"
  },
  "extraction_confidence": 92
}
```"#;

const ANSWER_REPLY: &str = r#"{"answer": "$120", "answer_confidence": 88}"#;

/// Replies to page, structuring, and answering prompts from fixed scripts.
struct ScriptedModel {
    page_texts: Mutex<VecDeque<String>>,
    structured_reply: String,
    answer_replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedModel {
    fn new(page_texts: &[&str], structured_reply: &str) -> Self {
        Self {
            page_texts: Mutex::new(page_texts.iter().map(|text| text.to_string()).collect()),
            structured_reply: structured_reply.to_string(),
            answer_replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue answer replies; once drained, questions get [`ANSWER_REPLY`].
    fn with_answers(self, replies: &[&str]) -> Self {
        self.answer_replies
            .lock()
            .expect("lock")
            .extend(replies.iter().map(|reply| reply.to_string()));
        self
    }

    fn page_requests(&self) -> usize {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter(|request| request.image.is_some())
            .count()
    }

    fn structuring_prompt(&self) -> String {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .find(|request| request.image.is_none() && !request.prompt.contains("Question:"))
            .map(|request| request.prompt.clone())
            .expect("structuring request sent")
    }
}

#[async_trait]
impl GenerativeClient for ScriptedModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ModelClientError> {
        let reply = if request.image.is_some() {
            self.page_texts
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_default()
        } else if request.prompt.contains("Question:") {
            self.answer_replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| ANSWER_REPLY.to_string())
        } else {
            self.structured_reply.clone()
        };
        self.requests.lock().expect("lock").push(request);
        Ok(reply)
    }
}

struct UnreachableModel;

#[async_trait]
impl GenerativeClient for UnreachableModel {
    async fn generate(&self, _request: GenerationRequest) -> Result<String, ModelClientError> {
        Err(ModelClientError::ProviderUnavailable(
            "connection refused".into(),
        ))
    }
}

/// Writes `pages` placeholder PNGs, or fails when `pages` is `None`.
struct FakeRasterizer {
    pages: Option<usize>,
    calls: AtomicUsize,
}

impl FakeRasterizer {
    fn with_pages(pages: usize) -> Self {
        Self {
            pages: Some(pages),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            pages: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(pages) = self.pages else {
            return Err(ConversionError::Load("not a PDF".into()));
        };
        std::fs::create_dir_all(output_dir)?;
        let mut paths = Vec::new();
        for page in 1..=pages {
            let path = output_dir.join(page_file_name(page));
            std::fs::write(&path, [0x89, b'P', b'N', b'G'])?;
            paths.push(path);
        }
        Ok(paths)
    }
}

struct Harness {
    app: Router,
    store: Arc<InMemoryDocumentStore>,
    scratch_root: TempDir,
}

impl Harness {
    fn new(model: Option<Arc<dyn GenerativeClient>>, rasterizer: Arc<FakeRasterizer>) -> Self {
        let scratch_root = tempfile::tempdir().expect("scratch root");
        let store = Arc::new(InMemoryDocumentStore::new());
        let service = Arc::new(ClaimsService::new(
            model,
            rasterizer,
            store.clone(),
            scratch_root.path().to_path_buf(),
        ));
        Self {
            app: api::create_router(service, 10 * 1024 * 1024),
            store,
            scratch_root,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    async fn stored(&self) -> usize {
        self.store.len().await.expect("store len")
    }

    fn leftover_scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch_root.path())
            .expect("read scratch root")
            .count()
    }
}

fn upload(file_name: &str, contents: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/extract")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

fn ask(document_id: &str, question: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/ask")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "document_id": document_id, "question": question }).to_string(),
        ))
        .expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&bytes).expect("json body")
}

fn page_markers(prompt: &str) -> Vec<usize> {
    let marker = Regex::new(r"--- Page (\d+) ---").expect("regex");
    marker
        .captures_iter(prompt)
        .map(|captures| captures[1].parse().expect("page number"))
        .collect()
}

#[tokio::test]
async fn two_page_pdf_is_extracted_stored_and_answerable() {
    let model = Arc::new(ScriptedModel::new(
        &["Patient: Jane Doe", "Total: $120"],
        STRUCTURED_REPLY,
    ));
    let rasterizer = Arc::new(FakeRasterizer::with_pages(2));
    let harness = Harness::new(Some(model.clone()), rasterizer.clone());

    let response = harness.send(upload("claim.pdf", b"%PDF-1.4")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let extracted = json_body(response).await;

    let document_id = extracted["document_id"].as_str().expect("id").to_string();
    Uuid::parse_str(&document_id).expect("uuid document id");
    assert_eq!(extracted["extraction_confidence"], 92);
    assert_eq!(extracted["data"]["patient"]["name"], "Jane Doe");
    assert_eq!(extracted["data"]["total_amount"], "$120");

    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.page_requests(), 2);
    let prompt = model.structuring_prompt();
    assert_eq!(page_markers(&prompt), vec![1, 2]);
    let jane = prompt.find("Patient: Jane Doe").expect("page 1 text");
    let total = prompt.find("Total: $120").expect("page 2 text");
    assert!(jane < total);

    assert_eq!(harness.stored().await, 1);
    assert_eq!(harness.leftover_scratch_entries(), 0);

    let response = harness.send(ask(&document_id, "What is the total?")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "document_id": document_id,
            "question": "What is the total?",
            "answer": "$120",
            "answer_confidence": 88
        })
    );
}

#[tokio::test]
async fn image_upload_skips_conversion_and_is_a_single_page() {
    let model = Arc::new(ScriptedModel::new(&["Patient: Jane Doe"], STRUCTURED_REPLY));
    let rasterizer = Arc::new(FakeRasterizer::with_pages(3));
    let harness = Harness::new(Some(model.clone()), rasterizer.clone());

    let response = harness.send(upload("claim.jpg", &[0xFF, 0xD8, 0xFF])).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(model.page_requests(), 1);
    assert_eq!(page_markers(&model.structuring_prompt()), vec![1]);
    let requests = model.requests.lock().expect("lock");
    let image = requests[0].image.as_ref().expect("image part");
    assert_eq!(image.mime_type, "image/jpeg");
    assert_eq!(image.data, vec![0xFF, 0xD8, 0xFF]);
}

#[tokio::test]
async fn every_pdf_page_is_extracted_once_in_order() {
    let texts = ["one", "two", "three", "four", "five"];
    let model = Arc::new(ScriptedModel::new(&texts, STRUCTURED_REPLY));
    let harness = Harness::new(
        Some(model.clone()),
        Arc::new(FakeRasterizer::with_pages(texts.len())),
    );

    let response = harness.send(upload("scan.PDF", b"%PDF-1.4")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(model.page_requests(), 5);
    assert_eq!(page_markers(&model.structuring_prompt()), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn empty_page_reply_is_marked_in_document_text() {
    let model = Arc::new(ScriptedModel::new(&["Patient: Jane Doe", "   "], STRUCTURED_REPLY));
    let harness = Harness::new(Some(model.clone()), Arc::new(FakeRasterizer::with_pages(2)));

    let response = harness.send(upload("claim.pdf", b"%PDF-1.4")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let prompt = model.structuring_prompt();
    assert!(prompt.contains("--- Page 2 ---\n\nWarning: Model returned no content."));
}

#[tokio::test]
async fn malformed_structuring_reply_stores_nothing() {
    let model = Arc::new(ScriptedModel::new(&["text"], "{ broken json here"));
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;

    assert!(response.status().is_server_error());
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().expect("detail").contains("unparseable"));
    assert_eq!(harness.stored().await, 0);
    assert_eq!(harness.leftover_scratch_entries(), 0);
}

#[tokio::test]
async fn reply_without_confidence_is_rejected() {
    let model = Arc::new(ScriptedModel::new(
        &["text"],
        r#"{"data": {"total_amount": "$5"}}"#,
    ));
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(harness.stored().await, 0);
}

#[tokio::test]
async fn conversion_failure_still_removes_scratch_directory() {
    let model = Arc::new(ScriptedModel::new(&[], STRUCTURED_REPLY));
    let rasterizer = Arc::new(FakeRasterizer::failing());
    let harness = Harness::new(Some(model.clone()), rasterizer.clone());

    let response = harness.send(upload("claim.pdf", b"not really a pdf")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        json!({ "detail": "Failed to convert PDF to images." })
    );
    assert_eq!(rasterizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.requests.lock().expect("lock").len(), 0);
    assert_eq!(harness.leftover_scratch_entries(), 0);
    assert_eq!(harness.stored().await, 0);
}

#[tokio::test]
async fn model_call_failure_aborts_without_storing() {
    let harness = Harness::new(
        Some(Arc::new(UnreachableModel)),
        Arc::new(FakeRasterizer::with_pages(1)),
    );

    let response = harness.send(upload("claim.png", b"img")).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(harness.stored().await, 0);
    assert_eq!(harness.leftover_scratch_entries(), 0);
}

#[tokio::test]
async fn unconfigured_model_fails_every_extraction() {
    let harness = Harness::new(None, Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert!(body["detail"].as_str().expect("detail").contains("GOOGLE_API_KEY"));
    assert_eq!(harness.stored().await, 0);
}

#[tokio::test]
async fn unknown_document_is_not_found_for_any_question() {
    let model = Arc::new(ScriptedModel::new(&[], STRUCTURED_REPLY));
    let harness = Harness::new(Some(model.clone()), Arc::new(FakeRasterizer::with_pages(1)));

    for question in ["What is the total?", "", "Who is the patient?"] {
        let response = harness.send(ask(&Uuid::new_v4().to_string(), question)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(response).await,
            json!({ "detail": "Document not found. Please run /extract first." })
        );
    }
    assert!(model.requests.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn document_with_empty_data_cannot_be_queried() {
    let model = Arc::new(ScriptedModel::new(
        &["unreadable"],
        r#"{"data": {}, "extraction_confidence": 5}"#,
    ));
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let document_id = json_body(response).await["document_id"]
        .as_str()
        .expect("id")
        .to_string();

    let response = harness.send(ask(&document_id, "What is the total?")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await,
        json!({ "detail": "Could not find 'data' for the specified document." })
    );
}

#[tokio::test]
async fn metrics_reflect_extractions_and_answers() {
    let model = Arc::new(ScriptedModel::new(&["Patient: Jane Doe"], STRUCTURED_REPLY));
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;
    let document_id = json_body(response).await["document_id"]
        .as_str()
        .expect("id")
        .to_string();
    let response = harness.send(ask(&document_id, "What is the total?")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = harness
        .send(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    let metrics = json_body(response).await;
    assert_eq!(metrics["documents_extracted"], 1);
    assert_eq!(metrics["pages_extracted"], 1);
    assert_eq!(metrics["questions_answered"], 1);
    assert_eq!(metrics["documents_stored"], 1);
    assert_eq!(metrics["extraction_failures"], 0);
}

async fn metrics(harness: &Harness) -> Value {
    let response = harness
        .send(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    json_body(response).await
}

async fn extract_id(harness: &Harness, file_name: &str, contents: &[u8]) -> String {
    let response = harness.send(upload(file_name, contents)).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["document_id"]
        .as_str()
        .expect("id")
        .to_string()
}

#[tokio::test]
async fn failed_answer_leaves_document_answerable() {
    let model = Arc::new(
        ScriptedModel::new(&["Total: $120"], STRUCTURED_REPLY)
            .with_answers(&["I cannot answer that", r#"{"answer": "$120"}"#]),
    );
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));
    let document_id = extract_id(&harness, "claim.png", b"img").await;

    for _ in 0..2 {
        let response = harness.send(ask(&document_id, "What is the total?")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(json_body(response).await["detail"].is_string());
    }
    assert_eq!(harness.stored().await, 1);
    assert_eq!(metrics(&harness).await["questions_answered"], 0);

    let response = harness.send(ask(&document_id, "What is the total?")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let answer = json_body(response).await;
    assert_eq!(answer["answer"], "$120");
    assert_eq!(answer["answer_confidence"], 88);
    assert_eq!(harness.stored().await, 1);
    assert_eq!(metrics(&harness).await["questions_answered"], 1);
}

#[tokio::test]
async fn data_with_only_null_fields_is_still_answerable() {
    let model = Arc::new(ScriptedModel::new(
        &["blurry"],
        r#"{"data": {"patient": null, "diagnoses": [], "total_amount": null}, "extraction_confidence": 10}"#,
    ));
    let harness = Harness::new(Some(model), Arc::new(FakeRasterizer::with_pages(1)));
    let document_id = extract_id(&harness, "claim.png", b"img").await;

    let response = harness.send(ask(&document_id, "What is the total?")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn model_output_outside_the_schema_is_echoed_verbatim() {
    let data = json!({
        "patient": "Jane Doe",
        "medications": [null, {"name": "X", "frequency": "bd"}],
        "admission": {"was_admitted": "unknown"},
        "total_amount": {"amount": 120, "currency": "NGN"}
    });
    let reply = json!({ "data": data, "extraction_confidence": 70 }).to_string();
    let model = Arc::new(ScriptedModel::new(&["text"], &reply));
    let harness = Harness::new(Some(model.clone()), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("claim.png", b"img")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let extracted = json_body(response).await;
    assert_eq!(extracted["data"], data);

    let document_id = extracted["document_id"].as_str().expect("id").to_string();
    let response = harness.send(ask(&document_id, "What currency?")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let requests = model.requests.lock().expect("lock");
    let question = requests
        .iter()
        .find(|request| request.prompt.contains("Question:"))
        .expect("answer request");
    assert!(question.prompt.contains("\"currency\": \"NGN\""));
    assert!(question.prompt.contains("\"frequency\": \"bd\""));
}

#[tokio::test]
async fn extensionless_upload_is_sent_with_sniffed_mime_type() {
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let model = Arc::new(ScriptedModel::new(&["Patient: Jane Doe"], STRUCTURED_REPLY));
    let harness = Harness::new(Some(model.clone()), Arc::new(FakeRasterizer::with_pages(1)));

    let response = harness.send(upload("scan", &png)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let requests = model.requests.lock().expect("lock");
    let image = requests[0].image.as_ref().expect("image part");
    assert_eq!(image.mime_type, "image/png");
}
