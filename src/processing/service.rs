//! Claims service coordinating conversion, model calls, and storage.

use crate::{
    config::Config,
    llm::{GenerationRequest, GenerativeClient, InlineImage, build_generative_client},
    metrics::{MetricsSnapshot, ServiceMetrics},
    processing::{
        claim::{AnswerResult, ClaimDocument, StructuredClaimData, StructuredExtraction},
        convert::{PageRasterizer, PdfiumRasterizer},
        parse::{parse_answer, parse_structured_extraction},
        prompts::{
            EMPTY_PAGE_NOTICE, PAGE_TEXT_PROMPT, answer_prompt, append_page, structuring_prompt,
        },
        types::{ClaimsError, ConversionError, ExtractionOutcome, PageText, UploadedDocument},
    },
    store::{DocumentStore, InMemoryDocumentStore},
};
use async_trait::async_trait;
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use uuid::Uuid;

const DEFAULT_UPLOAD_NAME: &str = "upload";
const PAGES_DIR: &str = "pages";
const DOCUMENT_NOT_FOUND: &str = "Document not found. Please run /extract first.";
const DATA_NOT_FOUND: &str = "Could not find 'data' for the specified document.";

/// Runs the extraction and question-answering pipelines.
///
/// Collaborators are injected so tests can substitute the model, rasterizer, and store.
/// Construct once at startup and share through an `Arc`.
pub struct ClaimsService {
    model: Option<Arc<dyn GenerativeClient>>,
    rasterizer: Arc<dyn PageRasterizer>,
    store: Arc<dyn DocumentStore>,
    scratch_root: PathBuf,
    metrics: ServiceMetrics,
}

/// Abstraction over the claims pipeline used by the HTTP surface.
#[async_trait]
pub trait ClaimsApi: Send + Sync {
    /// Extract, structure, and store an uploaded claim document.
    async fn extract(&self, upload: UploadedDocument) -> Result<ExtractionOutcome, ClaimsError>;

    /// Answer a question about a stored document.
    async fn ask(&self, document_id: &str, question: &str) -> Result<AnswerResult, ClaimsError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    async fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl ClaimsService {
    /// Assemble a service from explicit collaborators.
    ///
    /// `model` is `None` when no credential is configured; every model-backed operation then
    /// fails with [`ClaimsError::Configuration`].
    pub fn new(
        model: Option<Arc<dyn GenerativeClient>>,
        rasterizer: Arc<dyn PageRasterizer>,
        store: Arc<dyn DocumentStore>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            model,
            rasterizer,
            store,
            scratch_root,
            metrics: ServiceMetrics::new(),
        }
    }

    /// Build the production service: Gemini, PDFium, and the in-memory store.
    pub fn from_config(config: &Config) -> Result<Self, ClaimsError> {
        let model = build_generative_client(config)?;
        let rasterizer = PdfiumRasterizer::new(config.pdf_render_dpi);
        if let Err(error) = rasterizer.probe() {
            tracing::warn!(error = %error, "PDFium unavailable; PDF uploads will fail");
        }
        tracing::info!(scratch_root = %config.scratch_dir.display(), "Claims service initialized");
        Ok(Self::new(
            model,
            Arc::new(rasterizer),
            Arc::new(InMemoryDocumentStore::new()),
            config.scratch_dir.clone(),
        ))
    }

    fn model(&self) -> Result<&dyn GenerativeClient, ClaimsError> {
        self.model.as_deref().ok_or_else(|| {
            ClaimsError::Configuration("set GOOGLE_API_KEY to enable model calls".into())
        })
    }

    /// Extract, structure, and store an uploaded document.
    ///
    /// The per-request scratch directory is removed when this returns, whatever the outcome.
    pub async fn extract(&self, upload: UploadedDocument) -> Result<ExtractionOutcome, ClaimsError> {
        let started = Instant::now();
        let result = self.run_extraction(upload).await;
        match &result {
            Ok(outcome) => {
                self.metrics.record_extraction(outcome.page_count as u64);
                tracing::info!(
                    document_id = %outcome.document_id,
                    pages = outcome.page_count,
                    extracted_at = %outcome.extracted_at,
                    diagnoses = outcome.extraction.data.diagnoses().len(),
                    medications = outcome.extraction.data.medications().len(),
                    confidence = outcome.extraction.extraction_confidence.value(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document extracted and stored"
                );
            }
            Err(error) => {
                self.metrics.record_extraction_failure();
                tracing::warn!(
                    error = %error,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Extraction failed"
                );
            }
        }
        result
    }

    async fn run_extraction(
        &self,
        upload: UploadedDocument,
    ) -> Result<ExtractionOutcome, ClaimsError> {
        let model = self.model()?;
        tokio::fs::create_dir_all(&self.scratch_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix("claim-")
            .tempdir_in(&self.scratch_root)?;

        let file_name = sanitize_file_name(upload.file_name.as_deref());
        let upload_path = scratch.path().join(&file_name);
        tokio::fs::write(&upload_path, &upload.bytes).await?;
        tracing::info!(file = %file_name, bytes = upload.bytes.len(), "Processing upload");

        let pages = if is_pdf(&file_name) {
            self.rasterize(&upload_path, &scratch.path().join(PAGES_DIR))
                .await?
        } else {
            vec![upload_path]
        };

        let mut document_text = String::new();
        for (index, page) in pages.iter().enumerate() {
            let page_number = index + 1;
            match extract_page_text(model, page).await? {
                PageText::Text(text) => append_page(&mut document_text, page_number, &text),
                PageText::Empty => {
                    tracing::warn!(page = page_number, "Model returned no text for page");
                    append_page(&mut document_text, page_number, EMPTY_PAGE_NOTICE);
                }
            }
        }

        let extraction = structure_document(model, &document_text).await?;

        let document_id = Uuid::new_v4().to_string();
        let extracted_at = current_timestamp_rfc3339();
        let document = ClaimDocument {
            extraction: extraction.clone(),
            page_count: pages.len(),
            extracted_at: extracted_at.clone(),
        };
        self.store.insert(document_id.clone(), document).await?;

        if let Err(error) = scratch.close() {
            tracing::warn!(error = %error, "Failed to remove scratch directory");
        }

        Ok(ExtractionOutcome {
            document_id,
            extraction,
            page_count: pages.len(),
            extracted_at,
        })
    }

    async fn rasterize(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ClaimsError> {
        let pages = match self.rasterizer.rasterize(pdf_path, output_dir).await {
            Ok(pages) if pages.is_empty() => Err(ConversionError::NoPages),
            other => other,
        }
        .inspect_err(|error| {
            tracing::warn!(error = %error, pdf = %pdf_path.display(), "PDF conversion failed");
        })?;
        tracing::info!(pages = pages.len(), "Converted PDF to page images");
        Ok(pages)
    }

    /// Answer `question` from the structured data stored under `document_id`.
    pub async fn ask(&self, document_id: &str, question: &str) -> Result<AnswerResult, ClaimsError> {
        let document = self
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| ClaimsError::NotFound(DOCUMENT_NOT_FOUND.into()))?;
        let data = &document.extraction.data;
        if data.is_empty() {
            return Err(ClaimsError::NotFound(DATA_NOT_FOUND.into()));
        }

        let model = self.model()?;
        let answer = answer_question(model, question, data).await?;
        self.metrics.record_answer();
        tracing::info!(
            document_id,
            extracted_at = %document.extracted_at,
            confidence = answer.answer_confidence.value(),
            "Question answered"
        );
        Ok(answer)
    }

    /// Return the current metrics snapshot.
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let stored = match self.store.len().await {
            Ok(count) => count as u64,
            Err(error) => {
                tracing::warn!(error = %error, "Document store size unavailable");
                0
            }
        };
        self.metrics.snapshot(stored)
    }
}

#[async_trait]
impl ClaimsApi for ClaimsService {
    async fn extract(&self, upload: UploadedDocument) -> Result<ExtractionOutcome, ClaimsError> {
        ClaimsService::extract(self, upload).await
    }

    async fn ask(&self, document_id: &str, question: &str) -> Result<AnswerResult, ClaimsError> {
        ClaimsService::ask(self, document_id, question).await
    }

    async fn metrics_snapshot(&self) -> MetricsSnapshot {
        ClaimsService::metrics_snapshot(self).await
    }
}

/// Send one page image to the model and return the text it sees.
pub async fn extract_page_text(
    model: &dyn GenerativeClient,
    image_path: &Path,
) -> Result<PageText, ClaimsError> {
    tracing::debug!(image = %image_path.display(), "Extracting page text");
    let data = tokio::fs::read(image_path).await?;
    let mime_type = detect_mime_type(image_path, &data);
    let request = GenerationRequest::with_image(PAGE_TEXT_PROMPT, InlineImage { mime_type, data });

    let text = model.generate(request).await?;
    if text.trim().is_empty() {
        Ok(PageText::Empty)
    } else {
        Ok(PageText::Text(text))
    }
}

/// Ask the model to structure the full document text. Single attempt.
pub async fn structure_document(
    model: &dyn GenerativeClient,
    document_text: &str,
) -> Result<StructuredExtraction, ClaimsError> {
    let raw = model
        .generate(GenerationRequest::text(structuring_prompt(document_text)))
        .await?;
    parse_structured_extraction(&raw)
        .inspect_err(|error| {
            tracing::warn!(error = %error, raw_response = %raw, "Structuring reply rejected");
        })
        .map_err(ClaimsError::from)
}

/// Ask the model to answer `question` using only `data`.
pub async fn answer_question(
    model: &dyn GenerativeClient,
    question: &str,
    data: &StructuredClaimData,
) -> Result<AnswerResult, ClaimsError> {
    let context = serde_json::to_string_pretty(data)?;
    let raw = model
        .generate(GenerationRequest::text(answer_prompt(question, &context)))
        .await?;
    parse_answer(&raw)
        .inspect_err(|error| {
            tracing::warn!(error = %error, raw_response = %raw, "Answer reply rejected");
        })
        .map_err(ClaimsError::from)
}

/// MIME type from the image's magic bytes, falling back to the file extension.
fn detect_mime_type(path: &Path, data: &[u8]) -> String {
    let sniffed = image::guess_format(data).ok().and_then(|format| match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        ImageFormat::Gif => Some("image/gif"),
        ImageFormat::Tiff => Some("image/tiff"),
        ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    });
    match sniffed {
        Some(mime_type) => mime_type.to_string(),
        None => mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

/// Reduce a client-supplied file name to its final path component.
fn sanitize_file_name(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or(DEFAULT_UPLOAD_NAME)
        .to_string()
}

fn is_pdf(file_name: &str) -> bool {
    file_name.to_ascii_lowercase().ends_with(".pdf")
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
