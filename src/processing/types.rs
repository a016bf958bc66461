//! Error definitions and request/response types for the claims pipeline.

use crate::llm::ModelClientError;
use crate::processing::claim::StructuredExtraction;
use crate::store::StoreError;
use thiserror::Error;

/// Errors produced while rasterizing a PDF into page images.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// PDFium could not be loaded.
    #[error("PDFium library unavailable: {0}")]
    LibraryUnavailable(String),
    /// The file could not be opened as a PDF.
    #[error("failed to load PDF: {0}")]
    Load(String),
    /// The PDF requires a password.
    #[error("PDF is password protected")]
    Encrypted,
    /// A single page failed to render or encode.
    #[error("failed to render page {page}: {reason}")]
    Render {
        /// One-based page number.
        page: usize,
        /// Underlying failure.
        reason: String,
    },
    /// Conversion succeeded but yielded zero pages.
    #[error("PDF produced no pages")]
    NoPages,
    /// The blocking rasterization task panicked or was cancelled.
    #[error("rasterization task failed: {0}")]
    Task(String),
    /// Writing page images failed.
    #[error("page image I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while interpreting model output as JSON.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The model produced no text.
    #[error("model returned an empty response")]
    Empty,
    /// The text is not JSON.
    #[error("model response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The JSON does not carry the expected keys or types.
    #[error("model response does not match the expected shape: {0}")]
    UnexpectedShape(#[source] serde_json::Error),
}

/// Errors emitted by the claims pipeline.
#[derive(Debug, Error)]
pub enum ClaimsError {
    /// No model client is configured.
    #[error("Model client is not configured: {0}")]
    Configuration(String),
    /// PDF rasterization failed.
    #[error("Failed to convert PDF to images: {0}")]
    Conversion(#[from] ConversionError),
    /// The model call itself failed.
    #[error("Model call failed: {0}")]
    Model(#[from] ModelClientError),
    /// The model answered with something other than the expected JSON.
    #[error("Upstream returned unparseable data: {0}")]
    Parse(#[from] ParseError),
    /// Unknown document id, or a stored record without data.
    #[error("{0}")]
    NotFound(String),
    /// The request did not carry what the endpoint needs.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    /// The upload exceeded the configured body limit.
    #[error("{0}")]
    UploadTooLarge(String),
    /// Stored claim data could not be encoded for the answer prompt.
    #[error("Failed to encode claim data: {0}")]
    Encode(#[from] serde_json::Error),
    /// The document store rejected an operation.
    #[error("Document store failed: {0}")]
    Store(#[from] StoreError),
    /// Scratch file handling failed.
    #[error("Scratch storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A file received by `/extract`.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Client-supplied file name, if any.
    pub file_name: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

/// Text extracted from one page image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageText {
    /// The model returned text.
    Text(String),
    /// The model returned nothing for this page.
    Empty,
}

/// Summary of a completed `/extract` call.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    /// Identifier under which the document was stored.
    pub document_id: String,
    /// Structured data and confidence.
    pub extraction: StructuredExtraction,
    /// Number of pages sent for text extraction.
    pub page_count: usize,
    /// RFC 3339 timestamp recorded with the stored document.
    pub extracted_at: String,
}
