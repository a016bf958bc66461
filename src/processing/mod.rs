//! Claim processing pipeline: conversion, model prompts, parsing, and orchestration.

pub mod claim;
pub mod convert;
pub mod parse;
pub mod prompts;
mod service;
pub mod types;

pub use claim::{
    AdmissionDetails, AnswerResult, ClaimDocument, Confidence, Medication, PatientInfo,
    StructuredClaimData, StructuredExtraction,
};
pub use convert::{PageRasterizer, PdfiumRasterizer, page_file_name};
pub use service::{
    ClaimsApi, ClaimsService, answer_question, extract_page_text, structure_document,
};
pub use types::{
    ClaimsError, ConversionError, ExtractionOutcome, PageText, ParseError, UploadedDocument,
};
