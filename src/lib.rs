#![deny(missing_docs)]

//! Core library for the claims QA service.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Generative model client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Claim extraction and question-answering pipeline.
pub mod processing;
/// Storage for extracted documents.
pub mod store;
