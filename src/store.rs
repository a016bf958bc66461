//! Storage for extracted claim documents.

use crate::processing::ClaimDocument;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors raised by document store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not serve the request.
    #[error("document store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed storage of extracted documents. Records are never mutated or removed.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Store `document` under a freshly minted `document_id`.
    async fn insert(&self, document_id: String, document: ClaimDocument) -> Result<(), StoreError>;

    /// Fetch a copy of the document stored under `document_id`.
    async fn get(&self, document_id: &str) -> Result<Option<ClaimDocument>, StoreError>;

    /// Number of stored documents.
    async fn len(&self) -> Result<usize, StoreError>;
}

/// Process-lifetime store backed by a locked `HashMap`.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, ClaimDocument>>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(&self, document_id: String, document: ClaimDocument) -> Result<(), StoreError> {
        self.documents.write().await.insert(document_id, document);
        Ok(())
    }

    async fn get(&self, document_id: &str) -> Result<Option<ClaimDocument>, StoreError> {
        Ok(self.documents.read().await.get(document_id).cloned())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.documents.read().await.len())
    }
}
