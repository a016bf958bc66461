use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct ServiceMetrics {
    documents_extracted: AtomicU64,
    pages_extracted: AtomicU64,
    questions_answered: AtomicU64,
    extraction_failures: AtomicU64,
}

impl ServiceMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stored document and the number of pages extracted for it.
    pub fn record_extraction(&self, page_count: u64) {
        self.documents_extracted.fetch_add(1, Ordering::Relaxed);
        self.pages_extracted.fetch_add(page_count, Ordering::Relaxed);
    }

    /// Record an `/extract` call that ended in an error.
    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successfully answered question.
    pub fn record_answer(&self) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters alongside the store size.
    pub fn snapshot(&self, documents_stored: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_extracted: self.documents_extracted.load(Ordering::Relaxed),
            pages_extracted: self.pages_extracted.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            documents_stored,
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents extracted and stored since startup.
    pub documents_extracted: u64,
    /// Page images sent for text extraction across stored documents.
    pub pages_extracted: u64,
    /// Questions answered since startup.
    pub questions_answered: u64,
    /// `/extract` calls that failed.
    pub extraction_failures: u64,
    /// Documents currently held by the store.
    pub documents_stored: u64,
}
