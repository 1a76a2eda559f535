use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    requests_served: AtomicU64,
    requests_failed: AtomicU64,
    documents_processed: AtomicU64,
    chunks_embedded: AtomicU64,
    questions_answered: AtomicU64,
    last_chunk_count: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that made it through chunking and embedding.
    pub fn record_document(&self, chunk_count: u64) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded.fetch_add(chunk_count, Ordering::Relaxed);
        self.last_chunk_count.store(chunk_count, Ordering::Relaxed);
    }

    /// Record a request that returned answers.
    pub fn record_success(&self, question_count: u64) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        self.questions_answered.fetch_add(question_count, Ordering::Relaxed);
    }

    /// Record a request that ended in an error.
    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_chunk_count = self.last_chunk_count.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_served: self.requests_served.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            last_chunk_count: (last_chunk_count > 0).then_some(last_chunk_count),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Requests that returned answers since startup.
    pub requests_served: u64,
    /// Requests that ended in an error since startup.
    pub requests_failed: u64,
    /// Documents that were chunked and embedded.
    pub documents_processed: u64,
    /// Total chunks embedded across all documents.
    pub chunks_embedded: u64,
    /// Total questions answered.
    pub questions_answered: u64,
    /// Chunk count of the most recent document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_chunk_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_requests() {
        let metrics = PipelineMetrics::new();
        metrics.record_document(2);
        metrics.record_document(3);
        metrics.record_success(4);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_processed, 2);
        assert_eq!(snapshot.chunks_embedded, 5);
        assert_eq!(snapshot.last_chunk_count, Some(3));
        assert_eq!(snapshot.requests_served, 1);
        assert_eq!(snapshot.questions_answered, 4);
        assert_eq!(snapshot.requests_failed, 1);
    }

    #[test]
    fn empty_snapshot_omits_last_chunk_count() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.requests_served, 0);
        assert_eq!(snapshot.last_chunk_count, None);
        let json = serde_json::to_value(snapshot).expect("serialize");
        assert!(json.get("last_chunk_count").is_none());
    }
}
