use async_trait::async_trait;
use lbship_core::AccessRecord;
use thiserror::Error;

/// Bulk write failure. The batch that hit it is not retried.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("bulk request to {node} failed: {reason}")]
    Transport { node: String, reason: String },

    #[error("bulk request to {node} returned HTTP {status}: {body}")]
    Status {
        node: String,
        status: u16,
        body: String,
    },

    #[error("bulk response from {node} could not be decoded: {reason}")]
    Response { node: String, reason: String },

    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Per-document outcome of an accepted bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub indexed: usize,
    /// Documents the backend rejected individually (mapping conflicts etc.).
    pub failed: usize,
}

/// Document store that accepts batches of records.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn bulk(&self, index: &str, docs: &[AccessRecord]) -> Result<BulkOutcome, SinkError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "storage"
    }
}
