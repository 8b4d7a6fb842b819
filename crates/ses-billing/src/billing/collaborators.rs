use async_trait::async_trait;

use super::order::OrderDetails;
use super::request::RequestDetails;

/// Rendered document ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turns a details payload into a printable document.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render_order(
        &self,
        details: &OrderDetails,
    ) -> Result<RenderedDocument, CollaboratorError>;
    async fn render_request(
        &self,
        details: &RequestDetails,
    ) -> Result<RenderedDocument, CollaboratorError>;
}

/// Persists rendered documents and returns their URL.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, document: RenderedDocument)
        -> Result<String, CollaboratorError>;
}

/// Failure of an outbound collaborator. Always retryable; the document is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("document renderer unavailable: {0}")]
    Renderer(String),
    #[error("object storage unavailable: {0}")]
    Storage(String),
}
