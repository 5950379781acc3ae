//! Remote service seams
//!
//! The handle cache and the query orchestrator talk to the remote service
//! through these traits so tests can substitute in-memory fakes.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::errors::GeminiError;
use super::types::{GenerateContentRequest, GenerateContentResponse, ModelInfo, RemoteFile};

/// Turns a file handle into a content-bearing object usable in generation
#[async_trait]
pub trait FileResolver: Send + Sync {
    /// Whatever the remote client hands back for a handle
    type Resolved: Send + Sync;

    /// Single-handle resolution call
    async fn resolve_handle(&self, handle: &str) -> Result<Self::Resolved, GeminiError>;
}

/// Generation endpoint
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// One-shot generation
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError>;

    /// Streaming generation; yields text chunks as they arrive
    async fn generate_stream(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<mpsc::Receiver<Result<String, GeminiError>>, GeminiError>;

    /// Model metadata lookup
    async fn model_info(&self, model: &str) -> Result<ModelInfo, GeminiError>;

    /// Connection health as last observed
    fn health(&self) -> &'static str {
        "healthy"
    }

    /// Recent failures, newest last
    fn recent_errors(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Upload endpoint
#[async_trait]
pub trait FileUploader: Send + Sync {
    /// Upload content and return the remote file once it is usable
    async fn upload_active(
        &self,
        data: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError>;
}
