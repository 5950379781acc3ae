//! Gemini API Client
//!
//! Provides authenticated access to the Gemini Files, Models and
//! generateContent endpoints.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::errors::GeminiError;
use super::service::{ContentGenerator, FileResolver, FileUploader};
use super::types::{
    GenerateContentRequest, GenerateContentResponse, ModelInfo, RemoteFile, UploadFileResponse,
};

/// Public Gemini API endpoint
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// HTTP client timeout (generation over several files can be slow)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of retries for transient errors on idempotent calls
const MAX_RETRIES: u32 = 3;

/// Interval between state checks while an upload is processing
const PROCESSING_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound on processing polls (~10 minutes)
const MAX_PROCESSING_POLLS: u32 = 300;

/// Maximum number of recent errors to track
const MAX_ERROR_HISTORY: usize = 10;

/// Health status values
pub const HEALTH_HEALTHY: u8 = 0;
pub const HEALTH_DEGRADED: u8 = 1;
pub const HEALTH_UNHEALTHY: u8 = 2;

/// A recent error entry for tracking
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub timestamp: u64,
    pub operation: String,
    pub target: String,
    pub error: String,
}

/// Gemini API client
#[derive(Clone)]
pub struct GeminiClient {
    http_client: Client,
    api_key: String,
    /// API root, without the version segment
    base_url: String,
    /// Connection health (0=healthy, 1=degraded, 2=unhealthy)
    health: Arc<AtomicU8>,
    /// Recent error log
    error_log: Arc<RwLock<VecDeque<ErrorEntry>>>,
}

/// Normalize a file handle to the `files/{id}` resource form
pub fn file_path(handle: &str) -> String {
    if handle.starts_with("files/") {
        handle.to_string()
    } else {
        format!("files/{}", handle)
    }
}

/// Normalize a model name to the `models/{id}` resource form
pub fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

impl GeminiClient {
    /// Create a client for the given API key and endpoint
    pub fn new(api_key: &str, base_url: &str) -> Result<Self, GeminiError> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GeminiError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            health: Arc::new(AtomicU8::new(HEALTH_HEALTHY)),
            error_log: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_ERROR_HISTORY))),
        })
    }

    fn api_url(&self, resource: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, resource)
    }

    /// Turn a non-success response into a typed error
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GeminiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GeminiError::from_status(status.as_u16(), &body))
    }

    /// Execute an idempotent operation with retry and exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, target: &str, f: F) -> Result<T, GeminiError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GeminiError>>,
    {
        let backoff_ms = [500u64, 1000, 2000];
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(result) => {
                    self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) => {
                    if !e.is_transient() || attempt >= MAX_RETRIES {
                        self.record_failure(operation, target, &e);
                        return Err(e);
                    }

                    let delay = backoff_ms.get(attempt as usize).copied().unwrap_or(2000);
                    warn!(
                        operation = operation,
                        target = target,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "Retrying Gemini operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Update health and the error ring buffer after a final failure
    fn record_failure(&self, operation: &str, target: &str, error: &GeminiError) {
        match error {
            GeminiError::Network(_) | GeminiError::Timeout => {
                self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed)
            }
            GeminiError::RateLimited | GeminiError::Server(_, _) => {
                self.health.store(HEALTH_DEGRADED, Ordering::Relaxed)
            }
            _ => {}
        }

        let entry = ErrorEntry {
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            operation: operation.to_string(),
            target: target.to_string(),
            error: error.to_string(),
        };

        let mut log = self.error_log.write().unwrap_or_else(PoisonError::into_inner);
        if log.len() >= MAX_ERROR_HISTORY {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Get connection health status string
    pub fn health_status(&self) -> &'static str {
        match self.health.load(Ordering::Relaxed) {
            HEALTH_HEALTHY => "healthy",
            HEALTH_DEGRADED => "degraded",
            _ => "unhealthy",
        }
    }

    /// Get recent errors
    pub fn error_history(&self) -> Vec<ErrorEntry> {
        self.error_log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Fetch file metadata by handle
    pub async fn get_file(&self, handle: &str) -> Result<RemoteFile, GeminiError> {
        let url = self.api_url(&file_path(handle));
        let url = url.as_str();

        self.with_retry("get_file", handle, || async move {
            debug!(handle = handle, "Fetching file from Gemini");
            let response = self
                .http_client
                .get(url)
                .header("x-goog-api-key", &self.api_key)
                .send()
                .await?;
            let file: RemoteFile = Self::check(response).await?.json().await?;
            Ok(file)
        })
        .await
    }

    /// Delete an uploaded file
    pub async fn delete_file(&self, handle: &str) -> Result<(), GeminiError> {
        let url = self.api_url(&file_path(handle));

        info!(handle = handle, "Deleting file from Gemini");

        let response = self
            .http_client
            .delete(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        if let Err(e) = Self::check(response).await {
            self.record_failure("delete_file", handle, &e);
            return Err(e);
        }
        Ok(())
    }

    /// Upload file content using the resumable upload protocol
    ///
    /// # Arguments
    /// * `data` - File content bytes
    /// * `display_name` - Name shown in listings and citations
    /// * `mime_type` - MIME type of the content
    ///
    /// # Returns
    /// The remote file as reported right after upload (may still be processing)
    pub async fn upload_file(
        &self,
        data: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        let start_url = format!("{}/upload/v1beta/files", self.base_url);

        info!(
            display_name = display_name,
            size = data.len(),
            mime_type = mime_type,
            "Uploading file to Gemini"
        );

        let response = self
            .http_client
            .post(&start_url)
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", data.len())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "displayName": display_name } }))
            .send()
            .await?;
        let response = Self::check(response).await?;

        let upload_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| GeminiError::Upload("missing x-goog-upload-url header".into()))?;

        debug!(url = %upload_url, "Got Gemini upload URL");

        let response = self
            .http_client
            .post(&upload_url)
            .header("Content-Length", data.len())
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(data)
            .send()
            .await?;

        let uploaded: UploadFileResponse = Self::check(response).await?.json().await?;

        info!(
            handle = %uploaded.file.name,
            state = ?uploaded.file.state,
            "File uploaded to Gemini"
        );
        Ok(uploaded.file)
    }

    /// Poll a freshly uploaded file until it leaves the PROCESSING state
    pub async fn wait_until_active(&self, mut file: RemoteFile) -> Result<RemoteFile, GeminiError> {
        let mut polls = 0;
        while file.state == super::FileState::Processing {
            if polls >= MAX_PROCESSING_POLLS {
                return Err(GeminiError::Upload(format!(
                    "{} is still processing after {} checks",
                    file.name, polls
                )));
            }
            debug!(handle = %file.name, "Upload still processing");
            tokio::time::sleep(PROCESSING_POLL_INTERVAL).await;
            file = self.get_file(&file.name).await?;
            polls += 1;
        }

        if !file.is_active() {
            return Err(GeminiError::Upload(format!(
                "{} ended in state {:?}",
                file.name, file.state
            )));
        }
        Ok(file)
    }

    /// Look up model metadata
    pub async fn get_model(&self, model: &str) -> Result<ModelInfo, GeminiError> {
        let url = self.api_url(&model_path(model));
        let url = url.as_str();

        self.with_retry("get_model", model, || async move {
            let response = self
                .http_client
                .get(url)
                .header("x-goog-api-key", &self.api_key)
                .send()
                .await?;
            let info: ModelInfo = Self::check(response).await?.json().await?;
            Ok(info)
        })
        .await
    }

    /// Run a one-shot generation request
    pub async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let url = self.api_url(&format!("{}:generateContent", model_path(model)));

        debug!(model = model, "Calling generateContent");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        match Self::check(response).await {
            Ok(response) => {
                self.health.store(HEALTH_HEALTHY, Ordering::Relaxed);
                Ok(response.json().await?)
            }
            Err(e) => {
                self.record_failure("generate_content", model, &e);
                Err(e)
            }
        }
    }

    /// Run a streaming generation request (server-sent events)
    ///
    /// Text chunks are forwarded on the returned channel; the channel closes
    /// when the stream ends.
    pub async fn stream_generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<mpsc::Receiver<Result<String, GeminiError>>, GeminiError> {
        let url = self.api_url(&format!(
            "{}:streamGenerateContent?alt=sse",
            model_path(model)
        ));

        debug!(model = model, "Calling streamGenerateContent");

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;
        let response = match Self::check(response).await {
            Ok(response) => response,
            Err(e) => {
                self.record_failure("stream_generate_content", model, &e);
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for payload in decoder.push(&bytes) {
                            if !forward_event(&tx, &payload).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            if let Some(payload) = decoder.finish() {
                forward_event(&tx, &payload).await;
            }
        });

        Ok(rx)
    }
}

/// Parse one SSE payload and send its text; false once the receiver is gone
async fn forward_event(tx: &mpsc::Sender<Result<String, GeminiError>>, payload: &str) -> bool {
    let message = match serde_json::from_str::<GenerateContentResponse>(payload) {
        Ok(event) => {
            let text = event.text();
            if text.is_empty() {
                return true;
            }
            Ok(text)
        }
        Err(e) => Err(GeminiError::Decode(e.to_string())),
    };
    tx.send(message).await.is_ok()
}

/// Line-oriented decoder for `data:` events of a server-sent event stream
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning the payloads of every completed data line
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing line that had no newline
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches(&['\r', '\n'][..]);
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data.to_string())
    }
}

#[async_trait]
impl FileResolver for GeminiClient {
    type Resolved = RemoteFile;

    async fn resolve_handle(&self, handle: &str) -> Result<RemoteFile, GeminiError> {
        self.get_file(handle).await
    }
}

#[async_trait]
impl ContentGenerator for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        self.generate_content(model, request).await
    }

    async fn generate_stream(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<mpsc::Receiver<Result<String, GeminiError>>, GeminiError> {
        self.stream_generate_content(model, request).await
    }

    async fn model_info(&self, model: &str) -> Result<ModelInfo, GeminiError> {
        self.get_model(model).await
    }

    fn health(&self) -> &'static str {
        self.health_status()
    }

    fn recent_errors(&self) -> Vec<String> {
        self.error_history()
            .into_iter()
            .map(|e| format!("[{}] {} {}: {}", e.timestamp, e.operation, e.target, e.error))
            .collect()
    }
}

#[async_trait]
impl FileUploader for GeminiClient {
    async fn upload_active(
        &self,
        data: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        let file = self.upload_file(data, display_name, mime_type).await?;
        self.wait_until_active(file).await
    }
}
