//! In-memory fakes for the remote service seams

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::gemini::{
    Candidate, Content, ContentGenerator, FileResolver, FileState, FileUploader, GeminiError,
    GenerateContentRequest, GenerateContentResponse, GroundingMetadata, ModelInfo, Part,
    RemoteFile,
};

/// Resolver backed by a map, counting calls per handle
#[derive(Default)]
pub struct MockResolver {
    files: Mutex<HashMap<String, RemoteFile>>,
    failures: Mutex<HashMap<String, GeminiError>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

pub fn remote_file(handle: &str, size: u64) -> RemoteFile {
    RemoteFile {
        name: handle.to_string(),
        display_name: handle.trim_start_matches("files/").to_string(),
        mime_type: "text/plain".to_string(),
        size_bytes: size,
        uri: format!("https://example.test/v1beta/{}", handle),
        state: FileState::Active,
        ..Default::default()
    }
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, handle: &str, size: u64) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(handle.to_string(), remote_file(handle, size));
        self
    }

    pub fn with_failure(self, handle: &str, error: GeminiError) -> Self {
        self.fail(handle, error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail(&self, handle: &str, error: GeminiError) {
        self.failures
            .lock()
            .unwrap()
            .insert(handle.to_string(), error);
    }

    pub fn set_state(&self, handle: &str, state: FileState) {
        if let Some(file) = self.files.lock().unwrap().get_mut(handle) {
            file.state = state;
        }
    }

    pub fn calls(&self, handle: &str) -> usize {
        self.calls.lock().unwrap().get(handle).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FileResolver for MockResolver {
    type Resolved = RemoteFile;

    async fn resolve_handle(&self, handle: &str) -> Result<RemoteFile, GeminiError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(handle.to_string())
            .or_default() += 1;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.failures.lock().unwrap().get(handle) {
            return Err(err.clone());
        }
        self.files
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or_else(|| GeminiError::NotFound(handle.to_string()))
    }
}

/// Generator that answers with fixed text and records every request
pub struct MockGenerator {
    answer: String,
    grounding: Option<GroundingMetadata>,
    fail: bool,
    models: HashSet<String>,
    requests: Mutex<Vec<(String, GenerateContentRequest)>>,
    model_lookups: Mutex<usize>,
}

impl MockGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            grounding: None,
            fail: false,
            models: ["gemini-2.5-flash", "gemini-2.5-pro"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            requests: Mutex::new(Vec::new()),
            model_lookups: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn with_grounding(mut self, grounding: GroundingMetadata) -> Self {
        self.grounding = Some(grounding);
        self
    }

    pub fn requests(&self) -> Vec<(String, GenerateContentRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn model_lookups(&self) -> usize {
        *self.model_lookups.lock().unwrap()
    }

    fn record(&self, model: &str, request: &GenerateContentRequest) -> Result<(), GeminiError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        if self.fail {
            return Err(GeminiError::Server(500, "generation failed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentGenerator for MockGenerator {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        self.record(model, request)?;
        Ok(GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".into()),
                    parts: vec![Part::text(self.answer.clone())],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: self.grounding.clone(),
            }],
            ..Default::default()
        })
    }

    async fn generate_stream(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<mpsc::Receiver<Result<String, GeminiError>>, GeminiError> {
        self.record(model, request)?;
        let words: Vec<&str> = self.answer.split_inclusive(' ').collect();
        let (tx, rx) = mpsc::channel(words.len().max(1));
        for word in words {
            let _ = tx.send(Ok(word.to_string())).await;
        }
        Ok(rx)
    }

    async fn model_info(&self, model: &str) -> Result<ModelInfo, GeminiError> {
        *self.model_lookups.lock().unwrap() += 1;
        let name = model.trim_start_matches("models/");
        if !self.models.contains(name) {
            return Err(GeminiError::NotFound(format!("models/{}", name)));
        }
        Ok(ModelInfo {
            name: format!("models/{}", name),
            display_name: name.to_string(),
            input_token_limit: 1_048_576,
            output_token_limit: 65_536,
            supported_generation_methods: vec!["generateContent".into()],
            ..Default::default()
        })
    }
}

/// Uploader that assigns sequential handles and can reject named files
#[derive(Default)]
pub struct MockUploader {
    uploads: Mutex<Vec<(String, String, usize)>>,
    reject: HashSet<String>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, display_name: &str) -> Self {
        self.reject.insert(display_name.to_string());
        self
    }

    /// (display_name, mime_type, byte count) per successful upload
    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileUploader for MockUploader {
    async fn upload_active(
        &self,
        data: Vec<u8>,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        if self.reject.contains(display_name) {
            return Err(GeminiError::Upload(format!("{} rejected", display_name)));
        }
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((display_name.to_string(), mime_type.to_string(), data.len()));
        let handle = format!("files/upload{}", uploads.len());
        Ok(RemoteFile {
            display_name: display_name.to_string(),
            mime_type: mime_type.to_string(),
            ..remote_file(&handle, data.len() as u64)
        })
    }
}
