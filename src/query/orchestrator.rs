//! Query Orchestrator
//!
//! Turns a question about a store into a generation request: picks the
//! store's files, resolves their handles through the handle cache, attaches
//! them to the prompt and hands the result to the generation endpoint.
//! Retrieval itself happens server-side.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::models::ModelCatalog;
use super::prompts;
use super::response::SearchResponse;
use crate::cache::{CacheStats, HandleCache};
use crate::gemini::{
    Content, ContentGenerator, FileResolver, GeminiError, GenerateContentRequest,
    GenerationConfig, ModelInfo, Part, RemoteFile,
};
use crate::store::{StoreRegistry, StoredFile};

/// Generation knobs for one query
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Replaces the default RAG system prompt
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    /// Attach at most this many files, smallest first
    pub max_files: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.1,
            max_output_tokens: Some(2048),
            max_files: Some(5),
        }
    }
}

impl SearchOptions {
    /// Deterministic, short answers
    pub fn question() -> Self {
        Self {
            temperature: 0.0,
            max_output_tokens: Some(1024),
            max_files: Some(3),
            ..Self::default()
        }
    }

    pub fn summary() -> Self {
        Self {
            temperature: 0.3,
            max_output_tokens: Some(3072),
            max_files: Some(7),
            ..Self::default()
        }
    }
}

/// A streamed answer and the files that went into it
pub struct AnswerStream {
    pub chunks: mpsc::Receiver<Result<String, GeminiError>>,
    pub files_used: usize,
    pub files_skipped: usize,
}

struct Prepared {
    request: GenerateContentRequest,
    files_used: usize,
    files_skipped: usize,
}

pub fn empty_store_message(store: &str) -> String {
    format!(
        "No files found in store '{}'. Please upload some documents first.",
        store
    )
}

/// Keep the `max_files` smallest files; ties keep upload order
fn select_files(mut files: Vec<StoredFile>, max_files: Option<usize>) -> Vec<StoredFile> {
    if let Some(max) = max_files {
        if files.len() > max {
            let total = files.len();
            files.sort_by_key(|f| f.size_bytes);
            files.truncate(max);
            let selected: u64 = files.iter().map(|f| f.size_bytes).sum();
            info!(
                selected = max,
                total,
                selected_mb = %format!("{:.1}", selected as f64 / (1024.0 * 1024.0)),
                "Limiting files for faster response"
            );
        }
    }
    files
}

pub struct QueryOrchestrator<R, G>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    registry: Arc<StoreRegistry>,
    cache: Arc<HandleCache<R>>,
    generator: Arc<G>,
    models: ModelCatalog<G>,
    model: RwLock<String>,
}

impl<R, G> QueryOrchestrator<R, G>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    pub fn new(
        registry: Arc<StoreRegistry>,
        cache: Arc<HandleCache<R>>,
        generator: Arc<G>,
        model: &str,
    ) -> Self {
        Self {
            registry,
            cache,
            models: ModelCatalog::new(generator.clone()),
            generator,
            model: RwLock::new(model.trim_start_matches("models/").to_string()),
        }
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    pub fn current_model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve every handle through the cache and build the request.
    /// Files that fail to resolve, or are not usable yet, are skipped.
    async fn prepare(
        &self,
        prompt: String,
        files: &[StoredFile],
        options: &SearchOptions,
    ) -> Result<Prepared> {
        let mut parts = Vec::with_capacity(files.len() + 1);
        parts.push(Part::text(prompt));
        let mut skipped = 0;

        for stored in files {
            match self.cache.resolve(&stored.name).await {
                Ok(file) if file.is_active() => parts.push(Part::file(&file)),
                Ok(file) => {
                    // still processing or failed; look it up again next time
                    self.cache.invalidate(&stored.name);
                    warn!(handle = %stored.name, state = ?file.state, "Skipping file that is not active");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(handle = %stored.name, error = %e, "Could not access file");
                    skipped += 1;
                }
            }
        }

        let used = parts.len() - 1;
        if used == 0 {
            bail!("None of the {} selected files could be accessed", files.len());
        }

        let system = options
            .system_prompt
            .clone()
            .unwrap_or_else(|| prompts::RAG_SYSTEM_PROMPT.to_string());

        Ok(Prepared {
            request: GenerateContentRequest {
                contents: vec![Content {
                    role: Some("user".to_string()),
                    parts,
                }],
                system_instruction: Some(Content {
                    role: None,
                    parts: vec![Part::text(system)],
                }),
                generation_config: Some(GenerationConfig {
                    temperature: options.temperature,
                    max_output_tokens: options.max_output_tokens,
                }),
            },
            files_used: used,
            files_skipped: skipped,
        })
    }

    /// Generate over an already-selected file set
    async fn generate_over(
        &self,
        prompt: String,
        label: &str,
        files: &[StoredFile],
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let model = self.current_model();
        let prepared = self.prepare(prompt, files, options).await?;

        debug!(
            model = %model,
            files = prepared.files_used,
            skipped = prepared.files_skipped,
            "Sending generation request"
        );

        let response = self
            .generator
            .generate(&model, &prepared.request)
            .await
            .context("Generation request failed")?;

        info!(files = prepared.files_used, "Generated response");

        Ok(SearchResponse::from_generation(
            &response,
            label,
            &model,
            prepared.files_used,
            prepared.files_skipped,
        ))
    }

    async fn run(
        &self,
        prompt: String,
        label: &str,
        store: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let files = self.registry.list_files(store)?;
        if files.is_empty() {
            return Ok(SearchResponse::notice(
                empty_store_message(store),
                label,
                &self.current_model(),
            ));
        }
        let files = select_files(files, options.max_files);
        self.generate_over(prompt, label, &files, options).await
    }

    /// Answer `query` from the files of `store`
    pub async fn search_and_generate(
        &self,
        query: &str,
        store: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        info!(store = store, query = %query.chars().take(100).collect::<String>(), "Searching store");
        self.run(prompts::search_prompt(query), query, store, options)
            .await
    }

    /// Like [`search_and_generate`](Self::search_and_generate) but yields the
    /// answer text as it is produced
    pub async fn search_stream(
        &self,
        query: &str,
        store: &str,
        options: &SearchOptions,
    ) -> Result<AnswerStream> {
        let files = self.registry.list_files(store)?;
        if files.is_empty() {
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.send(Ok(empty_store_message(store))).await;
            return Ok(AnswerStream {
                chunks: rx,
                files_used: 0,
                files_skipped: 0,
            });
        }

        let files = select_files(files, options.max_files);
        let prepared = self
            .prepare(prompts::search_prompt(query), &files, options)
            .await?;
        let chunks = self
            .generator
            .generate_stream(&self.current_model(), &prepared.request)
            .await
            .context("Streaming generation request failed")?;

        Ok(AnswerStream {
            chunks,
            files_used: prepared.files_used,
            files_skipped: prepared.files_skipped,
        })
    }

    /// Search across several stores at once. A handle present in more than
    /// one store is attached once.
    pub async fn search_multiple_stores(
        &self,
        query: &str,
        stores: &[String],
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for store in stores {
            for file in self.registry.list_files(store)? {
                if seen.insert(file.name.clone()) {
                    files.push(file);
                }
            }
        }

        if files.is_empty() {
            return Ok(SearchResponse::notice(
                format!("No files found in stores: {}", stores.join(", ")),
                query,
                &self.current_model(),
            ));
        }

        info!(stores = stores.len(), files = files.len(), "Searching multiple stores");
        let files = select_files(files, options.max_files);
        self.generate_over(prompts::search_prompt(query), query, &files, options)
            .await
    }

    pub async fn ask_question(
        &self,
        question: &str,
        store: &str,
        context: Option<&str>,
    ) -> Result<SearchResponse> {
        self.run(
            prompts::qa_prompt(question, context),
            question,
            store,
            &SearchOptions::question(),
        )
        .await
    }

    pub async fn summarize_documents(
        &self,
        store: &str,
        focus_topic: Option<&str>,
    ) -> Result<SearchResponse> {
        self.run(
            prompts::summary_prompt(focus_topic),
            "Document summarization",
            store,
            &SearchOptions::summary(),
        )
        .await
    }

    /// Run queries one after another, pausing `delay` between them.
    /// A failed query yields an error response instead of aborting the batch.
    pub async fn batch_search(
        &self,
        queries: &[String],
        store: &str,
        delay: Duration,
    ) -> Vec<SearchResponse> {
        let mut results = Vec::with_capacity(queries.len());

        for (i, query) in queries.iter().enumerate() {
            info!(n = i + 1, total = queries.len(), "Processing batch query");
            let response = match self
                .search_and_generate(query, store, &SearchOptions::default())
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(n = i + 1, error = %format!("{:#}", e), "Batch query failed");
                    SearchResponse::notice(
                        format!("Error processing query: {:#}", e),
                        query,
                        &self.current_model(),
                    )
                }
            };
            results.push(response);

            if i + 1 < queries.len() {
                tokio::time::sleep(delay).await;
            }
        }

        info!(count = queries.len(), "Completed batch");
        results
    }

    /// Switch the generation model after checking it exists
    pub async fn set_model(&self, name: &str) -> Result<ModelInfo> {
        let info = self
            .models
            .get(name)
            .await
            .with_context(|| format!("Cannot switch to model '{}'", name))?;

        let name = name.trim_start_matches("models/").to_string();
        info!(model = %name, "Switched model");
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = name;
        Ok(info)
    }

    pub async fn model_info(&self) -> Result<ModelInfo> {
        let model = self.current_model();
        self.models
            .get(&model)
            .await
            .with_context(|| format!("Could not retrieve model info for '{}'", model))
    }

    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
        self.models.invalidate_all();
        info!("File cache cleared");
    }

    pub fn remote_health(&self) -> &'static str {
        self.generator.health()
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.generator.recent_errors()
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache.ttl()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn log_metrics(&self) {
        self.cache.log_metrics();
    }
}
