//! Model metadata cache
//!
//! Model descriptions change rarely, so lookups are cached for a while
//! using Moka. Concurrent lookups of the same model share one request.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::gemini::{ContentGenerator, GeminiError, ModelInfo};

/// How long model metadata stays cached
pub const MODEL_INFO_TTL: Duration = Duration::from_secs(600);

pub struct ModelCatalog<G: ContentGenerator> {
    generator: Arc<G>,
    cache: Cache<String, ModelInfo>,
}

impl<G: ContentGenerator> ModelCatalog<G> {
    pub fn new(generator: Arc<G>) -> Self {
        Self::with_ttl(generator, MODEL_INFO_TTL)
    }

    pub fn with_ttl(generator: Arc<G>, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .time_to_live(ttl)
            .max_capacity(64)
            .name("model_info_cache")
            .build();
        Self { generator, cache }
    }

    /// Metadata for `model`; failures are not cached
    pub async fn get(&self, model: &str) -> Result<ModelInfo, GeminiError> {
        let key = model.trim_start_matches("models/").to_string();
        let generator = self.generator.clone();
        let lookup = key.clone();

        self.cache
            .try_get_with(key, async move {
                debug!(model = %lookup, "Fetching model metadata");
                generator.model_info(&lookup).await
            })
            .await
            .map_err(|e: Arc<GeminiError>| (*e).clone())
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
