//! Runtime configuration
//!
//! Settings come from the environment (optionally seeded from a `.env` file
//! by the caller). Invalid values are rejected here, at startup, rather than
//! when they are first used.

use std::env;
use std::path::PathBuf;

use crate::gemini::DEFAULT_API_BASE;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_STORE_NAME: &str = "rag-documents";
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
pub const DEFAULT_CACHE_TTL_SECS: i64 = 3600;
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/file-search-rag.sock";

/// Placeholder shipped in example `.env` files
const API_KEY_PLACEHOLDER: &str = "your_api_key_here";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "GEMINI_API_KEY is required. Get a key from https://aistudio.google.com/apikey \
         and set it in the environment or a .env file"
    )]
    MissingApiKey,

    #[error("{var} must be a whole number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    /// Gemini API root (overridable for proxies)
    pub api_base: String,
    pub default_model: String,
    pub default_store_name: String,
    pub max_file_size_mb: u64,
    /// Handle cache TTL; zero or negative disables caching
    pub cache_ttl_secs: i64,
    /// Location of the store registry JSON file
    pub stores_file: PathBuf,
    /// Unix socket used by serve mode
    pub socket_path: PathBuf,
}

/// Default registry location: `<local data dir>/file-search-rag/stores.json`
pub fn default_stores_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("data"))
        .join("file-search-rag")
        .join("stores.json")
}

fn parse_number<T: std::str::FromStr>(
    var: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
    }
}

impl Settings {
    /// Load settings from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("GEMINI_API_KEY")
            .filter(|k| k != API_KEY_PLACEHOLDER)
            .ok_or(ConfigError::MissingApiKey)?;

        Ok(Self {
            api_key,
            api_base: get("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            default_model: get("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            default_store_name: get("DEFAULT_STORE_NAME")
                .unwrap_or_else(|| DEFAULT_STORE_NAME.to_string()),
            max_file_size_mb: parse_number(
                "MAX_FILE_SIZE_MB",
                get("MAX_FILE_SIZE_MB"),
                DEFAULT_MAX_FILE_SIZE_MB,
            )?,
            cache_ttl_secs: parse_number(
                "RAG_CACHE_TTL_SECS",
                get("RAG_CACHE_TTL_SECS"),
                DEFAULT_CACHE_TTL_SECS,
            )?,
            stores_file: get("RAG_STORES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(default_stores_file),
            socket_path: get("RAG_SOCKET_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let s = settings(&[("GEMINI_API_KEY", "abc")]).unwrap();
        assert_eq!(s.api_key, "abc");
        assert_eq!(s.api_base, DEFAULT_API_BASE);
        assert_eq!(s.default_model, "gemini-2.5-flash");
        assert_eq!(s.default_store_name, "rag-documents");
        assert_eq!(s.max_file_size_mb, 100);
        assert_eq!(s.cache_ttl_secs, 3600);
        assert!(s.stores_file.ends_with("file-search-rag/stores.json"));
    }

    #[test]
    fn test_missing_or_placeholder_key_rejected() {
        assert!(matches!(settings(&[]), Err(ConfigError::MissingApiKey)));
        assert!(matches!(
            settings(&[("GEMINI_API_KEY", "your_api_key_here")]),
            Err(ConfigError::MissingApiKey)
        ));
        assert!(matches!(
            settings(&[("GEMINI_API_KEY", "  ")]),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn test_ttl_override_and_validation() {
        let s = settings(&[("GEMINI_API_KEY", "k"), ("RAG_CACHE_TTL_SECS", " 10 ")]).unwrap();
        assert_eq!(s.cache_ttl_secs, 10);

        let s = settings(&[("GEMINI_API_KEY", "k"), ("RAG_CACHE_TTL_SECS", "-5")]).unwrap();
        assert_eq!(s.cache_ttl_secs, -5);

        match settings(&[("GEMINI_API_KEY", "k"), ("RAG_CACHE_TTL_SECS", "an hour")]) {
            Err(ConfigError::InvalidNumber { var, value }) => {
                assert_eq!(var, "RAG_CACHE_TTL_SECS");
                assert_eq!(value, "an hour");
            }
            other => panic!("expected InvalidNumber, got {:?}", other),
        }
    }

    #[test]
    fn test_file_size_must_be_unsigned() {
        assert!(matches!(
            settings(&[("GEMINI_API_KEY", "k"), ("MAX_FILE_SIZE_MB", "-1")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_path_overrides() {
        let s = settings(&[
            ("GEMINI_API_KEY", "k"),
            ("RAG_STORES_FILE", "/tmp/stores.json"),
            ("RAG_SOCKET_PATH", "/tmp/rag.sock"),
        ])
        .unwrap();
        assert_eq!(s.stores_file, PathBuf::from("/tmp/stores.json"));
        assert_eq!(s.socket_path, PathBuf::from("/tmp/rag.sock"));
    }
}
