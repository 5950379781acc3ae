//! Language-based store organization
//!
//! Splits a multilingual store into `<store>-<language>` stores so queries
//! only reference files in one language.

use std::fmt;

use tracing::info;

use super::registry::{StoreError, StoreRegistry, StoredFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Language {
    English,
    Tamil,
    Hindi,
    Malayalam,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::English,
        Language::Tamil,
        Language::Hindi,
        Language::Malayalam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Tamil => "tamil",
            Language::Hindi => "hindi",
            Language::Malayalam => "malayalam",
        }
    }

    /// Filename tokens that mark a language, plus its native-script name
    fn markers(&self) -> (&'static [&'static str], &'static str) {
        match self {
            Language::Tamil => (&["tamil", "ta"], "தமிழ்"),
            Language::Hindi => (&["hindi", "hi"], "हिंदी"),
            Language::Malayalam => (&["malayalam", "ml"], "മലയാളം"),
            Language::English => (&["english", "en", "eng"], "english"),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detect a file's language from its display name.
///
/// Names are split on non-alphanumeric characters and matched token by
/// token, so "chapter-ta.pdf" is Tamil but "data.pdf" is not. Native-script
/// names match anywhere. Anything unmarked is English.
pub fn detect_language(display_name: &str) -> Language {
    let lower = display_name.to_lowercase();
    let tokens: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    for lang in [Language::Tamil, Language::Hindi, Language::Malayalam] {
        let (codes, native) = lang.markers();
        if lower.contains(native) || tokens.iter().any(|t| codes.contains(t)) {
            return lang;
        }
    }
    Language::English
}

#[derive(Debug, Clone)]
pub struct LanguageGroup {
    pub language: Language,
    pub files: Vec<StoredFile>,
    pub total_bytes: u64,
    /// Share of the store's bytes
    pub percentage: f64,
}

#[derive(Debug, Clone)]
pub struct LanguageReport {
    pub store: String,
    pub total_files: usize,
    pub total_bytes: u64,
    /// Non-empty groups only
    pub groups: Vec<LanguageGroup>,
}

impl LanguageReport {
    pub fn target_store(&self, language: Language) -> String {
        format!("{}-{}", self.store, language)
    }

    /// Percentage of bytes a query skips when only the largest language is searched
    pub fn potential_reduction(&self) -> Option<f64> {
        if self.groups.len() < 2 || self.total_bytes == 0 {
            return None;
        }
        let largest = self.groups.iter().map(|g| g.total_bytes).max()?;
        Some((self.total_bytes - largest) as f64 / self.total_bytes as f64 * 100.0)
    }
}

/// Group a store's files by detected language
pub fn analyze(registry: &StoreRegistry, store: &str) -> Result<LanguageReport, StoreError> {
    let files = registry.list_files(store)?;
    let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
    let total_files = files.len();

    let mut groups: Vec<LanguageGroup> = Language::ALL
        .iter()
        .map(|&language| LanguageGroup {
            language,
            files: Vec::new(),
            total_bytes: 0,
            percentage: 0.0,
        })
        .collect();

    for file in files {
        let lang = detect_language(&file.display_name);
        if let Some(group) = groups.iter_mut().find(|g| g.language == lang) {
            group.total_bytes += file.size_bytes;
            group.files.push(file);
        }
    }

    groups.retain(|g| !g.files.is_empty());
    for group in &mut groups {
        if total_bytes > 0 {
            group.percentage = group.total_bytes as f64 / total_bytes as f64 * 100.0;
        }
    }

    Ok(LanguageReport {
        store: store.to_string(),
        total_files,
        total_bytes,
        groups,
    })
}

/// Copy each language group into its own store. Returns the stores written
/// and how many records each received.
pub fn apply(
    registry: &StoreRegistry,
    report: &LanguageReport,
) -> Result<Vec<(String, usize)>, StoreError> {
    let mut written = Vec::with_capacity(report.groups.len());
    for group in &report.groups {
        let target = report.target_store(group.language);
        registry.create_store(&target)?;
        let added = registry.add_files(&target, group.files.clone())?;
        info!(store = %target, added, "Populated language store");
        written.push((target, added));
    }
    Ok(written)
}
