//! Document validation and upload
//!
//! Checks local files against the service's accepted formats and size limit,
//! uploads them, and records the resulting handles in the store registry.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::gemini::FileUploader;
use crate::store::{CustomMetadata, StoreRegistry, StoredFile};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Accepted extensions and the MIME type each is uploaded as
pub const SUPPORTED_FORMATS: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("txt", "text/plain"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("md", "text/markdown"),
    ("markdown", "text/markdown"),
];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("Directory not found or not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Unsupported file format: '{extension}'. Supported: {}", supported_list())]
    Unsupported { extension: String },

    #[error("File too large: {size_mb:.1}MB (max {max_mb}MB)")]
    TooLarge { size_mb: f64, max_mb: u64 },

    #[error("Cannot read file {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn supported_list() -> String {
    SUPPORTED_FORMATS
        .iter()
        .map(|(ext, _)| format!(".{}", ext))
        .collect::<Vec<_>>()
        .join(", ")
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// MIME type for a supported path
pub fn mime_type_for(path: &Path) -> Option<&'static str> {
    let ext = extension(path);
    SUPPORTED_FORMATS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Check that `path` can be uploaded; returns its MIME type and size
pub fn validate_file(path: &Path, max_file_size_mb: u64) -> Result<(&'static str, u64), ValidationError> {
    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ValidationError::NotFound(path.to_path_buf()),
        _ => ValidationError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        },
    })?;
    if !meta.is_file() {
        return Err(ValidationError::NotAFile(path.to_path_buf()));
    }

    let mime = mime_type_for(path).ok_or_else(|| ValidationError::Unsupported {
        extension: extension(path),
    })?;

    let size = meta.len();
    if size > max_file_size_mb * BYTES_PER_MB {
        return Err(ValidationError::TooLarge {
            size_mb: size as f64 / BYTES_PER_MB as f64,
            max_mb: max_file_size_mb,
        });
    }

    File::open(path).map_err(|source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    Ok((mime, size))
}

/// Supported files under `dir`, sorted by path
pub fn scan_directory(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>, ValidationError> {
    if !dir.is_dir() {
        return Err(ValidationError::NotADirectory(dir.to_path_buf()));
    }

    let walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    let walker = if recursive { walker } else { walker.max_depth(1) };

    let files = walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| mime_type_for(path).is_some())
        .collect();

    Ok(files)
}

/// Assemble upload metadata from the common fields plus custom entries
pub fn build_metadata(
    document_type: Option<&str>,
    category: Option<&str>,
    tags: &[String],
    custom: &[CustomMetadata],
) -> Vec<CustomMetadata> {
    let mut metadata = Vec::new();
    if let Some(t) = document_type {
        metadata.push(CustomMetadata::string("document_type", t));
    }
    if let Some(c) = category {
        metadata.push(CustomMetadata::string("category", c));
    }
    if !tags.is_empty() {
        metadata.push(CustomMetadata::string("tags", tags.join(",")));
    }
    metadata.extend(custom.iter().cloned());
    metadata
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub display_name: Option<String>,
    pub document_type: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub custom: Vec<CustomMetadata>,
}

impl UploadOptions {
    fn metadata(&self) -> Vec<CustomMetadata> {
        build_metadata(
            self.document_type.as_deref(),
            self.category.as_deref(),
            &self.tags,
            &self.custom,
        )
    }
}

/// Outcome of a directory upload
#[derive(Debug, Default)]
pub struct UploadSummary {
    pub uploaded: Vec<StoredFile>,
    pub invalid: Vec<(PathBuf, ValidationError)>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct DocumentProcessor<U: FileUploader> {
    uploader: Arc<U>,
    registry: Arc<StoreRegistry>,
    max_file_size_mb: u64,
}

impl<U: FileUploader> DocumentProcessor<U> {
    pub fn new(uploader: Arc<U>, registry: Arc<StoreRegistry>, max_file_size_mb: u64) -> Self {
        Self {
            uploader,
            registry,
            max_file_size_mb,
        }
    }

    pub fn validate(&self, path: &Path) -> Result<(&'static str, u64), ValidationError> {
        validate_file(path, self.max_file_size_mb)
    }

    /// Validate, upload, wait for processing, and record in `store`
    pub async fn upload_document(
        &self,
        path: &Path,
        store: &str,
        options: &UploadOptions,
    ) -> Result<StoredFile> {
        let (mime_type, _) = self.validate(path)?;

        let display_name = match &options.display_name {
            Some(name) => name.clone(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let remote = self
            .uploader
            .upload_active(data, &display_name, mime_type)
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;

        let record = StoredFile {
            name: remote.name.clone(),
            display_name,
            size_bytes: remote.size_bytes,
            mime_type: mime_type.to_string(),
            metadata: options.metadata(),
        };
        self.registry
            .add_file(store, record.clone())
            .context("Failed to record upload in store registry")?;

        info!(handle = %record.name, store = store, "Document uploaded");
        Ok(record)
    }

    /// Upload every supported file under `dir`. Invalid files and per-file
    /// upload failures are logged and reported, not fatal.
    pub async fn upload_directory(
        &self,
        dir: &Path,
        store: &str,
        recursive: bool,
        options: &UploadOptions,
    ) -> Result<UploadSummary> {
        let files = scan_directory(dir, recursive)?;
        let mut summary = UploadSummary::default();

        if files.is_empty() {
            warn!(dir = %dir.display(), "No supported files found");
            return Ok(summary);
        }
        info!(count = files.len(), dir = %dir.display(), "Found files to upload");

        let mut valid = Vec::with_capacity(files.len());
        for path in files {
            match self.validate(&path) {
                Ok(_) => valid.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping invalid file");
                    summary.invalid.push((path, e));
                }
            }
        }

        for path in valid {
            let relative = path
                .strip_prefix(dir)
                .unwrap_or(path.as_path())
                .to_string_lossy()
                .into_owned();
            let file_options = UploadOptions {
                display_name: Some(relative),
                ..options.clone()
            };

            match self.upload_document(&path, store, &file_options).await {
                Ok(record) => {
                    debug!(handle = %record.name, "Uploaded directory entry");
                    summary.uploaded.push(record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Upload failed");
                    summary.failed.push((path, format!("{:#}", e)));
                }
            }
        }

        info!(
            uploaded = summary.uploaded.len(),
            invalid = summary.invalid.len(),
            failed = summary.failed.len(),
            "Directory upload finished"
        );
        Ok(summary)
    }
}
