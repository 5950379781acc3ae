//! Local document handling ahead of upload

pub mod processor;

pub use processor::{
    build_metadata, scan_directory, validate_file, DocumentProcessor, UploadOptions,
    UploadSummary, ValidationError, SUPPORTED_FORMATS,
};
