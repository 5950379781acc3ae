//! Gemini API client (remote file service + generation endpoint)

pub mod client;
pub mod errors;
pub mod service;
pub mod types;

pub use client::{GeminiClient, DEFAULT_API_BASE};
pub use errors::GeminiError;
pub use service::{ContentGenerator, FileResolver, FileUploader};
pub use types::*;
