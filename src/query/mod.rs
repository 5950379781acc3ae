//! Query answering over stored documents

pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod response;

pub use orchestrator::{AnswerStream, QueryOrchestrator, SearchOptions};
pub use response::{format_citations_only, format_response, Citation, SearchResponse};
