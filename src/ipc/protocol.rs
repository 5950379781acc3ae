//! Serve-mode wire protocol
//!
//! Newline-delimited JSON over a Unix domain socket. Each line from a client
//! is one [`Command`]; the server answers each with exactly one [`Response`]
//! line.

use serde::{Deserialize, Serialize};

use crate::query::SearchResponse;
use crate::store::StoreSummary;

/// Protocol version for future compatibility
pub const PROTOCOL_VERSION: u32 = 1;

/// Commands sent by clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Search a store (the server's default store when omitted)
    #[serde(rename_all = "camelCase")]
    Search {
        query: String,
        #[serde(default)]
        store: Option<String>,
        #[serde(default)]
        max_files: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Ask {
        question: String,
        #[serde(default)]
        store: Option<String>,
        #[serde(default)]
        context: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Summarize {
        #[serde(default)]
        store: Option<String>,
        #[serde(default)]
        topic: Option<String>,
    },
    ListStores,
    /// Drop every cached file handle
    ClearCache,
    GetStatus,
}

/// Handle cache counters reported by `getStatus`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub ttl_secs: u64,
}

/// Responses sent back to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Answer { response: SearchResponse },
    #[serde(rename_all = "camelCase")]
    Stores { stores: Vec<StoreSummary> },
    #[serde(rename_all = "camelCase")]
    Success { message: Option<String> },
    #[serde(rename_all = "camelCase")]
    Error { error: String },
    #[serde(rename_all = "camelCase")]
    Status {
        version: u32,
        healthy: bool,
        remote_health: String,
        model: String,
        default_store: String,
        cache: CacheInfo,
        recent_errors: Vec<String>,
    },
}

/// Parse a JSON command from bytes
pub fn parse_command(data: &[u8]) -> Result<Command, serde_json::Error> {
    serde_json::from_slice(data)
}

/// Serialize a response to JSON bytes
pub fn serialize_response(response: &Response) -> Result<Vec<u8>, serde_json::Error> {
    let mut json = serde_json::to_vec(response)?;
    json.push(b'\n');
    Ok(json)
}
