//! Gemini API types
//!
//! Request/response shapes for the Files, Models and generateContent APIs.

use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a number that might be encoded as a string or null.
/// Google APIs encode int64 fields as JSON strings (e.g. "sizeBytes": "1024").
fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de;

    struct FlexibleU64Visitor;

    impl<'de> de::Visitor<'de> for FlexibleU64Visitor {
        type Value = u64;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a u64, a string containing a u64, or null")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| de::Error::custom("negative value for u64"))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(FlexibleU64Visitor)
}

/// Processing state of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Processing,
    Active,
    Failed,
    #[default]
    #[serde(other)]
    StateUnspecified,
}

/// A file held by the Gemini Files API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Handle, e.g. "files/abc123"
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, deserialize_with = "deserialize_flexible_u64")]
    pub size_bytes: u64,
    /// URI used to reference the file in generation requests
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub state: FileState,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<String>,
}

impl RemoteFile {
    pub fn is_active(&self) -> bool {
        self.state == FileState::Active
    }
}

/// Wrapper returned by the upload endpoint
#[derive(Debug, Deserialize)]
pub struct UploadFileResponse {
    pub file: RemoteFile,
}

/// Model metadata from `models/{name}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_token_limit: u64,
    #[serde(default)]
    pub output_token_limit: u64,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

/// Reference to an uploaded file inside a content part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// One part of a content turn: either text or a file reference
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_data: Option<FileData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file_data: None,
        }
    }

    pub fn file(file: &RemoteFile) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                mime_type: file.mime_type.clone(),
                file_uri: file.uri.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Body of `models/{model}:generateContent`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContext {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    #[serde(default)]
    pub retrieved_context: Option<RetrievedContext>,
    #[serde(default)]
    pub web: Option<RetrievedContext>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingSupport {
    #[serde(default)]
    pub grounding_chunk_indices: Vec<usize>,
    #[serde(default)]
    pub confidence_scores: Vec<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    pub grounding_supports: Vec<GroundingSupport>,
    #[serde(default)]
    pub retrieval_queries: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u64,
    #[serde(default)]
    pub candidates_token_count: u64,
    #[serde(default)]
    pub total_token_count: u64,
}

/// Response of `generateContent` (and each event of `streamGenerateContent`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    pub fn grounding(&self) -> Option<&GroundingMetadata> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
    }

    pub fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_active_file() {
        let json = r#"{
            "name": "files/abc123",
            "displayName": "handbook.pdf",
            "mimeType": "application/pdf",
            "sizeBytes": "204800",
            "createTime": "2025-01-01T00:00:00Z",
            "expirationTime": "2025-01-03T00:00:00Z",
            "sha256Hash": "ZmFrZQ==",
            "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
            "state": "ACTIVE"
        }"#;
        let file: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.name, "files/abc123");
        assert_eq!(file.size_bytes, 204800);
        assert!(file.is_active());
    }

    #[test]
    fn test_unknown_state_is_unspecified() {
        let json = r#"{"name": "files/x", "state": "SOMETHING_NEW"}"#;
        let file: RemoteFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.state, FileState::StateUnspecified);
        assert_eq!(file.size_bytes, 0);
    }

    #[test]
    fn test_request_serialization() {
        let file = RemoteFile {
            name: "files/abc".into(),
            mime_type: "text/plain".into(),
            uri: "https://example/files/abc".into(),
            ..Default::default()
        };
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part::text("Question?"), Part::file(&file)],
            }],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text("Be helpful")],
            }),
            generation_config: Some(GenerationConfig {
                temperature: 0.1,
                max_output_tokens: Some(2048),
            }),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Question?");
        assert_eq!(
            json["contents"][0]["parts"][1]["fileData"]["fileUri"],
            "https://example/files/abc"
        );
        assert!(json["contents"][0]["parts"][1].get("text").is_none());
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
        assert!(json["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_response_text_and_grounding() {
        let json = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "world"}]},
                "finishReason": "STOP",
                "groundingMetadata": {
                    "groundingChunks": [
                        {"retrievedContext": {"title": "guide.md", "text": "chunk one"}}
                    ],
                    "groundingSupports": [
                        {"segment": {"text": "Hello"}, "groundingChunkIndices": [0], "confidenceScores": [0.8]}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 2, "totalTokenCount": 12}
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "Hello world");
        let grounding = response.grounding().unwrap();
        assert_eq!(grounding.grounding_chunks.len(), 1);
        assert_eq!(grounding.grounding_supports[0].grounding_chunk_indices, vec![0]);
        assert!(response.block_reason().is_none());
    }

    #[test]
    fn test_blocked_response() {
        let json = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.text(), "");
        assert_eq!(response.block_reason(), Some("SAFETY"));
    }
}
