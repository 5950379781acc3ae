//! Search responses, citations and their text rendering

use std::collections::HashSet;
use std::fmt::Write;

use serde::Serialize;

use crate::gemini::{GenerateContentResponse, GroundingMetadata};

/// Characters of chunk text used to tell citations apart
const DEDUP_PREFIX_CHARS: usize = 100;

/// Characters of chunk text shown under each source
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub file_name: String,
    pub chunk_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Highest confidence of any grounding support pointing at this chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingSummary {
    pub chunk_count: usize,
    pub retrieval_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub model_used: String,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grounding: Option<GroundingSummary>,
    pub files_used: usize,
    pub files_skipped: usize,
}

impl SearchResponse {
    /// A response carrying only a message (empty store, per-query error)
    pub fn notice(answer: impl Into<String>, query: &str, model: &str) -> Self {
        Self {
            answer: answer.into(),
            citations: Vec::new(),
            model_used: model.to_string(),
            query: query.to_string(),
            grounding: None,
            files_used: 0,
            files_skipped: 0,
        }
    }

    /// Convert a generation result
    pub fn from_generation(
        response: &GenerateContentResponse,
        query: &str,
        model: &str,
        files_used: usize,
        files_skipped: usize,
    ) -> Self {
        let mut answer = response.text();
        if answer.is_empty() {
            if let Some(reason) = response.block_reason() {
                answer = format!("Response blocked by the model ({})", reason);
            }
        }

        let grounding = response.grounding();

        Self {
            answer,
            citations: grounding.map(extract_citations).unwrap_or_default(),
            model_used: model.to_string(),
            query: query.to_string(),
            grounding: grounding.map(|g| GroundingSummary {
                chunk_count: g.grounding_chunks.len(),
                retrieval_queries: g.retrieval_queries.clone(),
            }),
            files_used,
            files_skipped,
        }
    }
}

fn prefix(text: &str, chars: usize) -> &str {
    match text.char_indices().nth(chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Citations for each grounding chunk, deduplicated on file name and the
/// start of the chunk text
pub fn extract_citations(grounding: &GroundingMetadata) -> Vec<Citation> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();

    for (index, chunk) in grounding.grounding_chunks.iter().enumerate() {
        let Some(ctx) = chunk.retrieved_context.as_ref().or(chunk.web.as_ref()) else {
            continue;
        };

        let file_name = ctx
            .title
            .clone()
            .or_else(|| ctx.uri.clone())
            .unwrap_or_else(|| "Unknown File".to_string());
        let chunk_text = ctx.text.clone().unwrap_or_default();

        let key = (file_name.clone(), prefix(&chunk_text, DEDUP_PREFIX_CHARS).to_string());
        if !seen.insert(key) {
            continue;
        }

        let score = grounding
            .grounding_supports
            .iter()
            .flat_map(|support| {
                support
                    .grounding_chunk_indices
                    .iter()
                    .zip(support.confidence_scores.iter())
                    .filter(|(i, _)| **i == index)
                    .map(|(_, score)| *score)
            })
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

        citations.push(Citation {
            file_name,
            chunk_text,
            uri: ctx.uri.clone(),
            score,
        });
    }

    citations
}

/// Markdown rendering of an answer and (optionally) its sources
pub fn format_response(response: &SearchResponse, include_citations: bool) -> String {
    let mut out = format!("**Answer:**\n{}\n", response.answer);

    if include_citations && !response.citations.is_empty() {
        let _ = writeln!(out, "\n**Sources ({} found):**", response.citations.len());
        for (i, citation) in response.citations.iter().enumerate() {
            let _ = write!(out, "{}. **{}**", i + 1, citation.file_name);
            if let Some(score) = citation.score {
                let _ = write!(out, " (Relevance: {:.2})", score);
            }
            out.push('\n');

            if !citation.chunk_text.is_empty() {
                let preview = prefix(&citation.chunk_text, PREVIEW_CHARS);
                let ellipsis = if preview.len() < citation.chunk_text.len() { "..." } else { "" };
                let _ = writeln!(out, "   _{}{}_", preview, ellipsis);
            }
            out.push('\n');
        }
    }

    out
}

pub fn format_citations_only(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return "No sources found.".to_string();
    }

    let mut out = format!("**Sources ({} found):**\n", citations.len());
    for (i, citation) in citations.iter().enumerate() {
        let _ = writeln!(out, "{}. {}", i + 1, citation.file_name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::GroundingMetadata;

    fn grounding() -> GroundingMetadata {
        serde_json::from_str(
            r#"{
              "groundingChunks": [
                {"retrievedContext": {"uri": "files/a", "title": "handbook.pdf", "text": "Leave is 20 days."}},
                {"retrievedContext": {"uri": "files/a", "title": "handbook.pdf", "text": "Leave is 20 days."}},
                {"web": {"uri": "https://example.org/policy", "title": "policy"}},
                {}
              ],
              "groundingSupports": [
                {"groundingChunkIndices": [0, 2], "confidenceScores": [0.4, 0.7]},
                {"groundingChunkIndices": [0], "confidenceScores": [0.9]}
              ],
              "retrievalQueries": ["annual leave"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_extract_citations_dedups_and_scores() {
        let citations = extract_citations(&grounding());
        assert_eq!(citations.len(), 2);

        assert_eq!(citations[0].file_name, "handbook.pdf");
        assert_eq!(citations[0].score, Some(0.9));
        assert_eq!(citations[0].uri.as_deref(), Some("files/a"));

        assert_eq!(citations[1].file_name, "policy");
        assert_eq!(citations[1].chunk_text, "");
        assert_eq!(citations[1].score, Some(0.7));
    }

    #[test]
    fn test_dedup_uses_prefix_only() {
        let head = "x".repeat(DEDUP_PREFIX_CHARS);
        let json = serde_json::json!({
            "groundingChunks": [
                {"retrievedContext": {"title": "f", "text": format!("{}AAA", head)}},
                {"retrievedContext": {"title": "f", "text": format!("{}BBB", head)}},
                {"retrievedContext": {"title": "g", "text": format!("{}BBB", head)}}
            ]
        });
        let grounding: GroundingMetadata = serde_json::from_value(json).unwrap();
        let names: Vec<_> = extract_citations(&grounding)
            .into_iter()
            .map(|c| c.file_name)
            .collect();
        assert_eq!(names, vec!["f", "g"]);
    }

    #[test]
    fn test_from_generation() {
        let raw: GenerateContentResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Twenty "},{"text":"days."}]},
                "groundingMetadata":{"groundingChunks":[{"retrievedContext":{"title":"h.pdf","text":"t"}}],
                                     "retrievalQueries":["leave"]}}]}"#,
        )
        .unwrap();
        let response = SearchResponse::from_generation(&raw, "leave?", "gemini-2.5-flash", 3, 1);
        assert_eq!(response.answer, "Twenty days.");
        assert_eq!(response.citations.len(), 1);
        assert_eq!(
            response.grounding,
            Some(GroundingSummary {
                chunk_count: 1,
                retrieval_queries: vec!["leave".into()]
            })
        );
        assert_eq!((response.files_used, response.files_skipped), (3, 1));
    }

    #[test]
    fn test_blocked_prompt_explains_itself() {
        let raw: GenerateContentResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        let response = SearchResponse::from_generation(&raw, "q", "m", 1, 0);
        assert_eq!(response.answer, "Response blocked by the model (SAFETY)");
        assert!(response.citations.is_empty());
        assert!(response.grounding.is_none());
    }

    #[test]
    fn test_format_response_truncates_previews() {
        let mut response = SearchResponse::notice("42", "q", "m");
        response.citations = vec![
            Citation {
                file_name: "long.txt".into(),
                chunk_text: "é".repeat(PREVIEW_CHARS + 5),
                uri: None,
                score: Some(0.5),
            },
            Citation {
                file_name: "short.txt".into(),
                chunk_text: "brief".into(),
                uri: None,
                score: None,
            },
        ];

        let text = format_response(&response, true);
        assert!(text.starts_with("**Answer:**\n42\n"));
        assert!(text.contains("**Sources (2 found):**"));
        assert!(text.contains("1. **long.txt** (Relevance: 0.50)"));
        assert!(text.contains(&format!("   _{}..._", "é".repeat(PREVIEW_CHARS))));
        assert!(text.contains("   _brief_"));

        assert_eq!(format_response(&response, false), "**Answer:**\n42\n");
    }

    #[test]
    fn test_format_citations_only() {
        assert_eq!(format_citations_only(&[]), "No sources found.");
        let citations = vec![Citation {
            file_name: "a.pdf".into(),
            chunk_text: String::new(),
            uri: None,
            score: None,
        }];
        assert_eq!(format_citations_only(&citations), "**Sources (1 found):**\n1. a.pdf\n");
    }
}
