//! Request and response bodies of the `generateContent` endpoint.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use orgbrief_shared::{OrgBriefError, Result};

use crate::postprocess::Citation;
use crate::{CompletionRequest, InlineDocument};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    top_k: u32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: serde_json::Map<String, serde_json::Value>,
}

impl GenerateRequest {
    pub(crate) fn build(request: &CompletionRequest, max_output_tokens: u32) -> Self {
        let mut parts: Vec<RequestPart> = request.documents.iter().map(inline_part).collect();
        parts.push(RequestPart::Text {
            text: request.prompt.clone(),
        });

        let response_mime_type = if request.response_schema.is_some() {
            "application/json"
        } else {
            "text/plain"
        };

        let tools = if request.grounding {
            vec![Tool {
                google_search: serde_json::Map::new(),
            }]
        } else {
            Vec::new()
        };

        Self {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                top_p: 0.95,
                top_k: 64,
                max_output_tokens,
                response_mime_type,
                response_schema: request.response_schema.clone(),
            },
            tools,
        }
    }
}

fn inline_part(document: &InlineDocument) -> RequestPart {
    RequestPart::Inline {
        inline_data: InlineData {
            mime_type: document.mime_type.clone(),
            data: STANDARD.encode(&document.data),
        },
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
    #[serde(default)]
    grounding_supports: Vec<GroundingSupport>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingSupport {
    segment: Option<Segment>,
    #[serde(default)]
    grounding_chunk_indices: Vec<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Segment {
    end_index: Option<usize>,
}

impl GenerateResponse {
    /// Text of the first part of the first candidate.
    pub(crate) fn text(&self) -> Result<&str> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref())
            .ok_or_else(|| OrgBriefError::malformed("response has no candidate text"))
    }

    /// Citations described by the first candidate's grounding metadata.
    pub(crate) fn citations(&self) -> Vec<Citation> {
        let Some(metadata) = self
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
        else {
            return Vec::new();
        };

        metadata
            .grounding_supports
            .iter()
            .filter_map(|support| {
                let end_index = support.segment.as_ref()?.end_index?;
                if support.grounding_chunk_indices.is_empty() {
                    return None;
                }
                let titles = support
                    .grounding_chunk_indices
                    .iter()
                    .filter_map(|&i| metadata.grounding_chunks.get(i))
                    .filter_map(|chunk| chunk.web.as_ref()?.title.clone())
                    .collect();
                Some(Citation { end_index, titles })
            })
            .collect()
    }
}
