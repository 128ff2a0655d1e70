//! Resilient client for the generative completion service.
//!
//! Every model call in the pipeline goes through [`CompletionClient::complete`].
//! The HTTP implementation ([`GeminiClient`]) retries transport failures and
//! malformed responses with a fixed delay, falls over to an alternate model
//! for late attempts on the grounded tier, splices grounding citations into
//! the text and strips markdown code fences before returning.

mod client;
mod postprocess;
mod sleeper;
mod wire;

use async_trait::async_trait;
use orgbrief_shared::Result;

pub use client::{CompletionSettings, GeminiClient, ModelSet, RetryPolicy};
pub use postprocess::{Citation, splice_citations, strip_code_fences};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};

/// Capability tier of a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    /// High-capability model; the only tier that may use grounding.
    Grounded,
    /// Cheap model used for JSON formatting passes.
    Fast,
}

/// A document sent inline with the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineDocument {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub tier: ModelTier,
    pub prompt: String,
    /// Enable search grounding and citation splicing.
    pub grounding: bool,
    pub documents: Vec<InlineDocument>,
    /// JSON response contract; switches the response to `application/json`.
    pub response_schema: Option<serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(tier: ModelTier, prompt: impl Into<String>) -> Self {
        Self {
            tier,
            prompt: prompt.into(),
            grounding: false,
            documents: Vec::new(),
            response_schema: None,
        }
    }

    pub fn with_grounding(mut self) -> Self {
        self.grounding = true;
        self
    }

    pub fn with_document(mut self, document: InlineDocument) -> Self {
        self.documents.push(document);
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Anything that can answer a completion request with cleaned text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}
