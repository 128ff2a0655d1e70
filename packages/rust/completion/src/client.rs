//! HTTP completion client with retry and model fallback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

use orgbrief_shared::{AppConfig, OrgBriefError, Result};

use crate::postprocess::{floor_char_boundary, splice_citations, strip_code_fences};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::wire::{GenerateRequest, GenerateResponse};
use crate::{CompletionClient, CompletionRequest, ModelTier};

/// User-Agent string for completion requests.
const USER_AGENT: &str = concat!("OrgBrief/", env!("CARGO_PKG_VERSION"));

/// Header carrying the API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Model names per tier.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub primary: String,
    /// Alternate variant of the grounded tier used for late attempts.
    pub fallback: String,
    pub fast: String,
}

/// Attempt ceiling, inter-attempt delay and fallback point.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Zero-based attempt index from which the grounded tier uses the fallback model.
    pub fallback_from_attempt: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
            fallback_from_attempt: 2,
        }
    }
}

/// Runtime client settings, merged from the config file.
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub base_url: Url,
    pub models: ModelSet,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub max_output_tokens: u32,
}

impl TryFrom<&AppConfig> for CompletionSettings {
    type Error = OrgBriefError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let c = &config.completion;
        let base_url = Url::parse(&c.base_url)
            .map_err(|e| OrgBriefError::config(format!("invalid completion base_url: {e}")))?;
        Ok(Self {
            base_url,
            models: ModelSet {
                primary: c.primary_model.clone(),
                fallback: c.fallback_model.clone(),
                fast: c.fast_model.clone(),
            },
            retry: RetryPolicy {
                max_attempts: c.max_attempts.max(1),
                delay: Duration::from_millis(c.retry_delay_ms),
                fallback_from_attempt: c.fallback_from_attempt,
            },
            request_timeout: Duration::from_secs(c.request_timeout_secs),
            max_output_tokens: c.max_output_tokens,
        })
    }
}

// ---------------------------------------------------------------------------
// GeminiClient
// ---------------------------------------------------------------------------

/// [`CompletionClient`] backed by the `generateContent` HTTP endpoint.
pub struct GeminiClient {
    http: Client,
    settings: CompletionSettings,
    api_key: String,
    sleeper: Arc<dyn Sleeper>,
}

impl GeminiClient {
    /// Create a client that sleeps on the Tokio timer between attempts.
    pub fn new(settings: CompletionSettings, api_key: impl Into<String>) -> Result<Self> {
        Self::with_sleeper(settings, api_key, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(
        settings: CompletionSettings,
        api_key: impl Into<String>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| OrgBriefError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            settings,
            api_key: api_key.into(),
            sleeper,
        })
    }

    /// Model used for `tier` on the zero-based `attempt`.
    fn model_for(&self, tier: ModelTier, attempt: u32) -> &str {
        let models = &self.settings.models;
        match tier {
            ModelTier::Fast => &models.fast,
            ModelTier::Grounded if attempt >= self.settings.retry.fallback_from_attempt => {
                &models.fallback
            }
            ModelTier::Grounded => &models.primary,
        }
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        let base = self.settings.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/v1beta/models/{model}:generateContent"))
            .map_err(|e| OrgBriefError::config(format!("invalid endpoint for {model}: {e}")))
    }

    /// One HTTP round trip. Returns the raw text plus spliced citations.
    async fn attempt(&self, model: &str, request: &CompletionRequest) -> Result<String> {
        let url = self.endpoint(model)?;
        let body = GenerateRequest::build(request, self.settings.max_output_tokens);

        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OrgBriefError::Transport(format!("{model}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OrgBriefError::Transport(format!(
                "{model}: HTTP {status}: {}",
                &detail[..floor_char_boundary(&detail, 300)]
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| OrgBriefError::malformed(format!("{model}: undecodable body: {e}")))?;

        let text = parsed.text()?;
        if request.grounding {
            Ok(splice_citations(text, &parsed.citations()))
        } else {
            Ok(text.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for GeminiClient {
    #[instrument(skip_all, fields(tier = ?request.tier, grounding = request.grounding))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(OrgBriefError::validation("completion prompt is empty"));
        }
        if request.grounding && request.tier != ModelTier::Grounded {
            return Err(OrgBriefError::validation(
                "grounding is only available on the grounded tier",
            ));
        }

        let policy = self.settings.retry;
        let mut last_error = None;

        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                self.sleeper.sleep(policy.delay).await;
            }

            let model = self.model_for(request.tier, attempt);
            debug!(attempt, model, "sending completion request");

            match self.attempt(model, request).await {
                Ok(text) => return Ok(strip_code_fences(&text)),
                Err(e) if e.is_retryable() => {
                    warn!(attempt, model, error = %e, "completion attempt failed");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(OrgBriefError::ExhaustedRetries {
            attempts: policy.max_attempts,
            last: Box::new(
                last_error.unwrap_or_else(|| OrgBriefError::Transport("no attempt made".into())),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleeper::RecordingSleeper;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(server: &MockServer) -> CompletionSettings {
        CompletionSettings {
            base_url: Url::parse(&server.uri()).unwrap(),
            models: ModelSet {
                primary: "pro".into(),
                fallback: "pro-preview".into(),
                fast: "flash".into(),
            },
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(5),
            max_output_tokens: 1024,
        }
    }

    fn client(server: &MockServer) -> (GeminiClient, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let client = GeminiClient::with_sleeper(settings(server), "test-key", sleeper.clone())
            .expect("client");
        (client, sleeper)
    }

    fn text_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        })
    }

    #[tokio::test]
    async fn fast_call_strips_fences() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_body(
                "```json\n{\"companySummary\":{\"description\":\"x\"}}\n```",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let (client, sleeper) = client(&server);
        let out = client
            .complete(&CompletionRequest::new(ModelTier::Fast, "format this"))
            .await
            .unwrap();
        assert_eq!(out, "{\"companySummary\":{\"description\":\"x\"}}");
        assert!(sleeper.calls().is_empty());
    }

    fn cited_body() -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "AB"}]},
                "groundingMetadata": {
                    "groundingChunks": [{"web": {"title": "x.com"}}, {"web": {"title": "y.com"}}],
                    "groundingSupports": [
                        {"segment": {"endIndex": 1}, "groundingChunkIndices": [0]},
                        {"segment": {"endIndex": 2}, "groundingChunkIndices": [1]}
                    ]
                }
            }]
        })
    }

    #[tokio::test]
    async fn grounded_call_splices_citations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro:generateContent"))
            .and(body_partial_json(serde_json::json!({"tools": [{"googleSearch": {}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(cited_body()))
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let out = client
            .complete(&CompletionRequest::new(ModelTier::Grounded, "research Acme").with_grounding())
            .await
            .unwrap();
        assert_eq!(out, "A (x.com)B (y.com)");
    }

    #[tokio::test]
    async fn two_transport_failures_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/flash:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/flash:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_body("ok")))
            .mount(&server)
            .await;

        let (client, sleeper) = client(&server);
        let out = client
            .complete(&CompletionRequest::new(ModelTier::Fast, "p"))
            .await
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn grounded_tier_falls_back_on_third_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro:generateContent"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro-preview:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_body("from preview")))
            .expect(1)
            .mount(&server)
            .await;

        let (client, sleeper) = client(&server);
        let out = client
            .complete(&CompletionRequest::new(ModelTier::Grounded, "p").with_grounding())
            .await
            .unwrap();
        assert_eq!(out, "from preview");
        assert_eq!(sleeper.calls().len(), 2);
    }

    #[tokio::test]
    async fn grounded_retries_match_a_single_success() {
        let single = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(cited_body()))
            .expect(1)
            .mount(&single)
            .await;
        let (client_once, _) = client(&single);
        let request = CompletionRequest::new(ModelTier::Grounded, "research Acme").with_grounding();
        let expected = client_once.complete(&request).await.unwrap();

        let flaky = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&flaky)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/pro-preview:generateContent"))
            .and(body_partial_json(serde_json::json!({"tools": [{"googleSearch": {}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(cited_body()))
            .expect(1)
            .mount(&flaky)
            .await;
        let (client_retrying, sleeper) = client(&flaky);
        let out = client_retrying.complete(&request).await.unwrap();

        assert_eq!(out, expected);
        assert_eq!(out, "A (x.com)B (y.com)");
        assert_eq!(sleeper.calls(), vec![Duration::from_secs(5); 2]);
    }

    #[tokio::test]
    async fn malformed_responses_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(3)
            .mount(&server)
            .await;

        let (client, sleeper) = client(&server);
        let err = client
            .complete(&CompletionRequest::new(ModelTier::Fast, "p"))
            .await
            .unwrap_err();
        match err {
            OrgBriefError::ExhaustedRetries { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, OrgBriefError::MalformedOutput { .. }));
            }
            other => panic!("expected ExhaustedRetries, got {other:?}"),
        }
        assert_eq!(sleeper.calls().len(), 2);
    }

    #[tokio::test]
    async fn empty_prompt_rejected_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_body("x")))
            .expect(0)
            .mount(&server)
            .await;

        let (client, _) = client(&server);
        let err = client
            .complete(&CompletionRequest::new(ModelTier::Fast, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, OrgBriefError::Validation { .. }));
    }

    #[test]
    fn settings_from_default_config() {
        let settings = CompletionSettings::try_from(&AppConfig::default()).unwrap();
        assert_eq!(settings.models.primary, "gemini-2.5-pro");
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.delay, Duration::from_secs(5));
    }
}
