//! Google Gemini (Generative Language API) client.
//!
//! Talks to the REST endpoints directly:
//!
//! - `POST /v1beta/models/{model}:generateContent`
//! - `POST /v1beta/models/{model}:streamGenerateContent?alt=sse`
//! - `GET  /v1beta/models`
//!
//! See: <https://ai.google.dev/api/generate-content>
//!
//! Failures are classified from the HTTP status and the structured
//! `error.status` / `error.details[].reason` fields of the error envelope,
//! never from the human-readable message.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::traits::{FragmentStream, GenerationBackend};
use crate::persona::Prompt;
use crate::types::GenerationOptions;
use crate::{HuginnError, Result};

/// Default base URL for the Generative Language API
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Finish reasons that mean the reply was withheld by a safety filter.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Client for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    http: Client,
    base_url: String,
    system_instruction: bool,
}

impl GeminiClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with a custom base URL (for testing with wiremock).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout here: streams can legitimately run long. The
        // fallback chain bounds each call instead.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HuginnError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(api_key, base_url, http))
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http_client(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        http: Client,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            system_instruction: false,
        }
    }

    /// Send persona instructions in the `systemInstruction` field.
    ///
    /// Off by default: older models reject the field with
    /// `INVALID_ARGUMENT`, so the instructions are prepended to the user
    /// turn instead.
    pub fn system_instruction(mut self, enabled: bool) -> Self {
        self.system_instruction = enabled;
        self
    }

    fn request_body<'a>(
        &self,
        prompt: &'a Prompt,
        options: &GenerationOptions,
        full_text: &'a str,
    ) -> GenerateContentRequest<'a> {
        let (system_instruction, text) = if self.system_instruction {
            (
                Some(Content {
                    role: None,
                    parts: vec![Part {
                        text: &prompt.system,
                    }],
                }),
                prompt.body.as_str(),
            )
        } else {
            (None, full_text)
        };

        GenerateContentRequest {
            system_instruction,
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text }],
            }],
            generation_config: GenerationConfig {
                temperature: options.temperature,
                top_p: options.top_p,
                top_k: options.top_k,
                max_output_tokens: options.max_output_tokens,
            },
        }
    }

    async fn post(
        &self,
        url: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<reqwest::Response> {
        let full_text = prompt.full_text();
        let body = self.request_body(prompt, options, &full_text);

        self.http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))
    }

    /// Generate a complete reply.
    #[instrument(skip(self, prompt, options), fields(backend = "gemini"))]
    pub async fn generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<String> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        let response = self.post(&url, prompt, options).await?;
        let response = check_status(response, model).await?;

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| HuginnError::Http(e.to_string()))?;

        extract_text(body, model)?.ok_or(HuginnError::EmptyResponse)
    }

    /// Start a streamed reply.
    ///
    /// HTTP-level failures are returned directly; failures reported inside
    /// the event stream are yielded as `Err` items and end the stream.
    #[instrument(skip(self, prompt, options), fields(backend = "gemini"))]
    pub async fn stream_generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<FragmentStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let response = self.post(&url, prompt, options).await?;
        let response = check_status(response, model).await?;

        Ok(sse_fragments(response, model.to_string()))
    }

    /// List models that support `generateContent`, without the `models/` prefix.
    #[instrument(skip(self), fields(backend = "gemini"))]
    pub async fn models(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(format!("{}/v1beta/models", self.base_url))
                .header("x-goog-api-key", &self.api_key)
                .query(&[("pageSize", "1000")]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| HuginnError::Http(e.to_string()))?;
            let response = check_status(response, "*").await?;
            let page: ListModelsResponse = response
                .json()
                .await
                .map_err(|e| HuginnError::Http(e.to_string()))?;

            names.extend(
                page.models
                    .into_iter()
                    .filter(|m| {
                        m.supported_generation_methods
                            .iter()
                            .any(|method| method == "generateContent")
                    })
                    .map(|m| {
                        m.name
                            .strip_prefix("models/")
                            .map(str::to_string)
                            .unwrap_or(m.name)
                    }),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }
}

/// Pass successful responses through; turn anything else into a classified error.
async fn check_status(response: reqwest::Response, model: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let envelope = serde_json::from_str::<ErrorEnvelope>(&body).ok();

    Err(classify_error(
        status.as_u16(),
        envelope.map(|e| e.error),
        retry_after,
        model,
    ))
}

/// Map an HTTP status plus the structured error body to a [`HuginnError`].
fn classify_error(
    http_status: u16,
    error: Option<ApiError>,
    retry_after: Option<Duration>,
    model: &str,
) -> HuginnError {
    let error = error.unwrap_or_default();
    let api_status = error.status.as_deref().unwrap_or("");
    let message = error
        .message
        .clone()
        .unwrap_or_else(|| format!("Gemini API error: HTTP {http_status}"));

    if error.reason() == Some("API_KEY_INVALID")
        || matches!(api_status, "UNAUTHENTICATED" | "PERMISSION_DENIED")
        || matches!(http_status, 401 | 403)
    {
        return HuginnError::AuthenticationFailed;
    }

    if http_status == 429 || api_status == "RESOURCE_EXHAUSTED" {
        return HuginnError::QuotaExceeded {
            model: model.to_string(),
            retry_after: retry_after.or_else(|| error.retry_delay()),
        };
    }

    if http_status == 404 || api_status == "NOT_FOUND" {
        return HuginnError::ModelNotFound(model.to_string());
    }

    if http_status == 400 || matches!(api_status, "INVALID_ARGUMENT" | "FAILED_PRECONDITION") {
        return HuginnError::InvalidRequest(message);
    }

    HuginnError::Api {
        status: error.code.unwrap_or(http_status),
        message,
    }
}

/// Pull the reply text out of a response body.
///
/// Returns `Ok(None)` when the body carries no text (common for the last
/// chunk of a stream), and `ContentBlocked` when a safety filter withheld it.
fn extract_text(body: GenerateContentResponse, model: &str) -> Result<Option<String>> {
    if let Some(error) = body.error {
        let status = error.code.unwrap_or(500);
        return Err(classify_error(status, Some(error), None, model));
    }

    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(HuginnError::ContentBlocked { reason });
    }

    let Some(candidate) = body.candidates.into_iter().next() else {
        return Ok(None);
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        if let Some(reason) = candidate.finish_reason
            && BLOCKING_FINISH_REASONS.contains(&reason.as_str())
        {
            return Err(HuginnError::ContentBlocked { reason });
        }
        return Ok(None);
    }

    Ok(Some(text))
}

// ============================================================================
// SSE decoding
// ============================================================================

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct SseState {
    bytes: ByteStream,
    buf: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
    model: String,
}

impl SseState {
    /// Decode every complete line currently in the buffer.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.decode_line(&line);
            if self.finished {
                return;
            }
        }
    }

    fn decode_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        let Some(payload) = line.trim_end().strip_prefix("data:") else {
            return; // comments, event names, blank separators
        };
        let payload = payload.trim();
        if payload.is_empty() || payload == "[DONE]" {
            return;
        }

        let parsed = serde_json::from_str::<GenerateContentResponse>(payload)
            .map_err(HuginnError::from)
            .and_then(|body| extract_text(body, &self.model));

        match parsed {
            Ok(Some(text)) => self.pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Decode a `text/event-stream` response into text fragments.
fn sse_fragments(response: reqwest::Response, model: String) -> FragmentStream {
    let bytes: ByteStream = Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec())));
    let state = SseState {
        bytes,
        buf: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        model,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    st.drain_lines();
                }
                Some(Err(e)) => {
                    st.pending.push_back(Err(HuginnError::Stream(e.to_string())));
                    st.finished = true;
                }
                None => {
                    if !st.buf.is_empty() {
                        let rest = std::mem::take(&mut st.buf);
                        st.decode_line(&rest);
                    }
                    debug!(model = %st.model, "upstream stream finished");
                    st.finished = true;
                }
            }
        }
    }))
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_output_tokens: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize, Default)]
struct ApiError {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<serde_json::Value>,
}

impl ApiError {
    /// `reason` from the first `google.rpc.ErrorInfo` detail.
    fn reason(&self) -> Option<&str> {
        self.details
            .iter()
            .find_map(|d| d.get("reason").and_then(|r| r.as_str()))
    }

    /// `retryDelay` from a `google.rpc.RetryInfo` detail, e.g. `"23s"`.
    fn retry_delay(&self) -> Option<Duration> {
        self.details.iter().find_map(|d| {
            let raw = d.get("retryDelay")?.as_str()?;
            let secs: f64 = raw.strip_suffix('s')?.parse().ok()?;
            (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

// ============================================================================
// Backend trait implementation
// ============================================================================

#[async_trait]
impl GenerationBackend for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<String> {
        self.generate_content(model, prompt, options).await
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        options: &GenerationOptions,
    ) -> Result<FragmentStream> {
        self.stream_generate_content(model, prompt, options).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn api_error(value: serde_json::Value) -> Option<ApiError> {
        serde_json::from_value::<ErrorEnvelope>(value)
            .ok()
            .map(|e| e.error)
    }

    #[test]
    fn classifies_resource_exhausted_as_quota() {
        let err = classify_error(
            429,
            api_error(json!({"error": {
                "code": 429,
                "message": "Resource has been exhausted (e.g. check quota).",
                "status": "RESOURCE_EXHAUSTED",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.RetryInfo",
                    "retryDelay": "23s"
                }]
            }})),
            None,
            "gemini-1.5-flash",
        );
        match err {
            HuginnError::QuotaExceeded { model, retry_after } => {
                assert_eq!(model, "gemini-1.5-flash");
                assert_eq!(retry_after, Some(Duration::from_secs(23)));
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[test]
    fn invalid_key_reason_beats_invalid_argument_status() {
        let err = classify_error(
            400,
            api_error(json!({"error": {
                "code": 400,
                "message": "API key not valid. Please pass a valid API key.",
                "status": "INVALID_ARGUMENT",
                "details": [{
                    "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                    "reason": "API_KEY_INVALID",
                    "domain": "googleapis.com"
                }]
            }})),
            None,
            "m",
        );
        assert!(matches!(err, HuginnError::AuthenticationFailed));
    }

    #[test]
    fn plain_invalid_argument_is_invalid_request() {
        let err = classify_error(
            400,
            api_error(json!({"error": {
                "code": 400,
                "message": "Invalid JSON payload",
                "status": "INVALID_ARGUMENT"
            }})),
            None,
            "m",
        );
        assert!(matches!(err, HuginnError::InvalidRequest(msg) if msg == "Invalid JSON payload"));
    }

    #[test]
    fn unknown_server_error_keeps_status() {
        let err = classify_error(503, None, None, "m");
        assert!(matches!(err, HuginnError::Api { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_model_is_not_found() {
        let err = classify_error(404, None, None, "gemini-9");
        assert!(matches!(err, HuginnError::ModelNotFound(m) if m == "gemini-9"));
    }

    #[test]
    fn extract_text_joins_parts() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello, "}, {"text": "world"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();
        assert_eq!(extract_text(body, "m").unwrap().as_deref(), Some("Hello, world"));
    }

    #[test]
    fn extract_text_reports_prompt_block() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert!(matches!(
            extract_text(body, "m"),
            Err(HuginnError::ContentBlocked { reason }) if reason == "SAFETY"
        ));
    }

    #[test]
    fn extract_text_reports_safety_finish_without_text() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SAFETY"}]
        }))
        .unwrap();
        assert!(matches!(
            extract_text(body, "m"),
            Err(HuginnError::ContentBlocked { .. })
        ));
    }

    #[test]
    fn extract_text_empty_final_chunk_is_none() {
        let body: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]
        }))
        .unwrap();
        assert_eq!(extract_text(body, "m").unwrap(), None);
    }
}
