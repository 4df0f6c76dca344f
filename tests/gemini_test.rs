//! Wiremock integration tests for GeminiClient.
//!
//! These tests verify correct HTTP interaction and error classification using
//! mocked responses.

use futures_util::StreamExt;
use huginn::providers::GeminiClient;
use huginn::{ChatRequest, GenerationBackend, GenerationOptions, Huginn, HuginnError, Prompt};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn prompt() -> Prompt {
    Prompt {
        system: "You are a test persona.".to_string(),
        body: "User: Who made you?\nAssistant:".to_string(),
    }
}

fn reply_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

fn quota_body() -> serde_json::Value {
    json!({"error": {
        "code": 429,
        "message": "Resource has been exhausted (e.g. check quota).",
        "status": "RESOURCE_EXHAUSTED"
    }})
}

/// Test successful generateContent request.
#[tokio::test]
async fn test_generate_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test_key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user"}],
            "generationConfig": {"maxOutputTokens": 400, "topK": 40}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("I was built by Ritik.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let text = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .expect("generate should succeed");
    assert_eq!(text, "I was built by Ritik.");
}

/// Persona instructions go in `systemInstruction` only when enabled.
#[tokio::test]
async fn test_system_instruction_field() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "You are a test persona."}]},
            "contents": [{"parts": [{"text": "User: Who made you?\nAssistant:"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("ok")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri())
        .unwrap()
        .system_instruction(true);
    let text = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "ok");
}

/// Test 429 maps to QuotaExceeded with the Retry-After header.
#[tokio::test]
async fn test_quota_exceeded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "17")
                .set_body_json(quota_body()),
        )
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let err = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap_err();

    match err {
        HuginnError::QuotaExceeded { model, retry_after } => {
            assert_eq!(model, "gemini-1.5-flash");
            assert_eq!(retry_after, Some(std::time::Duration::from_secs(17)));
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
}

/// Test invalid API key maps to AuthenticationFailed even though the status is 400.
#[tokio::test]
async fn test_invalid_api_key() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": {
            "code": 400,
            "message": "API key not valid. Please pass a valid API key.",
            "status": "INVALID_ARGUMENT",
            "details": [{
                "@type": "type.googleapis.com/google.rpc.ErrorInfo",
                "reason": "API_KEY_INVALID"
            }]
        }})))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("bad_key", mock_server.uri()).unwrap();
    let err = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::AuthenticationFailed));
}

/// Test a safety block in promptFeedback maps to ContentBlocked.
#[tokio::test]
async fn test_prompt_blocked() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let err = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::ContentBlocked { reason } if reason == "SAFETY"));
}

/// Test server errors are retryable API errors.
#[tokio::test]
async fn test_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let err = client
        .generate("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HuginnError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

/// Test SSE streaming decodes one fragment per event.
#[tokio::test]
async fn test_stream_success() {
    let mock_server = MockServer::start().await;

    let sse = format!(
        "data: {}\r\n\r\ndata: {}\r\n\r\ndata: {}\r\n\r\n",
        reply_body("Hello"),
        reply_body(", world"),
        json!({"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}),
    );

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .and(query_param("alt", "sse"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let stream = client
        .generate_stream("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .expect("stream should start");

    let parts: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
    assert_eq!(parts, vec!["Hello", ", world"]);
}

/// Test an error event inside the stream ends it with an error item.
#[tokio::test]
async fn test_stream_in_band_error() {
    let mock_server = MockServer::start().await;

    let sse = format!(
        "data: {}\n\ndata: {}\n\n",
        reply_body("Partial"),
        json!({"error": {"code": 500, "message": "internal", "status": "INTERNAL"}}),
    );

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let items: Vec<_> = client
        .generate_stream("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Partial");
    assert!(matches!(items[1], Err(HuginnError::Api { status: 500, .. })));
}

/// Test streaming quota failure is returned before any fragment.
#[tokio::test]
async fn test_stream_quota_before_start() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:streamGenerateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(quota_body()))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let err = client
        .generate_stream("gemini-1.5-flash", &prompt(), &GenerationOptions::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, HuginnError::QuotaExceeded { .. }));
}

/// Test model listing filters on generateContent and follows pagination.
#[tokio::test]
async fn test_list_models() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{
                "name": "models/gemini-1.5-pro",
                "supportedGenerationMethods": ["generateContent", "countTokens"]
            }]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1beta/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {
                    "name": "models/gemini-1.5-flash",
                    "supportedGenerationMethods": ["generateContent"]
                },
                {
                    "name": "models/text-embedding-004",
                    "supportedGenerationMethods": ["embedContent"]
                }
            ],
            "nextPageToken": "page-2"
        })))
        .mount(&mock_server)
        .await;

    let client = GeminiClient::with_base_url("test_key", mock_server.uri()).unwrap();
    let models = client.list_models().await.unwrap();
    assert_eq!(models, vec!["gemini-1.5-flash", "gemini-1.5-pro"]);
}

/// Full pipeline: first candidate out of quota, second answers.
#[tokio::test]
async fn test_gateway_falls_back_over_http() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_json(quota_body()))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.0-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply_body("Hi from 1.0")))
        .expect(2)
        .mount(&mock_server)
        .await;

    let gateway = Huginn::builder()
        .gemini("test_key")
        .gemini_base_url(mock_server.uri())
        .build()
        .unwrap();

    let reply = gateway.chat(&ChatRequest::new("first question")).await.unwrap();
    assert_eq!(reply.model, "gemini-1.0-pro");
    assert_eq!(reply.response, "Hi from 1.0");

    let reply = gateway.chat(&ChatRequest::new("second question")).await.unwrap();
    assert_eq!(reply.model, "gemini-1.0-pro");
}
