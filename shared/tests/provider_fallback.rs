use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use shared::ai_provider::{
    ChatProvider, GenerationRequest, GenerationStatus, OpenAiCompatibleProvider, ProviderChain,
    ProviderError,
};
use shared::dto::Language;
use shared::provider_settings::ProviderConfig;
use shared::stream_parser::StreamEvent;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(key: &str, base: &str) -> Arc<dyn ChatProvider> {
    let cfg = ProviderConfig::for_option(key, "test-key", base);
    Arc::new(OpenAiCompatibleProvider::new(cfg).unwrap())
}

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "model": "mock-model",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "total_tokens": 42 }
    })
}

fn request(prompt: &str) -> GenerationRequest {
    GenerationRequest {
        prompt: prompt.into(),
        project: None,
        template: None,
        language: Language::En,
    }
}

#[tokio::test]
async fn falls_back_when_primary_returns_server_error() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("# From backup")))
        .expect(1)
        .mount(&secondary)
        .await;

    let chain = ProviderChain::new(vec![
        provider("deepseek", &primary.uri()),
        provider("openai", &secondary.uri()),
    ]);
    let result = chain.generate_content(&request("Write a PRD")).await;

    assert_eq!(result.status, GenerationStatus::Success);
    assert_eq!(result.content, "# From backup");
    assert_eq!(result.tokens, Some(42));
}

#[tokio::test]
async fn unreachable_primary_still_reaches_secondary() {
    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .mount(&secondary)
        .await;

    let chain = ProviderChain::new(vec![
        provider("deepseek", "http://127.0.0.1:1"),
        provider("openai", &secondary.uri()),
    ]);
    let result = chain.generate_content(&request("Write a PRD")).await;
    assert!(result.is_success());
    assert_eq!(result.content, "ok");
}

#[tokio::test]
async fn reports_error_when_every_provider_fails() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&secondary)
        .await;

    let chain = ProviderChain::new(vec![
        provider("deepseek", &primary.uri()),
        provider("openai", &secondary.uri()),
    ]);
    let result = chain.generate_content(&request("Write a PRD")).await;

    assert_eq!(result.status, GenerationStatus::Error);
    assert!(result.content.is_empty());
    let message = result.error.unwrap();
    assert!(message.contains("429"), "last failure wins: {message}");
}

#[tokio::test]
async fn empty_choices_count_as_failure() {
    let primary = MockServer::start().await;
    let secondary = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
        .mount(&primary)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("second")))
        .mount(&secondary)
        .await;

    let chain = ProviderChain::new(vec![
        provider("deepseek", &primary.uri()),
        provider("openai", &secondary.uri()),
    ]);
    let result = chain.generate_content(&request("Write a PRD")).await;
    assert_eq!(result.content, "second");
}

#[tokio::test]
async fn empty_chain_reports_no_provider() {
    let chain = ProviderChain::new(vec![]);
    let err = chain
        .complete(vec![])
        .await
        .expect_err("no providers configured");
    assert!(matches!(err, ProviderError::NoProvider));

    let result = chain.translate("# Hi", Language::Zh).await;
    assert_eq!(result.status, GenerationStatus::Error);
}

#[tokio::test]
async fn translation_request_targets_other_language() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("# 你好")))
        .expect(1)
        .mount(&server)
        .await;

    let chain = ProviderChain::new(vec![provider("deepseek", &server.uri())]);
    let result = chain.translate("# Hello", Language::Zh).await;
    assert_eq!(result.into_result().unwrap(), "# 你好");

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let system = body["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("Simplified Chinese"));
    assert_eq!(body["messages"][1]["content"], "# Hello");
}

#[tokio::test]
async fn streams_deltas_from_sse_body() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"# Title\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"\\nBody\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let chain = ProviderChain::new(vec![provider("deepseek", &server.uri())]);
    let mut stream = chain.stream_content(&request("Write a PRD")).await.unwrap();

    let mut text = String::new();
    let mut done = false;
    while let Some(event) = stream.next().await {
        match event.unwrap() {
            StreamEvent::Delta(d) => text.push_str(&d),
            StreamEvent::Done => done = true,
            _ => {}
        }
    }
    assert_eq!(text, "# Title\nBody");
    assert!(done);
}

#[tokio::test]
async fn stream_keeps_last_line_without_trailing_newline() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}",
    );
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "stream": true })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .mount(&server)
        .await;

    let chain = ProviderChain::new(vec![provider("deepseek", &server.uri())]);
    let mut stream = chain.stream_content(&request("Write a PRD")).await.unwrap();

    let mut text = String::new();
    while let Some(event) = stream.next().await {
        if let StreamEvent::Delta(d) = event.unwrap() {
            text.push_str(&d);
        }
    }
    assert_eq!(text, "atail");
}

#[tokio::test]
async fn stream_rejects_empty_prompt_without_calling_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let chain = ProviderChain::new(vec![provider("deepseek", &server.uri())]);
    let err = chain.stream_content(&request("   ")).await.err().unwrap();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));
}
