//! Wire-level tests for the dialect clients against a mock backend:
//! request shaping, authentication headers, response parsing, streaming
//! decoders, and status-code error mapping.

use futures::StreamExt;
use modelmux_core::models::{CompletionRequest, Message};
use modelmux_core::providers::anthropic::AnthropicProvider;
use modelmux_core::providers::azure::AzureOpenAiProvider;
use modelmux_core::providers::gemini::GeminiProvider;
use modelmux_core::providers::ollama::OllamaProvider;
use modelmux_core::providers::openai::OpenAiProvider;
use modelmux_core::providers::{ProbeOutcome, Provider};
use modelmux_core::{ProviderConfig, ProviderType, Usage};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_provider(server: &MockServer) -> OpenAiProvider {
    let config = ProviderConfig::new("openai", ProviderType::Openai)
        .with_api_key("sk-test")
        .with_endpoint(server.uri());
    OpenAiProvider::new(config).unwrap()
}

fn ollama_provider(server: &MockServer) -> OllamaProvider {
    let config = ProviderConfig::new("ollama", ProviderType::Ollama)
        .with_endpoint(server.uri())
        .with_model("llama3");
    OllamaProvider::new(config).unwrap()
}

#[tokio::test]
async fn openai_complete_shapes_and_parses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = openai_provider(&server);
    let request = CompletionRequest {
        prompt: "hello".into(),
        system_prompt: Some("be terse".into()),
        model: Some("gpt-4o".into()),
        ..Default::default()
    };
    let response = provider.complete(&request).await.unwrap();
    assert_eq!(response.content, "hi there");
    assert_eq!(response.model, "gpt-4o-2024-08-06");
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage, Some(Usage::new(9, 3)));
}

#[tokio::test]
async fn openai_status_codes_map_to_taxonomy() {
    for (status, expected_kind) in [(401, "auth"), (403, "auth"), (429, "rate-limit"), (500, "server"), (503, "server")] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_json(json!({"error": {"message": "backend says no"}})),
            )
            .mount(&server)
            .await;

        let provider = openai_provider(&server);
        let err = provider
            .complete(&CompletionRequest::from_prompt("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), expected_kind, "status {status}");
        assert!(err.to_string().contains("backend says no"), "status {status}");
    }
}

#[tokio::test]
async fn retry_after_header_means_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("retry-after", "5")
                .set_body_string("overloaded"),
        )
        .mount(&server)
        .await;

    let provider = openai_provider(&server);
    let err = provider
        .complete(&CompletionRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rate-limit");
}

#[tokio::test]
async fn unparseable_success_body_is_a_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let provider = openai_provider(&server);
    let err = provider
        .complete(&CompletionRequest::from_prompt("hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "protocol");
}

#[tokio::test]
async fn openai_stream_accumulates_hello_world() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\" World\"}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":4,\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let provider = openai_provider(&server);
    let mut stream = provider
        .complete_stream(&CompletionRequest::from_prompt("greet"))
        .await
        .unwrap();

    let mut content = String::new();
    let mut content_chunks = 0;
    let mut terminal_usage = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        if chunk.done {
            terminal_usage = chunk.usage;
            break;
        }
        content_chunks += 1;
        content.push_str(&chunk.content);
    }

    assert_eq!(content_chunks, 2);
    assert_eq!(content, "Hello World");
    assert_eq!(terminal_usage, Some(Usage::new(4, 2)));
}

#[tokio::test]
async fn anthropic_hoists_system_and_authenticates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "system": "be terse",
            "messages": [{"role": "user", "content": "hello"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "msg-1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "model": "claude-3-5-haiku-20241022",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 11, "output_tokens": 2}
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig::new("anthropic", ProviderType::Anthropic)
        .with_api_key("sk-ant-test")
        .with_endpoint(server.uri());
    let provider = AnthropicProvider::new(config).unwrap();

    let request = CompletionRequest {
        prompt: "hello".into(),
        system_prompt: Some("be terse".into()),
        ..Default::default()
    };
    let response = provider.complete(&request).await.unwrap();
    assert_eq!(response.content, "hi");
    // Dialect finish reason preserved verbatim.
    assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
    assert_eq!(response.usage, Some(Usage::new(11, 2)));
}

#[tokio::test]
async fn anthropic_stream_ends_on_message_stop() {
    let server = MockServer::start().await;
    let sse_body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7}}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\" World\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":2}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes().to_vec(), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let config = ProviderConfig::new("anthropic", ProviderType::Anthropic)
        .with_api_key("sk-ant-test")
        .with_endpoint(server.uri());
    let provider = AnthropicProvider::new(config).unwrap();

    let mut stream = provider
        .complete_stream(&CompletionRequest::from_prompt("greet"))
        .await
        .unwrap();

    let mut content = String::new();
    let mut terminal_usage = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        if chunk.done {
            terminal_usage = chunk.usage;
            break;
        }
        content.push_str(&chunk.content);
    }
    assert_eq!(content, "Hello World");
    assert_eq!(terminal_usage, Some(Usage::new(7, 2)));
}

#[tokio::test]
async fn ollama_maps_eval_counts_to_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "llama3", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3",
            "message": {"role": "assistant", "content": "hey"},
            "done": true,
            "done_reason": "stop",
            "prompt_eval_count": 6,
            "eval_count": 1
        })))
        .mount(&server)
        .await;

    let provider = ollama_provider(&server);
    let response = provider
        .complete(&CompletionRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "hey");
    assert_eq!(response.usage, Some(Usage::new(6, 1)));
}

#[tokio::test]
async fn ollama_ndjson_stream_terminates_on_done() {
    let server = MockServer::start().await;
    let ndjson_body = concat!(
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"Hello\"},\"done\":false}\n",
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\" World\"},\"done\":false}\n",
        "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"prompt_eval_count\":5,\"eval_count\":2}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(ndjson_body.as_bytes().to_vec(), "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let provider = ollama_provider(&server);
    let mut stream = provider
        .complete_stream(&CompletionRequest::from_prompt("greet"))
        .await
        .unwrap();

    let mut content = String::new();
    let mut chunks = 0;
    let mut terminal_usage = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        if chunk.done {
            terminal_usage = chunk.usage;
            break;
        }
        chunks += 1;
        content.push_str(&chunk.content);
    }
    assert_eq!(chunks, 2);
    assert_eq!(content, "Hello World");
    assert_eq!(terminal_usage, Some(Usage::new(5, 2)));
}

#[tokio::test]
async fn ollama_probe_hits_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = ollama_provider(&server);
    assert_eq!(provider.health_check().await.unwrap(), ProbeOutcome::Pass);
}

#[tokio::test]
async fn probe_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = ollama_provider(&server);
    assert!(provider.health_check().await.is_err());
}

#[tokio::test]
async fn azure_splices_deployment_into_the_path() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/deployments/gpt4-deploy/chat/completions"))
        .and(query_param("api-version", "2024-08-01-preview"))
        .and(header("api-key", "azure-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-2",
            "model": "gpt-4o",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "from azure"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig::new("azure", ProviderType::AzureOpenai)
        .with_api_key("azure-key")
        .with_endpoint(server.uri())
        .with_model("gpt4-deploy");
    let provider = AzureOpenAiProvider::new(config).unwrap();

    let response = provider
        .complete(&CompletionRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "from azure");
    // The logical model comes from the response, not the deployment name.
    assert_eq!(response.model, "gpt-4o");
}

#[tokio::test]
async fn gemini_authenticates_via_query_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-1.5-flash:generateContent"))
        .and(query_param("key", "google-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "from gemini"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig::new("gemini", ProviderType::Gemini)
        .with_api_key("google-key")
        .with_endpoint(server.uri());
    let provider = GeminiProvider::new(config).unwrap();

    let response = provider
        .complete(&CompletionRequest::from_prompt("hi"))
        .await
        .unwrap();
    assert_eq!(response.content, "from gemini");
    assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
    assert_eq!(response.usage, Some(Usage::new(4, 2)));
}

#[tokio::test]
async fn messages_take_precedence_over_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "second"},
                {"role": "user", "content": "third"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "ok"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = openai_provider(&server);
    let request = CompletionRequest {
        prompt: "ignored".into(),
        messages: vec![
            Message::user("first"),
            Message::assistant("second"),
            Message::user("third"),
        ],
        ..Default::default()
    };
    provider.complete(&request).await.unwrap();
}
