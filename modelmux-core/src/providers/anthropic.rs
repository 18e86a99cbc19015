use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, Role, StreamChunk, Usage};
use crate::pricing::{estimate_cost, PriceTable};
use crate::providers::http_client::{AuthStrategy, HttpClient};
use crate::providers::sse::{sse_data, LineBuffer};
use crate::providers::{
    Capability, CompletionStream, ProbeOutcome, Provider, ProviderConfig, ProviderType,
};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

const PRICES: PriceTable = PriceTable::new(0.003, 0.015);

#[derive(Debug)]
pub struct AnthropicProvider {
    http: HttpClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let mut headers = HashMap::new();
        headers.insert(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        );
        let http = HttpClient::new(
            config.timeout(),
            config.endpoint.clone(),
            DEFAULT_BASE_URL,
            &headers,
            AuthStrategy::Header {
                name: "x-api-key".to_string(),
                value: config.api_key.clone(),
            },
        )?;
        Ok(Self { http, config })
    }

    fn model_for(&self, request: &CompletionRequest) -> String {
        request
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// The dialect keeps the system prompt out of the message list; system
    /// role messages are hoisted into the dedicated field.
    fn shape_request(&self, request: &CompletionRequest, streaming: bool) -> AnthropicRequest {
        let mut system = String::new();
        let mut messages = Vec::new();

        for message in request.effective_messages() {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
                Role::User => messages.push(AnthropicMessage {
                    role: "user",
                    content: message.content,
                }),
                Role::Assistant => messages.push(AnthropicMessage {
                    role: "assistant",
                    content: message.content,
                }),
            }
        }

        AnthropicRequest {
            model: self.model_for(request),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system: (!system.is_empty()).then_some(system),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.clone(),
            stream: streaming.then_some(true),
        }
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Chat,
            Capability::Completion,
            Capability::Streaming,
            Capability::Vision,
            Capability::LongContext,
            Capability::ToolUse,
        ]
    }

    fn default_model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.shape_request(request, false);
        let start = Instant::now();
        let response: AnthropicResponse = self.http.post_json("/v1/messages", &body).await?;

        let content = response
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(CompletionResponse {
            content,
            model: response.model,
            finish_reason: response.stop_reason,
            usage: Some(Usage::new(
                response.usage.input_tokens,
                response.usage.output_tokens,
            )),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let body = self.shape_request(request, true);
        let response = self.http.post_stream("/v1/messages", &body).await?;

        let stream = Box::pin(stream! {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GatewayError::from(e));
                        return;
                    }
                };
                lines.push(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(payload) = sse_data(&line) else {
                        continue;
                    };
                    let frame: serde_json::Value = match serde_json::from_str(payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };
                    match frame["type"].as_str() {
                        Some("message_start") => {
                            input_tokens = frame
                                .pointer("/message/usage/input_tokens")
                                .and_then(|t| t.as_u64())
                                .unwrap_or(0) as u32;
                        }
                        Some("content_block_delta") => {
                            if let Some(text) =
                                frame.pointer("/delta/text").and_then(|t| t.as_str())
                            {
                                yield Ok(StreamChunk::content(text));
                            }
                        }
                        Some("message_delta") => {
                            if let Some(tokens) = frame
                                .pointer("/usage/output_tokens")
                                .and_then(|t| t.as_u64())
                            {
                                output_tokens = tokens as u32;
                            }
                        }
                        Some("message_stop") => {
                            yield Ok(StreamChunk::done(Some(Usage::new(
                                input_tokens,
                                output_tokens,
                            ))));
                            return;
                        }
                        _ => {}
                    }
                }
            }
            yield Ok(StreamChunk::done(Some(Usage::new(input_tokens, output_tokens))));
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<ProbeOutcome> {
        // No cheap GET exists on this dialect; a 1-token message is the probe.
        let probe = AnthropicRequest {
            model: self.model_for(&CompletionRequest::default()),
            max_tokens: 1,
            messages: vec![AnthropicMessage {
                role: "user",
                content: "Hi".to_string(),
            }],
            system: None,
            temperature: Some(0.0),
            top_p: None,
            stop_sequences: Vec::new(),
            stream: None,
        };
        self.http
            .post_json::<_, serde_json::Value>("/v1/messages", &probe)
            .await?;
        Ok(ProbeOutcome::Pass)
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> f64 {
        estimate_cost(PRICES, request)
    }
}
