use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, Role, StreamChunk, Usage};
use crate::pricing::{estimate_cost, PriceTable};
use crate::providers::http_client::{AuthStrategy, HttpClient};
use crate::providers::sse::LineBuffer;
use crate::providers::{
    Capability, CompletionStream, ProbeOutcome, Provider, ProviderConfig, ProviderType,
};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

/// Ollama speaks NDJSON rather than SSE and needs no authentication.
/// Self-hosted, so cost is always zero.
#[derive(Debug)]
pub struct OllamaProvider {
    http: HttpClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    model: String,
    message: OllamaResponseMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = HttpClient::new(
            config.timeout(),
            config.endpoint.clone(),
            DEFAULT_BASE_URL,
            &Default::default(),
            AuthStrategy::None,
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

    fn shape_request(&self, request: &CompletionRequest, streaming: bool) -> OllamaRequest {
        let messages = request
            .effective_messages()
            .into_iter()
            .map(|message| OllamaMessage {
                role: match message.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: message.content,
            })
            .collect();

        OllamaRequest {
            model: self.model_for(request),
            messages,
            stream: streaming,
            options: OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
                stop: request.stop.clone(),
            },
        }
    }
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Chat,
            Capability::Completion,
            Capability::Streaming,
        ]
    }

    fn default_model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.shape_request(request, false);
        let start = Instant::now();
        let response: OllamaResponse = self.http.post_json("/api/chat", &body).await?;

        let usage = Usage::new(
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0),
        );

        Ok(CompletionResponse {
            content: response.message.content,
            model: response.model,
            finish_reason: response.done_reason,
            usage: Some(usage),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let body = self.shape_request(request, true);
        let response = self.http.post_stream("/api/chat", &body).await?;

        let stream = Box::pin(stream! {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(GatewayError::from(e));
                        return;
                    }
                };
                lines.push(&chunk);

                // One JSON object per line; the terminal object carries
                // `done: true` and the token counts.
                while let Some(line) = lines.next_line() {
                    if line.is_empty() {
                        continue;
                    }
                    let frame: serde_json::Value = match serde_json::from_str(&line) {
                        Ok(frame) => frame,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };
                    if let Some(content) =
                        frame.pointer("/message/content").and_then(|c| c.as_str())
                    {
                        if !content.is_empty() {
                            yield Ok(StreamChunk::content(content));
                        }
                    }
                    if frame["done"].as_bool().unwrap_or(false) {
                        let usage = Usage::new(
                            frame["prompt_eval_count"].as_u64().unwrap_or(0) as u32,
                            frame["eval_count"].as_u64().unwrap_or(0) as u32,
                        );
                        yield Ok(StreamChunk::done(Some(usage)));
                        return;
                    }
                }
            }
            yield Ok(StreamChunk::done(None));
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<ProbeOutcome> {
        self.http.get("/api/tags").await?;
        Ok(ProbeOutcome::Pass)
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> f64 {
        estimate_cost(PriceTable::FREE, request)
    }
}
