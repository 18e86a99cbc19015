use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, Message, StreamChunk, Usage};
use crate::pricing::{estimate_cost, PriceTable};
use crate::providers::http_client::{AuthStrategy, HttpClient};
use crate::providers::sse::{sse_data, LineBuffer};
use crate::providers::{
    Capability, CompletionStream, ProbeOutcome, Provider, ProviderConfig, ProviderType,
};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const PRICES: PriceTable = PriceTable::new(0.0025, 0.01);

/// OpenAI-dialect client. Also serves `custom` configs, which point the
/// same wire format at an arbitrary endpoint.
#[derive(Debug)]
pub struct OpenAiProvider {
    http: HttpClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Usage::new(usage.prompt_tokens, usage.completion_tokens)
    }
}

impl OpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = HttpClient::new(
            config.timeout(),
            config.endpoint.clone(),
            DEFAULT_BASE_URL,
            &Default::default(),
            AuthStrategy::Bearer {
                token: config.api_key.clone(),
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

    fn shape_request(&self, request: &CompletionRequest, streaming: bool) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model_for(request),
            messages: request.effective_messages(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.clone(),
            stream: streaming.then_some(true),
            stream_options: streaming.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> ProviderType {
        self.config.provider_type
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Chat,
            Capability::Completion,
            Capability::Streaming,
            Capability::Vision,
            Capability::ToolUse,
        ]
    }

    fn default_model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.shape_request(request, false);
        let start = Instant::now();
        let response: OpenAiResponse = self.http.post_json("/chat/completions", &body).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::protocol("response carried no choices"))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            finish_reason: choice.finish_reason,
            usage: response.usage.map(Usage::from),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let body = self.shape_request(request, true);
        let response = self.http.post_stream("/chat/completions", &body).await?;

        let stream = Box::pin(stream! {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut usage: Option<Usage> = None;

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
                    if payload == "[DONE]" {
                        yield Ok(StreamChunk::done(usage.take()));
                        return;
                    }
                    let frame: serde_json::Value = match serde_json::from_str(payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };
                    if let Some(u) = frame.get("usage").filter(|u| !u.is_null()) {
                        usage = Some(Usage::new(
                            u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                            u["completion_tokens"].as_u64().unwrap_or(0) as u32,
                        ));
                    }
                    if let Some(delta) = frame
                        .pointer("/choices/0/delta/content")
                        .and_then(|c| c.as_str())
                    {
                        if !delta.is_empty() {
                            yield Ok(StreamChunk::content(delta));
                        }
                    }
                }
            }
            // Stream ended without a [DONE] marker; close out anyway.
            yield Ok(StreamChunk::done(usage));
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<ProbeOutcome> {
        self.http.get("/models").await?;
        Ok(ProbeOutcome::Pass)
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> f64 {
        estimate_cost(PRICES, request)
    }
}
