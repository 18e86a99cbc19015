use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, Message, StreamChunk, Usage};
use crate::pricing::{estimate_cost, PriceTable};
use crate::providers::http_client::{AuthStrategy, HttpClient};
use crate::providers::sse::{sse_data, LineBuffer};
use crate::providers::{
    Capability, CompletionStream, ProbeOutcome, Provider, ProviderConfig, ProviderType,
    SETTING_API_VERSION,
};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const DEFAULT_API_VERSION: &str = "2024-08-01-preview";

const PRICES: PriceTable = PriceTable::new(0.0025, 0.01);

/// Azure-hosted OpenAI variant. The config's `model` field carries the
/// *deployment name*, which selects the URL path; the logical model name
/// comes back in the response body and is reported verbatim.
#[derive(Debug)]
pub struct AzureOpenAiProvider {
    http: HttpClient,
    config: ProviderConfig,
    deployment: String,
    api_version: String,
}

#[derive(Debug, Serialize)]
struct AzureRequest {
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
}

#[derive(Debug, Deserialize)]
struct AzureResponse {
    model: String,
    choices: Vec<AzureChoice>,
    usage: Option<AzureUsage>,
}

#[derive(Debug, Deserialize)]
struct AzureChoice {
    message: AzureMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AzureUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl AzureOpenAiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| GatewayError::FactoryInvalidConfig {
                message: "azure-openai requires an endpoint".to_string(),
            })?;
        let deployment =
            config
                .model
                .clone()
                .ok_or_else(|| GatewayError::FactoryInvalidConfig {
                    message: "azure-openai requires a deployment name in `model`".to_string(),
                })?;
        let api_version = config
            .settings
            .get(SETTING_API_VERSION)
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let http = HttpClient::new(
            config.timeout(),
            Some(endpoint),
            "",
            &Default::default(),
            AuthStrategy::Header {
                name: "api-key".to_string(),
                value: config.api_key.clone(),
            },
        )?;

        Ok(Self {
            http,
            config,
            deployment,
            api_version,
        })
    }

    fn chat_path(&self) -> String {
        format!(
            "/openai/deployments/{}/chat/completions?api-version={}",
            self.deployment, self.api_version
        )
    }

    fn shape_request(&self, request: &CompletionRequest, streaming: bool) -> AzureRequest {
        AzureRequest {
            messages: request.effective_messages(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.clone(),
            stream: streaming.then_some(true),
        }
    }
}

#[async_trait::async_trait]
impl Provider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::AzureOpenai
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Chat,
            Capability::Completion,
            Capability::Streaming,
            Capability::ToolUse,
        ]
    }

    fn default_model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let body = self.shape_request(request, false);
        let start = Instant::now();
        let response: AzureResponse = self.http.post_json(&self.chat_path(), &body).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::protocol("response carried no choices"))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: response.model,
            finish_reason: choice.finish_reason,
            usage: response
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let body = self.shape_request(request, true);
        let response = self.http.post_stream(&self.chat_path(), &body).await?;

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
            yield Ok(StreamChunk::done(usage));
        });

        Ok(stream)
    }

    async fn health_check(&self) -> Result<ProbeOutcome> {
        self.http
            .get(&format!("/openai/models?api-version={}", self.api_version))
            .await?;
        Ok(ProbeOutcome::Pass)
    }

    fn estimate_cost(&self, request: &CompletionRequest) -> f64 {
        estimate_cost(PRICES, request)
    }
}
