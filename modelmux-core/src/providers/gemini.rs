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
use serde::Serialize;
use std::time::Instant;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const PRICES: PriceTable = PriceTable::new(0.00125, 0.005);

/// Gemini carries its API key as a URL query parameter and frames chat as
/// `contents` with `user`/`model` roles.
#[derive(Debug)]
pub struct GeminiProvider {
    http: HttpClient,
    config: ProviderConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContentBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiContentBody {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = HttpClient::new(
            config.timeout(),
            config.endpoint.clone(),
            DEFAULT_BASE_URL,
            &Default::default(),
            AuthStrategy::Query {
                name: "key".to_string(),
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

    fn shape_request(&self, request: &CompletionRequest) -> GeminiRequest {
        let mut system = String::new();
        let mut contents = Vec::new();

        for message in request.effective_messages() {
            match message.role {
                Role::System => {
                    if !system.is_empty() {
                        system.push('\n');
                    }
                    system.push_str(&message.content);
                }
                Role::User => contents.push(GeminiContent {
                    role: "user",
                    parts: vec![GeminiPart {
                        text: message.content,
                    }],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: "model",
                    parts: vec![GeminiPart {
                        text: message.content,
                    }],
                }),
            }
        }

        let generation_config = GenerationConfig {
            temperature: request.temperature,
            top_p: request.top_p,
            max_output_tokens: request.max_tokens,
            stop_sequences: request.stop.clone(),
        };

        GeminiRequest {
            contents,
            system_instruction: (!system.is_empty()).then_some(GeminiContentBody {
                parts: vec![GeminiPart { text: system }],
            }),
            generation_config: Some(generation_config),
        }
    }

    fn parse_frame(frame: &serde_json::Value) -> (String, Option<String>, Option<Usage>) {
        let text = frame
            .pointer("/candidates/0/content/parts")
            .and_then(|parts| parts.as_array())
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|part| part["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default();

        let finish_reason = frame
            .pointer("/candidates/0/finishReason")
            .and_then(|r| r.as_str())
            .map(String::from);

        let usage = frame.get("usageMetadata").map(|meta| {
            Usage::new(
                meta["promptTokenCount"].as_u64().unwrap_or(0) as u32,
                meta["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            )
        });

        (text, finish_reason, usage)
    }
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::Chat,
            Capability::Completion,
            Capability::Streaming,
            Capability::Vision,
            Capability::LongContext,
        ]
    }

    fn default_model(&self) -> Option<&str> {
        self.config.model.as_deref()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let model = self.model_for(request);
        let body = self.shape_request(request);
        let start = Instant::now();
        let response: serde_json::Value = self
            .http
            .post_json(&format!("/models/{model}:generateContent"), &body)
            .await?;

        if response.get("candidates").is_none() {
            return Err(GatewayError::protocol("response carried no candidates"));
        }
        let (content, finish_reason, usage) = Self::parse_frame(&response);

        Ok(CompletionResponse {
            content,
            model,
            finish_reason,
            usage,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let model = self.model_for(request);
        let body = self.shape_request(request);
        let response = self
            .http
            .post_stream(&format!("/models/{model}:streamGenerateContent?alt=sse"), &body)
            .await?;

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
                    let frame: serde_json::Value = match serde_json::from_str(payload) {
                        Ok(frame) => frame,
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    };
                    let (text, _, frame_usage) = Self::parse_frame(&frame);
                    if let Some(frame_usage) = frame_usage {
                        usage = Some(frame_usage);
                    }
                    if !text.is_empty() {
                        yield Ok(StreamChunk::content(text));
                    }
                }
            }
            // This dialect has no explicit terminator; end of body is done.
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
