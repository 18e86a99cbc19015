//! # Provider Abstraction
//!
//! The uniform contract over backend LLM services. A [`Provider`] translates
//! the generic [`CompletionRequest`](crate::models::CompletionRequest) into
//! one backend's HTTP dialect and returns a unified response; everything
//! above this layer (registry, router, management surface) is
//! dialect-agnostic.
//!
//! Dialect differences are confined to request shaping and response
//! parsing inside the per-dialect modules; the shared HTTP/SSE plumbing
//! lives in [`http_client`] and [`sse`].

use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, ProviderSummary, StreamChunk};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

pub mod anthropic;
pub mod azure;
pub mod gemini;
pub mod http_client;
pub mod ollama;
pub mod openai;
pub mod sse;

/// A pinned boxed stream of completion chunks.
///
/// Decoders yield chunk-by-chunk with no look-ahead beyond one line, so
/// consumers see deltas as the backend emits them.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// The closed set of supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Anthropic,
    Openai,
    Ollama,
    Gemini,
    AzureOpenai,
    Bedrock,
    Custom,
}

impl ProviderType {
    pub const ALL: [ProviderType; 7] = [
        ProviderType::Anthropic,
        ProviderType::Openai,
        ProviderType::Ollama,
        ProviderType::Gemini,
        ProviderType::AzureOpenai,
        ProviderType::Bedrock,
        ProviderType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Anthropic => "anthropic",
            ProviderType::Openai => "openai",
            ProviderType::Ollama => "ollama",
            ProviderType::Gemini => "gemini",
            ProviderType::AzureOpenai => "azure-openai",
            ProviderType::Bedrock => "bedrock",
            ProviderType::Custom => "custom",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anthropic" => Ok(ProviderType::Anthropic),
            "openai" => Ok(ProviderType::Openai),
            "ollama" => Ok(ProviderType::Ollama),
            "gemini" => Ok(ProviderType::Gemini),
            "azure-openai" => Ok(ProviderType::AzureOpenai),
            "bedrock" => Ok(ProviderType::Bedrock),
            "custom" => Ok(ProviderType::Custom),
            other => Err(GatewayError::validation(format!(
                "unknown provider type: {other}"
            ))),
        }
    }
}

/// Capabilities a provider instance reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Chat,
    Completion,
    Streaming,
    Vision,
    LongContext,
    ToolUse,
}

/// Declarative registration of a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique, stable identifier across the registry.
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Secret; may be empty for local backends.
    #[serde(default)]
    pub api_key: String,
    /// Base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Default model; for azure-openai this doubles as the deployment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Advisory; consulted by the sticky-failover strategy.
    #[serde(default)]
    pub priority: i32,
    /// 0-100, consulted by the weighted strategy.
    #[serde(default)]
    pub weight: u32,
    /// Advisory requests-per-minute hint; not enforced by the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Per-request HTTP deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Dialect-specific knobs (`api_version`, `region`, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub settings: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// Settings key carrying the Azure API version.
pub const SETTING_API_VERSION: &str = "api_version";
/// Settings key carrying the Bedrock region.
pub const SETTING_REGION: &str = "region";

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

impl ProviderConfig {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            provider_type,
            api_key: String::new(),
            endpoint: None,
            model: None,
            enabled: true,
            priority: 0,
            weight: 0,
            rate_limit: None,
            timeout_seconds: None,
            settings: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Per-request HTTP deadline, falling back to the crate default.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS))
    }

    /// Validate shape and per-type required fields.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::validation("provider name must not be empty"));
        }
        if self.weight > 100 {
            return Err(GatewayError::validation(format!(
                "weight must be in 0-100, got {}",
                self.weight
            )));
        }
        if let Some(timeout) = self.timeout_seconds {
            if timeout == 0 {
                return Err(GatewayError::validation("timeout_seconds must be > 0"));
            }
        }
        match self.provider_type {
            ProviderType::Anthropic | ProviderType::Openai | ProviderType::Gemini => {
                if self.api_key.is_empty() {
                    return Err(GatewayError::validation(format!(
                        "{} requires an api_key",
                        self.provider_type
                    )));
                }
            }
            ProviderType::Ollama => {
                if self.endpoint.is_none() {
                    return Err(GatewayError::validation("ollama requires an endpoint"));
                }
            }
            ProviderType::AzureOpenai => {
                if self.endpoint.is_none() || self.api_key.is_empty() || self.model.is_none() {
                    return Err(GatewayError::validation(
                        "azure-openai requires endpoint, api_key and a deployment name in `model`",
                    ));
                }
            }
            ProviderType::Bedrock => {
                if !self.settings.contains_key(SETTING_REGION) {
                    return Err(GatewayError::validation(
                        "bedrock requires a `region` setting",
                    ));
                }
            }
            ProviderType::Custom => {
                if self.endpoint.is_none() {
                    return Err(GatewayError::validation("custom requires an endpoint"));
                }
            }
        }
        Ok(())
    }

    /// Echo-safe view with the API key masked.
    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            name: self.name.clone(),
            provider_type: self.provider_type.as_str().to_string(),
            api_key: mask_api_key(&self.api_key),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            enabled: self.enabled,
            priority: self.priority,
            weight: self.weight,
            timeout_seconds: self.timeout_seconds,
            settings: self.settings.clone(),
        }
    }
}

/// Partial update applied by `Registry::update`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<HashMap<String, String>>,
}

impl ProviderConfigPatch {
    /// Overlay this patch onto an existing config.
    pub fn apply_to(&self, config: &ProviderConfig) -> ProviderConfig {
        let mut updated = config.clone();
        if let Some(api_key) = &self.api_key {
            updated.api_key = api_key.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            updated.endpoint = Some(endpoint.clone());
        }
        if let Some(model) = &self.model {
            updated.model = Some(model.clone());
        }
        if let Some(enabled) = self.enabled {
            updated.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            updated.priority = priority;
        }
        if let Some(weight) = self.weight {
            updated.weight = weight;
        }
        if let Some(rate_limit) = self.rate_limit {
            updated.rate_limit = Some(rate_limit);
        }
        if let Some(timeout_seconds) = self.timeout_seconds {
            updated.timeout_seconds = Some(timeout_seconds);
        }
        if let Some(settings) = &self.settings {
            updated.settings = settings.clone();
        }
        updated
    }
}

/// Cached probe state for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    /// Whether a provider in this state is eligible for routing.
    /// Degraded still serves traffic; unknown has never been probed.
    pub fn is_routable(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// The cached result of the most recent probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl HealthRecord {
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            message: None,
            checked_at: chrono::Utc::now(),
            latency_ms: None,
        }
    }
}

/// What a successful probe reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pass,
    /// Reachable but with a non-fatal warning; maps to `Degraded`.
    Warn(String),
}

/// Uniform contract over backend LLM services.
///
/// Instances are immutable after construction; configuration changes go
/// through the registry, which recreates the instance.
#[async_trait::async_trait]
pub trait Provider: Send + Sync + fmt::Debug {
    /// The registered name (unique across the registry).
    fn name(&self) -> &str;

    fn provider_type(&self) -> ProviderType;

    fn capabilities(&self) -> Vec<Capability>;

    /// Default model used when the request carries no override.
    fn default_model(&self) -> Option<&str>;

    /// Perform a completion request against the backend.
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse>;

    /// Open a streaming completion. The stream yields content deltas and a
    /// terminal `Done` chunk; errors mid-stream surface as stream items.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream>;

    /// Probe the backend. `Err` means unreachable; the registry maps the
    /// outcome onto the health cache.
    async fn health_check(&self) -> Result<ProbeOutcome>;

    /// Estimated USD cost of serving `request` on this backend.
    fn estimate_cost(&self, request: &CompletionRequest) -> f64;
}

/// Mask a secret to `first4...last4`.
///
/// Keys of 8 characters or fewer become `***`; the empty string stays
/// empty. Idempotent on already-masked strings longer than 8.
pub fn mask_api_key(key: &str) -> String {
    if key.is_empty() {
        return String::new();
    }
    if key.len() <= 8 {
        return "***".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}
