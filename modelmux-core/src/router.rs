//! # Request Router
//!
//! Per request, the router asks the registry for healthy candidates, hands
//! them to the configured strategy, invokes the chosen provider, records
//! latency and error metrics, and retries at most once on a different
//! healthy candidate when the failure is transient.
//!
//! The router owns no providers; it holds the registry, the strategy, the
//! default weight table, and the per-provider metrics.

use crate::error::{GatewayError, Result};
use crate::models::{CompletionRequest, CompletionResponse, StreamChunk, Usage};
use crate::providers::{HealthRecord, Provider, ProviderType};
use crate::registry::ProviderRegistry;
use crate::strategy::{effective_weights, select, RoutingStrategy, SelectionInputs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use futures::StreamExt;

/// Per-provider request counters and running-mean latency.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
}

impl RouteMetrics {
    fn record_success(&mut self, latency_ms: u64) {
        self.request_count += 1;
        let n = self.request_count as f64;
        self.avg_latency_ms = ((n - 1.0) * self.avg_latency_ms + latency_ms as f64) / n;
    }

    fn record_error(&mut self) {
        self.error_count += 1;
    }
}

/// Per-call routing options.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Bypass the strategy and use this provider (must be enabled).
    pub preferred_provider: Option<String>,
    /// Per-request weight overrides, overlaid on the router defaults.
    pub weights: HashMap<String, f64>,
    pub disable_failover: bool,
}

/// How a request was served.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub provider_name: String,
    pub provider_type: ProviderType,
    pub model: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub estimated_cost: f64,
}

/// One provider's row in the status map.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub config: crate::models::ProviderSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
    pub metrics: RouteMetrics,
    /// Normalized weight this provider would get in the next selection,
    /// zero when it is not a candidate.
    pub effective_weight: f64,
}

pub struct Router {
    registry: Arc<ProviderRegistry>,
    strategy: RwLock<RoutingStrategy>,
    metrics: Mutex<HashMap<String, RouteMetrics>>,
    default_weights: RwLock<HashMap<String, f64>>,
    default_provider: RwLock<Option<String>>,
    round_robin_cursor: AtomicUsize,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            strategy: RwLock::new(RoutingStrategy::Weighted),
            metrics: Mutex::new(HashMap::new()),
            default_weights: RwLock::new(HashMap::new()),
            default_provider: RwLock::new(None),
            round_robin_cursor: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn strategy(&self) -> RoutingStrategy {
        *self.strategy.read().expect("strategy lock poisoned")
    }

    pub fn set_strategy(&self, strategy: RoutingStrategy) {
        *self.strategy.write().expect("strategy lock poisoned") = strategy;
    }

    pub fn default_provider(&self) -> Option<String> {
        self.default_provider
            .read()
            .expect("default provider lock poisoned")
            .clone()
    }

    pub fn set_default_provider(&self, name: Option<String>) {
        *self
            .default_provider
            .write()
            .expect("default provider lock poisoned") = name;
    }

    pub fn default_weights(&self) -> HashMap<String, f64> {
        self.default_weights
            .read()
            .expect("weights lock poisoned")
            .clone()
    }

    pub fn set_default_weights(&self, weights: HashMap<String, f64>) {
        *self.default_weights.write().expect("weights lock poisoned") = weights;
    }

    pub fn metrics_for(&self, name: &str) -> RouteMetrics {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    fn record_success(&self, name: &str, latency_ms: u64) {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_default()
            .record_success(latency_ms);
    }

    fn record_error(&self, name: &str) {
        self.metrics
            .lock()
            .expect("metrics lock poisoned")
            .entry(name.to_string())
            .or_default()
            .record_error();
    }

    /// Candidates in deterministic (name) order: healthy providers, or
    /// every enabled provider when none has a routable probe yet.
    fn candidates(&self) -> Result<Vec<String>> {
        let healthy = self.registry.get_healthy_providers();
        let candidates = if healthy.is_empty() {
            self.registry.list_enabled()
        } else {
            healthy
        };
        if candidates.is_empty() {
            return Err(GatewayError::NoProviders);
        }
        Ok(candidates)
    }

    /// Resolve the provider to try first, plus the remaining candidates
    /// eligible as failover targets.
    async fn pick(
        &self,
        request: &CompletionRequest,
        options: &RouteOptions,
    ) -> Result<(String, Vec<String>)> {
        if let Some(preferred) = &options.preferred_provider {
            let config = self.registry.get_config(preferred)?;
            if !config.enabled {
                return Err(GatewayError::NotFound {
                    name: preferred.clone(),
                });
            }
            let fallbacks = self
                .candidates()
                .unwrap_or_default()
                .into_iter()
                .filter(|name| name != preferred)
                .collect();
            return Ok((preferred.clone(), fallbacks));
        }

        let candidates = self.candidates()?;
        let chosen = self
            .select_from(&candidates, request, options)
            .await
            .ok_or(GatewayError::NoProviders)?;
        let fallbacks = candidates
            .into_iter()
            .filter(|name| name != &chosen)
            .collect();
        Ok((chosen, fallbacks))
    }

    async fn select_from(
        &self,
        candidates: &[String],
        request: &CompletionRequest,
        options: &RouteOptions,
    ) -> Option<String> {
        let strategy = self.strategy();
        let weights = effective_weights(candidates, &self.default_weights(), &options.weights);

        let costs = if strategy == RoutingStrategy::CostOptimized {
            let mut costs = HashMap::new();
            for name in candidates {
                if let Ok(provider) = self.registry.get(name).await {
                    costs.insert(name.clone(), provider.estimate_cost(request));
                }
            }
            Some(costs)
        } else {
            None
        };

        let default_provider = self.default_provider();
        let inputs = SelectionInputs {
            candidates,
            weights: &weights,
            default_provider: default_provider.as_deref(),
            costs: costs.as_ref(),
        };
        let chosen = select(strategy, &inputs, &self.round_robin_cursor);
        if let Some(chosen) = &chosen {
            tracing::debug!(provider = %chosen, strategy = %strategy, "selected provider");
        }
        chosen
    }

    fn route_info(
        provider: &dyn Provider,
        request: &CompletionRequest,
        response: &CompletionResponse,
    ) -> RouteInfo {
        RouteInfo {
            provider_name: provider.name().to_string(),
            provider_type: provider.provider_type(),
            model: response.model.clone(),
            latency_ms: response.latency_ms,
            usage: response.usage,
            estimated_cost: provider.estimate_cost(request),
        }
    }

    /// Select a provider, perform the completion, and record metrics.
    ///
    /// Transient failures (`rate-limit`, `server`, `unavailable`) get one
    /// failover to a different candidate unless disabled; a second failure
    /// surfaces as `all-providers-failed` wrapping the last cause.
    pub async fn route(
        &self,
        request: &CompletionRequest,
        options: &RouteOptions,
    ) -> Result<(CompletionResponse, RouteInfo)> {
        let correlation_id = request
            .metadata
            .correlation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (primary, fallbacks) = self.pick(request, options).await?;
        tracing::debug!(%correlation_id, provider = %primary, "routing completion");

        let first_error = match self.attempt(&primary, request).await {
            Ok(success) => return Ok(success),
            Err(e) => e,
        };

        if options.disable_failover || !first_error.is_retryable() {
            return Err(first_error);
        }
        let Some(fallback) = self.select_from(&fallbacks, request, options).await else {
            return Err(first_error);
        };
        tracing::warn!(
            failed = %primary,
            fallback = %fallback,
            error = %first_error,
            "failing over"
        );

        match self.attempt(&fallback, request).await {
            Ok(success) => Ok(success),
            Err(second_error) => Err(GatewayError::AllProvidersFailed {
                source: Box::new(second_error),
            }),
        }
    }

    async fn attempt(
        &self,
        name: &str,
        request: &CompletionRequest,
    ) -> Result<(CompletionResponse, RouteInfo)> {
        let provider = self.registry.get(name).await?;
        let start = Instant::now();
        match provider.complete(request).await {
            Ok(mut response) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                response.latency_ms = latency_ms;
                self.record_success(name, latency_ms);
                let mut info = Self::route_info(provider.as_ref(), request, &response);
                info.latency_ms = latency_ms;
                Ok((response, info))
            }
            Err(e) => {
                self.record_error(name);
                Err(e)
            }
        }
    }

    /// Streaming variant: every decoded chunk is handed to `handler` as it
    /// arrives; deltas are accumulated into the final response content and
    /// the terminal chunk supplies usage.
    ///
    /// A handler error aborts the stream (the connection drops with it)
    /// and surfaces. Failover applies only while establishing the stream;
    /// once a chunk has been delivered, errors surface directly.
    pub async fn route_stream<F>(
        &self,
        request: &CompletionRequest,
        mut handler: F,
        options: &RouteOptions,
    ) -> Result<(CompletionResponse, RouteInfo)>
    where
        F: FnMut(&StreamChunk) -> Result<()> + Send,
    {
        let (primary, fallbacks) = self.pick(request, options).await?;

        let (provider, stream) = match self.open_stream(&primary, request).await {
            Ok(opened) => opened,
            Err(first_error) => {
                if options.disable_failover || !first_error.is_retryable() {
                    return Err(first_error);
                }
                let Some(fallback) = self.select_from(&fallbacks, request, options).await else {
                    return Err(first_error);
                };
                tracing::warn!(failed = %primary, fallback = %fallback, "failing over stream");
                match self.open_stream(&fallback, request).await {
                    Ok(opened) => opened,
                    Err(second_error) => {
                        return Err(GatewayError::AllProvidersFailed {
                            source: Box::new(second_error),
                        })
                    }
                }
            }
        };

        let name = provider.name().to_string();
        let start = Instant::now();
        let mut stream = stream;
        let mut content = String::new();
        let mut usage = None;

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.record_error(&name);
                    return Err(e);
                }
            };
            handler(&chunk)?;
            content.push_str(&chunk.content);
            if chunk.usage.is_some() {
                usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        self.record_success(&name, latency_ms);

        let response = CompletionResponse {
            content,
            model: request
                .model
                .clone()
                .or_else(|| provider.default_model().map(String::from))
                .unwrap_or_default(),
            finish_reason: None,
            usage,
            latency_ms,
        };
        let mut info = Self::route_info(provider.as_ref(), request, &response);
        info.latency_ms = latency_ms;
        Ok((response, info))
    }

    async fn open_stream(
        &self,
        name: &str,
        request: &CompletionRequest,
    ) -> Result<(Arc<dyn Provider>, crate::providers::CompletionStream)> {
        let provider = self.registry.get(name).await?;
        match provider.complete_stream(request).await {
            Ok(stream) => Ok((provider, stream)),
            Err(e) => {
                self.record_error(name);
                Err(e)
            }
        }
    }

    /// Status map over every registered provider: masked config summary,
    /// cached health, metrics, and the weight the next selection would use.
    pub fn provider_status(&self) -> HashMap<String, ProviderStatus> {
        let configs = self.registry.list();
        let candidates = self.candidates().unwrap_or_default();
        let weights = effective_weights(&candidates, &self.default_weights(), &HashMap::new());
        let metrics = self.metrics.lock().expect("metrics lock poisoned");

        configs
            .into_iter()
            .map(|config| {
                let status = ProviderStatus {
                    health: self.registry.get_health_result(&config.name),
                    metrics: metrics.get(&config.name).copied().unwrap_or_default(),
                    effective_weight: weights.get(&config.name).copied().unwrap_or(0.0),
                    config: config.summary(),
                };
                (status.config.name.clone(), status)
            })
            .collect()
    }
}
