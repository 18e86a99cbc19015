//! # Bootstrap
//!
//! Synthesizes provider configs from environment variables, registers them,
//! and optionally runs a first health check per provider. Bootstrap never
//! fails the process: misconfigured providers land in `failed`, reachable
//! but unwell ones in `warnings`.
//!
//! Every entry point that reads the process environment has a `_from`
//! variant over an injected lookup so tests run hermetically.

use crate::error::{GatewayError, Result};
use crate::providers::{ProviderConfig, ProviderType, SETTING_API_VERSION, SETTING_REGION};
use crate::registry::ProviderRegistry;
use crate::router::Router;
use crate::strategy::RoutingStrategy;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_DEFAULT_PROVIDER: &str = "LLM_DEFAULT_PROVIDER";
pub const ENV_PROVIDERS_FILTER: &str = "LLM_PROVIDERS";
pub const ENV_ROUTING_STRATEGY: &str = "LLM_ROUTING_STRATEGY";
pub const ENV_PROVIDER_WEIGHTS: &str = "PROVIDER_WEIGHTS";

const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for [`bootstrap_from_env`].
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Explicit provider filter; overrides `LLM_PROVIDERS` when set.
    pub providers: Option<Vec<String>>,
    pub skip_health_check: bool,
    pub health_check_timeout: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            providers: None,
            skip_health_check: false,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }
}

/// What bootstrap accomplished.
#[derive(Debug, Default)]
pub struct BootstrapResult {
    pub bootstrapped: Vec<String>,
    /// Providers whose registration failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Non-fatal findings: filtered names that are not configured,
    /// unhealthy or degraded first probes.
    pub warnings: Vec<String>,
    /// `LLM_DEFAULT_PROVIDER`, when it names a registered provider.
    pub default_provider: Option<String>,
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_timeout(lookup: &dyn Fn(&str) -> Option<String>, var: &str) -> Option<u64> {
    let raw = lookup(var)?;
    match raw.parse::<u64>() {
        Ok(seconds) if seconds > 0 => Some(seconds),
        _ => {
            tracing::warn!(var, value = %raw, "ignoring unparseable timeout");
            None
        }
    }
}

/// Synthesize the config for one provider, or `None` when its required
/// variables are absent.
fn synthesize_one(
    provider_type: ProviderType,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<ProviderConfig> {
    let name = provider_type.as_str();
    match provider_type {
        ProviderType::Anthropic => {
            let api_key = lookup("ANTHROPIC_API_KEY")?;
            let mut config = ProviderConfig::new(name, provider_type).with_api_key(api_key);
            config.model = lookup("ANTHROPIC_MODEL");
            config.endpoint = lookup("ANTHROPIC_ENDPOINT");
            config.timeout_seconds = parse_timeout(lookup, "ANTHROPIC_TIMEOUT_SECONDS");
            Some(config)
        }
        ProviderType::Openai => {
            let api_key = lookup("OPENAI_API_KEY")?;
            let mut config = ProviderConfig::new(name, provider_type).with_api_key(api_key);
            config.model = lookup("OPENAI_MODEL");
            config.endpoint = lookup("OPENAI_ENDPOINT");
            config.timeout_seconds = parse_timeout(lookup, "OPENAI_TIMEOUT_SECONDS");
            Some(config)
        }
        ProviderType::Ollama => {
            let endpoint = lookup("OLLAMA_ENDPOINT")?;
            let mut config = ProviderConfig::new(name, provider_type).with_endpoint(endpoint);
            config.model = lookup("OLLAMA_MODEL");
            config.timeout_seconds = parse_timeout(lookup, "OLLAMA_TIMEOUT_SECONDS");
            Some(config)
        }
        ProviderType::Gemini => {
            let api_key = lookup("GOOGLE_API_KEY")?;
            let mut config = ProviderConfig::new(name, provider_type).with_api_key(api_key);
            config.model = lookup("GOOGLE_MODEL");
            config.endpoint = lookup("GOOGLE_ENDPOINT");
            config.timeout_seconds = parse_timeout(lookup, "GOOGLE_TIMEOUT_SECONDS");
            Some(config)
        }
        ProviderType::AzureOpenai => {
            let endpoint = lookup("AZURE_OPENAI_ENDPOINT")?;
            let api_key = lookup("AZURE_OPENAI_API_KEY")?;
            let deployment = lookup("AZURE_OPENAI_DEPLOYMENT_NAME")?;
            let mut config = ProviderConfig::new(name, provider_type)
                .with_api_key(api_key)
                .with_endpoint(endpoint)
                .with_model(deployment);
            if let Some(api_version) = lookup("AZURE_OPENAI_API_VERSION") {
                config = config.with_setting(SETTING_API_VERSION, api_version);
            }
            config.timeout_seconds = parse_timeout(lookup, "AZURE_OPENAI_TIMEOUT_SECONDS");
            Some(config)
        }
        ProviderType::Bedrock => {
            let region = lookup("BEDROCK_REGION")?;
            let mut config =
                ProviderConfig::new(name, provider_type).with_setting(SETTING_REGION, region);
            config.model = lookup("BEDROCK_MODEL");
            Some(config)
        }
        // Custom providers are registered through the management surface,
        // not the environment.
        ProviderType::Custom => None,
    }
}

fn synthesize_configs(lookup: &dyn Fn(&str) -> Option<String>) -> Vec<ProviderConfig> {
    ProviderType::ALL
        .iter()
        .filter_map(|ty| synthesize_one(*ty, lookup))
        .collect()
}

/// Providers whose required environment variables are present.
pub fn detect_configured_providers() -> Vec<String> {
    detect_configured_providers_from(&env_lookup)
}

pub fn detect_configured_providers_from(lookup: &dyn Fn(&str) -> Option<String>) -> Vec<String> {
    synthesize_configs(lookup)
        .into_iter()
        .map(|config| config.name)
        .collect()
}

/// Parse `PROVIDER_WEIGHTS`-style `name:weight,name:weight` into a
/// normalized distribution. Whitespace around tokens is tolerated;
/// malformed pairs and negative numbers fail with a `validation` error.
pub fn parse_provider_weights(raw: &str) -> Result<HashMap<String, f64>> {
    let mut weights = HashMap::new();
    for piece in raw.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let (name, value) = piece.split_once(':').ok_or_else(|| {
            GatewayError::validation(format!("malformed weight pair: {piece:?}"))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::validation(format!(
                "malformed weight pair: {piece:?}"
            )));
        }
        let weight: f64 = value.trim().parse().map_err(|_| {
            GatewayError::validation(format!("weight is not a number: {piece:?}"))
        })?;
        if weight < 0.0 {
            return Err(GatewayError::validation(format!(
                "weight must be non-negative: {piece:?}"
            )));
        }
        weights.insert(name.to_string(), weight);
    }

    let total: f64 = weights.values().sum();
    if weights.is_empty() || total <= 0.0 {
        return Err(GatewayError::validation(
            "provider weights must contain at least one positive entry",
        ));
    }
    for weight in weights.values_mut() {
        *weight /= total;
    }
    Ok(weights)
}

/// Register every environment-configured provider and run first probes.
pub async fn bootstrap_from_env(
    registry: &Arc<ProviderRegistry>,
    options: &BootstrapOptions,
) -> BootstrapResult {
    bootstrap_from(registry, options, &env_lookup).await
}

pub async fn bootstrap_from(
    registry: &Arc<ProviderRegistry>,
    options: &BootstrapOptions,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> BootstrapResult {
    let mut result = BootstrapResult::default();

    let filter: Option<Vec<String>> = options.providers.clone().or_else(|| {
        lookup(ENV_PROVIDERS_FILTER).map(|raw| {
            raw.split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
    });

    let mut configs = synthesize_configs(lookup);
    if let Some(filter) = &filter {
        let configured: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();
        for wanted in filter {
            if !configured.contains(wanted) {
                result
                    .warnings
                    .push(format!("provider {wanted} requested but not configured"));
            }
        }
        configs.retain(|config| filter.contains(&config.name));
    }

    for config in configs {
        let name = config.name.clone();
        match registry.register(config) {
            Ok(()) => result.bootstrapped.push(name),
            Err(e) => result.failed.push((name, e.to_string())),
        }
    }

    if !options.skip_health_check {
        for name in result.bootstrapped.clone() {
            match registry
                .health_check_single(&name, options.health_check_timeout)
                .await
            {
                Ok(record) if !record.status.is_routable() => {
                    result.warnings.push(format!(
                        "provider {name} is unhealthy: {}",
                        record.message.unwrap_or_default()
                    ));
                }
                Ok(record) if record.status == crate::providers::HealthStatus::Degraded => {
                    result.warnings.push(format!(
                        "provider {name} is degraded: {}",
                        record.message.unwrap_or_default()
                    ));
                }
                Ok(_) => {}
                Err(e) => result
                    .warnings
                    .push(format!("probe for {name} could not run: {e}")),
            }
        }
    }

    if let Some(default) = lookup(ENV_DEFAULT_PROVIDER) {
        if registry.has(&default) {
            result.default_provider = Some(default);
        } else {
            result
                .warnings
                .push(format!("default provider {default} is not registered"));
        }
    }

    tracing::info!(
        bootstrapped = result.bootstrapped.len(),
        failed = result.failed.len(),
        warnings = result.warnings.len(),
        "bootstrap complete"
    );
    result
}

/// Apply `LLM_ROUTING_STRATEGY`, `PROVIDER_WEIGHTS`, and the bootstrap's
/// default provider to a router. Malformed values fail with `validation`.
pub fn configure_router_from_env(router: &Router, default_provider: Option<String>) -> Result<()> {
    configure_router_from(router, default_provider, &env_lookup)
}

pub fn configure_router_from(
    router: &Router,
    default_provider: Option<String>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(raw) = lookup(ENV_ROUTING_STRATEGY) {
        router.set_strategy(raw.parse::<RoutingStrategy>()?);
    }
    if let Some(raw) = lookup(ENV_PROVIDER_WEIGHTS) {
        router.set_default_weights(parse_provider_weights(&raw)?);
    }
    router.set_default_provider(default_provider);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ProviderFactories;

    fn lookup_from<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    fn empty_registry() -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::new(ProviderFactories::builtin()))
    }

    fn skip_health() -> BootstrapOptions {
        BootstrapOptions {
            skip_health_check: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn single_anthropic_key_bootstraps_one_provider() {
        let vars = [("ANTHROPIC_API_KEY", "sk-ant-test")];
        let lookup = lookup_from(&vars);

        assert_eq!(
            detect_configured_providers_from(&lookup),
            vec!["anthropic".to_string()]
        );

        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup).await;
        assert_eq!(result.bootstrapped, vec!["anthropic".to_string()]);
        assert!(result.failed.is_empty());
        assert!(result.warnings.is_empty());
        assert_eq!(result.default_provider, None);
        assert!(registry.has("anthropic"));
    }

    #[tokio::test]
    async fn providers_filter_limits_registration() {
        let vars = [
            ("ANTHROPIC_API_KEY", "sk-ant-test"),
            ("OPENAI_API_KEY", "sk-openai-test"),
            ("OLLAMA_ENDPOINT", "http://localhost:11434"),
            ("LLM_PROVIDERS", "openai,ollama"),
        ];
        let lookup = lookup_from(&vars);

        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup).await;
        let mut bootstrapped = result.bootstrapped.clone();
        bootstrapped.sort();
        assert_eq!(bootstrapped, vec!["ollama".to_string(), "openai".to_string()]);
        assert!(!registry.has("anthropic"));
    }

    #[tokio::test]
    async fn unconfigured_filtered_provider_warns() {
        let vars = [
            ("OPENAI_API_KEY", "sk-openai-test"),
            ("LLM_PROVIDERS", "openai,gemini"),
        ];
        let lookup = lookup_from(&vars);
        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup).await;
        assert_eq!(result.bootstrapped, vec!["openai".to_string()]);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("gemini"));
    }

    #[tokio::test]
    async fn default_provider_resolves_only_when_registered() {
        let vars = [
            ("OPENAI_API_KEY", "sk-openai-test"),
            ("LLM_DEFAULT_PROVIDER", "openai"),
        ];
        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup_from(&vars)).await;
        assert_eq!(result.default_provider, Some("openai".to_string()));

        let vars = [
            ("OPENAI_API_KEY", "sk-openai-test"),
            ("LLM_DEFAULT_PROVIDER", "anthropic"),
        ];
        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup_from(&vars)).await;
        assert_eq!(result.default_provider, None);
        assert!(result.warnings.iter().any(|w| w.contains("anthropic")));
    }

    #[tokio::test]
    async fn azure_requires_all_three_vars() {
        let partial = [
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "azure-key"),
        ];
        assert!(detect_configured_providers_from(&lookup_from(&partial)).is_empty());

        let full = [
            ("AZURE_OPENAI_ENDPOINT", "https://example.openai.azure.com"),
            ("AZURE_OPENAI_API_KEY", "azure-key"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "gpt-4o-deploy"),
        ];
        let registry = empty_registry();
        let result = bootstrap_from(&registry, &skip_health(), &lookup_from(&full)).await;
        assert_eq!(result.bootstrapped, vec!["azure-openai".to_string()]);
        let config = registry.get_config("azure-openai").unwrap();
        assert_eq!(config.model.as_deref(), Some("gpt-4o-deploy"));
    }

    #[test]
    fn weights_parse_and_normalize() {
        let weights = parse_provider_weights("a:2,b:3").unwrap();
        assert!((weights["a"] - 0.4).abs() < 1e-9);
        assert!((weights["b"] - 0.6).abs() < 1e-9);

        let spaced = parse_provider_weights(" a : 2 , b : 3 ").unwrap();
        assert_eq!(weights, spaced);
    }

    #[test]
    fn malformed_weights_fail_clearly() {
        for raw in ["a", "a:x", "a:-1", "", ":1"] {
            let err = parse_provider_weights(raw).unwrap_err();
            assert_eq!(err.kind(), "validation", "input {raw:?}");
        }
    }

    #[tokio::test]
    async fn router_env_configuration() {
        let registry = empty_registry();
        let router = Router::new(Arc::clone(&registry));
        let vars = [
            ("LLM_ROUTING_STRATEGY", "round-robin"),
            ("PROVIDER_WEIGHTS", "a:1,b:1"),
        ];
        configure_router_from(&router, Some("a".to_string()), &lookup_from(&vars)).unwrap();
        assert_eq!(router.strategy(), RoutingStrategy::RoundRobin);
        assert_eq!(router.default_provider(), Some("a".to_string()));
        assert!((router.default_weights()["a"] - 0.5).abs() < 1e-9);

        let bad = [("LLM_ROUTING_STRATEGY", "coin-flip")];
        let err = configure_router_from(&router, None, &lookup_from(&bad)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
