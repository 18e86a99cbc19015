//! Handlers for the `/llm-providers` management API: CRUD over provider
//! configs, health and status views, and routing control. Every response
//! that echoes a config goes through the masked summary view.

use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use modelmux_core::strategy::RoutingStrategy;
use modelmux_core::{GatewayError, ProviderConfig, ProviderConfigPatch, ProviderType};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Path segments under `/llm-providers/` that are API surface, never
/// provider names.
const RESERVED_NAMES: [&str; 5] = ["routing", "status", "health", "export", "import"];

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;
const HEALTH_ALL_DEADLINE: Duration = Duration::from_secs(10);

fn reject_reserved(name: &str) -> Result<(), ApiError> {
    if RESERVED_NAMES.contains(&name) {
        return Err(ApiError(GatewayError::validation(format!(
            "{name:?} is a reserved name"
        ))));
    }
    Ok(())
}

/// `GET /llm-providers` with `type`, `enabled`, `page`, `page_size`
/// filters. Out-of-range paging falls back to the defaults rather than
/// erroring.
pub async fn list_providers(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let type_filter = params
        .get("type")
        .map(|raw| raw.parse::<ProviderType>())
        .transpose()?;
    let enabled_filter = params
        .get("enabled")
        .map(|raw| raw.parse::<bool>())
        .transpose()
        .map_err(|_| GatewayError::validation("enabled must be true or false"))?;

    let page = params
        .get("page")
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1);
    let page_size = params
        .get("page_size")
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
        .unwrap_or(DEFAULT_PAGE_SIZE);

    let providers: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .filter(|config| type_filter.map_or(true, |ty| config.provider_type == ty))
        .filter(|config| enabled_filter.map_or(true, |enabled| config.enabled == enabled))
        .collect();

    let total = providers.len();
    let page_items: Vec<_> = providers
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .map(|config| config.summary())
        .collect();

    Ok(Json(json!({
        "providers": page_items,
        "total": total,
        "page": page,
        "page_size": page_size,
    })))
}

/// `POST /llm-providers`: 201 on success, 400 on validation, 409 on
/// duplicate.
pub async fn create_provider(
    State(state): State<AppState>,
    Json(config): Json<ProviderConfig>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    reject_reserved(&config.name)?;
    let summary = config.summary();
    state.registry.register(config)?;
    Ok((StatusCode::CREATED, Json(json!({ "provider": summary }))))
}

pub async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let config = state.registry.get_config(&name)?;
    Ok(Json(json!({ "provider": config.summary() })))
}

pub async fn update_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<ProviderConfigPatch>,
) -> Result<Json<Value>, ApiError> {
    let updated = state.registry.update(&name, &patch)?;
    Ok(Json(json!({ "provider": updated.summary() })))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.unregister(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /llm-providers/{name}/health`: probe one provider now.
pub async fn provider_health(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deadline = state.registry.get_config(&name)?.timeout();
    let record = state.registry.health_check_single(&name, deadline).await?;
    Ok(Json(json!({ "name": name, "health": record })))
}

/// `GET /llm-providers/health`: probe every enabled provider.
pub async fn health_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.registry.health_check_all(HEALTH_ALL_DEADLINE).await;
    Ok(Json(json!({ "providers": records })))
}

/// `GET /llm-providers/status`: config summary + health + metrics +
/// effective routing weight per provider.
pub async fn provider_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({ "providers": state.router.provider_status() })))
}

#[derive(Debug, Deserialize)]
pub struct RoutingUpdate {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub weights: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub default_provider: Option<String>,
}

pub async fn get_routing(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(json!({
        "strategy": state.router.strategy().as_str(),
        "weights": state.router.default_weights(),
        "default_provider": state.router.default_provider(),
    })))
}

/// `PUT /llm-providers/routing`: update strategy, weights, or the default
/// provider. Weights must be non-negative; the default provider must be
/// registered.
pub async fn put_routing(
    State(state): State<AppState>,
    Json(update): Json<RoutingUpdate>,
) -> Result<Json<Value>, ApiError> {
    if let Some(raw) = &update.strategy {
        state.router.set_strategy(raw.parse::<RoutingStrategy>()?);
    }
    if let Some(weights) = update.weights {
        if let Some((name, weight)) = weights.iter().find(|(_, weight)| **weight < 0.0) {
            return Err(ApiError(GatewayError::validation(format!(
                "weight for {name} must be non-negative, got {weight}"
            ))));
        }
        state.router.set_default_weights(weights);
    }
    if let Some(default) = update.default_provider {
        if !state.registry.has(&default) {
            return Err(ApiError(GatewayError::NotFound { name: default }));
        }
        state.router.set_default_provider(Some(default));
    }
    get_routing(State(state)).await
}

/// `GET /llm-providers/export`: every config, keys masked. The export is a
/// snapshot for inspection and re-import, not a secrets backup.
pub async fn export_providers(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let providers: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .map(|config| config.summary())
        .collect();
    Ok(Json(json!({ "providers": providers })))
}

/// `POST /llm-providers/import`: bulk register; each config succeeds or
/// fails independently.
pub async fn import_providers(
    State(state): State<AppState>,
    Json(configs): Json<Vec<ProviderConfig>>,
) -> Result<Json<Value>, ApiError> {
    let mut registered = Vec::new();
    let mut failed = HashMap::new();
    for config in configs {
        let name = config.name.clone();
        let outcome = reject_reserved(&name)
            .map_err(|e| e.0)
            .and_then(|()| state.registry.register(config));
        match outcome {
            Ok(()) => registered.push(name),
            Err(e) => {
                failed.insert(name, e.to_string());
            }
        }
    }
    Ok(Json(json!({ "registered": registered, "failed": failed })))
}

/// `GET /llm-provider-types`: the closed enumeration.
pub async fn provider_types() -> Json<Value> {
    let types: Vec<_> = ProviderType::ALL.iter().map(ProviderType::as_str).collect();
    Json(json!({ "types": types }))
}
