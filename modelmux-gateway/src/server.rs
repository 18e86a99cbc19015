//! Router construction for the management surface.
//!
//! Literal routes (`routing`, `status`, `health`, `export`, `import`) are
//! registered beside the `{name}` wildcard; axum matches static segments
//! ahead of parameters, so they are never captured as provider names.

use crate::auth::require_tenant;
use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use modelmux_core::registry::ProviderRegistry;
use modelmux_core::router::Router as LlmRouter;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub router: Arc<LlmRouter>,
}

impl AppState {
    pub fn new(registry: Arc<ProviderRegistry>, router: Arc<LlmRouter>) -> Self {
        Self { registry, router }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/llm-providers",
            get(handlers::list_providers).post(handlers::create_provider),
        )
        .route(
            "/llm-providers/routing",
            get(handlers::get_routing).put(handlers::put_routing),
        )
        .route("/llm-providers/status", get(handlers::provider_status))
        .route("/llm-providers/health", get(handlers::health_all))
        .route("/llm-providers/export", get(handlers::export_providers))
        .route("/llm-providers/import", post(handlers::import_providers))
        .route(
            "/llm-providers/{name}",
            get(handlers::get_provider)
                .put(handlers::update_provider)
                .delete(handlers::delete_provider),
        )
        .route(
            "/llm-providers/{name}/health",
            get(handlers::provider_health),
        )
        .route("/llm-provider-types", get(handlers::provider_types))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn(require_tenant)),
        )
        .with_state(state)
}
