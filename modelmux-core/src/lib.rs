//! # Modelmux Core
//!
//! An in-process multi-provider LLM gateway: register heterogeneous
//! backends, track their health, and dispatch completion requests under a
//! configurable routing policy with automatic failover and metrics.
//!
//! The crate is organized around four pieces:
//!
//! - [`providers`] — the uniform [`Provider`](providers::Provider) contract
//!   and the per-dialect HTTP/SSE clients (openai, anthropic, ollama,
//!   gemini, azure-openai).
//! - [`registry`] — the process-local owner of provider configs, lazily
//!   built instances, and the probed health cache.
//! - [`router`] — strategy-driven selection with weights, bounded
//!   failover, and per-provider metrics.
//! - [`bootstrap`] — environment variables in, a populated and
//!   health-checked registry out.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use modelmux_core::bootstrap::{bootstrap_from_env, BootstrapOptions};
//! use modelmux_core::models::CompletionRequest;
//! use modelmux_core::registry::ProviderRegistry;
//! use modelmux_core::router::{RouteOptions, Router};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn run() -> modelmux_core::error::Result<()> {
//! let registry = Arc::new(ProviderRegistry::default());
//! let report = bootstrap_from_env(&registry, &BootstrapOptions::default()).await;
//! Arc::clone(&registry).start_periodic_health_check(Duration::from_secs(30));
//!
//! let router = Router::new(Arc::clone(&registry));
//! router.set_default_provider(report.default_provider);
//!
//! let request = CompletionRequest::from_prompt("Why is the sky blue?");
//! let (response, route) = router.route(&request, &RouteOptions::default()).await?;
//! println!("{} via {}", response.content, route.provider_name);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod error;
pub mod factory;
pub mod models;
pub mod pricing;
pub mod providers;
pub mod registry;
pub mod router;
pub mod strategy;

pub use error::{GatewayError, Result};
pub use models::{
    ChunkType, CompletionRequest, CompletionResponse, Message, RequestMetadata, Role, StreamChunk,
    Usage,
};
pub use providers::{
    mask_api_key, Capability, HealthRecord, HealthStatus, Provider, ProviderConfig,
    ProviderConfigPatch, ProviderType,
};
pub use registry::ProviderRegistry;
pub use router::{RouteInfo, RouteMetrics, RouteOptions, Router};
pub use strategy::RoutingStrategy;
