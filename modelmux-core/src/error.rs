//! # Error Handling
//!
//! A single error type covers the whole gateway, with one variant per kind
//! in the error taxonomy. Every error carries a stable `kind()` tag that the
//! management surface maps onto HTTP status codes, and `is_retryable()`
//! tells the router which failures are worth one failover attempt.
//!
//! ## Taxonomy
//!
//! - `validation` — malformed config or request; caller must fix.
//! - `not-found` — named provider is absent.
//! - `conflict` — duplicate registration.
//! - `auth` — backend rejected credentials.
//! - `rate-limit` — backend asked us to retry later.
//! - `server` — backend 5xx; transient.
//! - `unavailable` — transport error, timeout, or cancellation.
//! - `protocol` — response body could not be parsed.
//! - `factory/invalid-config`, `factory/unknown-type`, `factory/runtime`.
//! - `no-providers`, `all-providers-failed`.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway-wide error type.
///
/// Variants correspond one-to-one with the error taxonomy; the free-text
/// message carries backend detail without affecting the kind.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed configuration or request
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Named provider is not registered
    #[error("provider not found: {name}")]
    NotFound { name: String },

    /// Duplicate registration under an existing name
    #[error("provider already registered: {name}")]
    Conflict { name: String },

    /// Backend rejected our credentials
    #[error("authentication rejected: {message}")]
    Auth { message: String },

    /// Backend asked us to retry later
    #[error("rate limited: {message}")]
    RateLimit { message: String },

    /// Backend 5xx
    #[error("backend error {code}: {message}")]
    Server { code: u16, message: String },

    /// Transport failure, timeout, or cancellation
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    /// Response body could not be parsed
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Factory rejected the provider configuration
    #[error("invalid provider config: {message}")]
    FactoryInvalidConfig { message: String },

    /// No factory is registered for the requested provider type
    #[error("no factory for provider type: {provider_type}")]
    FactoryUnknownType { provider_type: String },

    /// Factory failed while constructing the provider
    #[error("factory failure: {message}")]
    FactoryRuntime { message: String },

    /// No enabled provider is available for routing
    #[error("no providers available")]
    NoProviders,

    /// Every candidate (including the failover) failed
    #[error("all providers failed: {source}")]
    AllProvidersFailed {
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Stable taxonomy tag, independent of the display message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not-found",
            Self::Conflict { .. } => "conflict",
            Self::Auth { .. } => "auth",
            Self::RateLimit { .. } => "rate-limit",
            Self::Server { .. } => "server",
            Self::Unavailable { .. } => "unavailable",
            Self::Protocol { .. } => "protocol",
            Self::FactoryInvalidConfig { .. } => "factory/invalid-config",
            Self::FactoryUnknownType { .. } => "factory/unknown-type",
            Self::FactoryRuntime { .. } => "factory/runtime",
            Self::NoProviders => "no-providers",
            Self::AllProvidersFailed { .. } => "all-providers-failed",
        }
    }

    /// Whether the router may try one fallback provider for this error.
    ///
    /// Auth, validation, and protocol errors surface without retry; a
    /// different backend would fail the same way or hide a real problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit { .. } | Self::Server { .. } | Self::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable {
                message: format!("request timed out: {err}"),
            }
        } else if err.is_decode() {
            Self::Protocol {
                message: format!("failed to decode response: {err}"),
            }
        } else {
            Self::Unavailable {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol {
            message: err.to_string(),
        }
    }
}
