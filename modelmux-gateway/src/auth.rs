//! Tenant scoping for the management surface. Every endpoint requires a
//! tenant identifier; policy enforcement beyond presence is the embedding
//! application's concern.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// The tenant a request is acting for, available to handlers as an
/// extension after [`require_tenant`] runs.
#[derive(Debug, Clone)]
pub struct TenantId(pub String);

/// Rejects requests without an `X-Tenant-ID` header.
pub async fn require_tenant(mut request: Request, next: Next) -> Response {
    let tenant = request
        .headers()
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from);

    match tenant {
        Some(tenant) => {
            request.extensions_mut().insert(TenantId(tenant));
            next.run(request).await
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {
                    "kind": "auth",
                    "message": "missing tenant identifier",
                }
            })),
        )
            .into_response(),
    }
}
