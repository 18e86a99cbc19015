//! Maps the core error taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelmux_core::GatewayError;
use serde_json::json;

/// Error type returned by every management handler.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub GatewayError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            "validation" => StatusCode::BAD_REQUEST,
            "not-found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "auth" => StatusCode::UNAUTHORIZED,
            "rate-limit" => StatusCode::TOO_MANY_REQUESTS,
            "server" | "protocol" | "all-providers-failed" => StatusCode::BAD_GATEWAY,
            "unavailable" | "no-providers" => StatusCode::SERVICE_UNAVAILABLE,
            // factory/*
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_expected_codes() {
        let cases = [
            (GatewayError::validation("x"), StatusCode::BAD_REQUEST),
            (
                GatewayError::NotFound { name: "p".into() },
                StatusCode::NOT_FOUND,
            ),
            (
                GatewayError::Conflict { name: "p".into() },
                StatusCode::CONFLICT,
            ),
            (
                GatewayError::Auth {
                    message: "nope".into(),
                },
                StatusCode::UNAUTHORIZED,
            ),
            (
                GatewayError::RateLimit {
                    message: "slow".into(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                GatewayError::Server {
                    code: 500,
                    message: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                GatewayError::unavailable("down"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (GatewayError::protocol("bad json"), StatusCode::BAD_GATEWAY),
            (
                GatewayError::FactoryUnknownType {
                    provider_type: "bedrock".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (GatewayError::NoProviders, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (error, expected) in cases {
            assert_eq!(ApiError(error).status(), expected);
        }
    }
}
