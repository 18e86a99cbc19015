use crate::error::{GatewayError, Result};
use reqwest::{header::HeaderMap, Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// How a dialect authenticates its requests.
#[derive(Clone, Debug)]
pub enum AuthStrategy {
    Bearer { token: String },
    Header { name: String, value: String },
    /// API key carried as a URL query parameter (gemini).
    Query { name: String, value: String },
    None,
}

/// Shared HTTP plumbing for all dialect clients: configured timeout, base
/// URL, auth headers, and the status-to-taxonomy error mapping.
#[derive(Clone, Debug)]
pub struct HttpClient {
    http: Client,
    base_url: String,
    default_headers: HeaderMap,
    query_auth: Option<(String, String)>,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        base_url: Option<String>,
        default_base: &str,
        extra_headers: &HashMap<String, String>,
        auth: AuthStrategy,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::FactoryInvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let mut default_headers = HeaderMap::new();
        let mut query_auth = None;

        match auth {
            AuthStrategy::Bearer { token } => {
                let value = format!("Bearer {token}").parse().map_err(|_| {
                    GatewayError::FactoryInvalidConfig {
                        message: "api_key is not a valid header value".to_string(),
                    }
                })?;
                default_headers.insert("Authorization", value);
            }
            AuthStrategy::Header { name, value } => {
                let (name, value) = parse_header(&name, &value)?;
                default_headers.insert(name, value);
            }
            AuthStrategy::Query { name, value } => {
                query_auth = Some((name, value));
            }
            AuthStrategy::None => {}
        }

        for (k, v) in extra_headers {
            if let Ok((name, value)) = parse_header(k, v) {
                default_headers.insert(name, value);
            }
        }

        let base_url = base_url
            .unwrap_or_else(|| default_base.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            base_url,
            default_headers,
            query_auth,
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.build_url(path))
            .headers(self.default_headers.clone());
        if let Some((name, value)) = &self.query_auth {
            builder = builder.query(&[(name.as_str(), value.as_str())]);
        }
        builder
    }

    /// POST a JSON body, expecting a 2xx JSON response.
    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp> {
        let resp = self.request(Method::POST, path).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        resp.json::<TResp>()
            .await
            .map_err(|e| GatewayError::protocol(format!("failed to parse response body: {e}")))
    }

    /// POST a JSON body and hand back the raw response for streaming
    /// decoders. Status is checked here so decoders only ever see 2xx.
    pub async fn post_stream<TReq: Serialize>(&self, path: &str, body: &TReq) -> Result<Response> {
        let resp = self.request(Method::POST, path).json(body).send().await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp)
    }

    /// Probe GET; only the status matters to callers.
    pub async fn get(&self, path: &str) -> Result<Response> {
        let resp = self.request(Method::GET, path).send().await?;
        if !resp.status().is_success() {
            return Err(map_error_response(resp).await);
        }
        Ok(resp)
    }
}

fn parse_header(
    name: &str,
    value: &str,
) -> Result<(reqwest::header::HeaderName, reqwest::header::HeaderValue)> {
    let name = name
        .parse::<reqwest::header::HeaderName>()
        .map_err(|_| GatewayError::FactoryInvalidConfig {
            message: format!("invalid header name: {name}"),
        })?;
    let value = value
        .parse::<reqwest::header::HeaderValue>()
        .map_err(|_| GatewayError::FactoryInvalidConfig {
            message: format!("invalid value for header {name:?}"),
        })?;
    Ok((name, value))
}

/// Map a non-2xx response onto the error taxonomy.
///
/// 401/403 -> auth; 429 or a retry-after header -> rate-limit; 5xx ->
/// server; anything else keeps its code under `server`.
pub async fn map_error_response(resp: Response) -> GatewayError {
    let status = resp.status();
    let retry_after = resp.headers().contains_key("retry-after");
    let body = resp.text().await.unwrap_or_default();

    // Pull a message out of the common `{"error": {"message": ...}}` and
    // `{"error": "..."}` shapes before falling back to the raw body.
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?.clone();
            err.get("message")
                .and_then(|m| m.as_str().map(String::from))
                .or_else(|| err.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.clone());

    match status.as_u16() {
        401 | 403 => GatewayError::Auth { message },
        429 => GatewayError::RateLimit { message },
        _ if retry_after => GatewayError::RateLimit { message },
        code => GatewayError::Server { code, message },
    }
}
