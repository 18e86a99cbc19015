//! End-to-end tests for the management surface: tenant gating, CRUD and
//! masking, pagination, route precedence for the literal endpoints, and
//! routing control.

use axum_test::TestServer;
use modelmux_core::registry::ProviderRegistry;
use modelmux_core::router::Router;
use modelmux_gateway::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;

const TENANT: (&str, &str) = ("X-Tenant-ID", "tenant-1");

fn test_server() -> TestServer {
    let registry = Arc::new(ProviderRegistry::default());
    let router = Arc::new(Router::new(Arc::clone(&registry)));
    TestServer::new(create_router(AppState::new(registry, router))).unwrap()
}

fn openai_body(name: &str) -> Value {
    json!({
        "name": name,
        "type": "openai",
        "api_key": "sk-proj-supersecret",
        "weight": 50
    })
}

#[tokio::test]
async fn missing_tenant_header_is_unauthorized() {
    let server = test_server();
    let response = server.get("/llm-providers").await;
    assert_eq!(response.status_code(), 401);
    let body: Value = response.json();
    assert_eq!(body["error"]["kind"], "auth");
}

#[tokio::test]
async fn create_read_update_delete_flow() {
    let server = test_server();

    let created = server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&openai_body("primary"))
        .await;
    assert_eq!(created.status_code(), 201);
    let body: Value = created.json();
    // Echoed configs always mask the key.
    assert_eq!(body["provider"]["api_key"], "sk-p...cret");

    let duplicate = server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&openai_body("primary"))
        .await;
    assert_eq!(duplicate.status_code(), 409);

    let fetched = server
        .get("/llm-providers/primary")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(fetched.status_code(), 200);
    let body: Value = fetched.json();
    assert_eq!(body["provider"]["name"], "primary");
    assert_eq!(body["provider"]["weight"], 50);

    let updated = server
        .put("/llm-providers/primary")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({"weight": 80, "enabled": false}))
        .await;
    assert_eq!(updated.status_code(), 200);
    let body: Value = updated.json();
    assert_eq!(body["provider"]["weight"], 80);
    assert_eq!(body["provider"]["enabled"], false);

    let deleted = server
        .delete("/llm-providers/primary")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(deleted.status_code(), 204);

    let gone = server
        .get("/llm-providers/primary")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(gone.status_code(), 404);
}

#[tokio::test]
async fn invalid_config_is_a_400() {
    let server = test_server();
    // openai without an api_key fails validation.
    let response = server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({"name": "p", "type": "openai"}))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["error"]["kind"], "validation");
}

#[tokio::test]
async fn reserved_names_cannot_be_registered() {
    let server = test_server();
    for name in ["routing", "status", "health", "export", "import"] {
        let response = server
            .post("/llm-providers")
            .add_header(TENANT.0, TENANT.1)
            .json(&openai_body(name))
            .await;
        assert_eq!(response.status_code(), 400, "name {name}");
    }
}

#[tokio::test]
async fn literal_routes_win_over_the_name_wildcard() {
    let server = test_server();

    let routing = server
        .get("/llm-providers/routing")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(routing.status_code(), 200);
    let body: Value = routing.json();
    assert!(body.get("weights").is_some());
    assert_eq!(body["strategy"], "weighted");

    let status = server
        .get("/llm-providers/status")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(status.status_code(), 200);
    let body: Value = status.json();
    assert!(body.get("providers").is_some());

    let export = server
        .get("/llm-providers/export")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(export.status_code(), 200);
}

#[tokio::test]
async fn list_supports_filters_and_pagination() {
    let server = test_server();
    for i in 0..25 {
        let created = server
            .post("/llm-providers")
            .add_header(TENANT.0, TENANT.1)
            .json(&openai_body(&format!("provider-{i:02}")))
            .await;
        assert_eq!(created.status_code(), 201);
    }
    let created = server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({
            "name": "local",
            "type": "ollama",
            "endpoint": "http://localhost:11434"
        }))
        .await;
    assert_eq!(created.status_code(), 201);

    // Default page size is 20.
    let page1 = server
        .get("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .await;
    let body: Value = page1.json();
    assert_eq!(body["total"], 26);
    assert_eq!(body["providers"].as_array().unwrap().len(), 20);

    let page2 = server
        .get("/llm-providers?page=2")
        .add_header(TENANT.0, TENANT.1)
        .await;
    let body: Value = page2.json();
    assert_eq!(body["providers"].as_array().unwrap().len(), 6);

    // Out-of-range sizes fall back to the default.
    let huge = server
        .get("/llm-providers?page_size=5000")
        .add_header(TENANT.0, TENANT.1)
        .await;
    let body: Value = huge.json();
    assert_eq!(body["page_size"], 20);

    let by_type = server
        .get("/llm-providers?type=ollama")
        .add_header(TENANT.0, TENANT.1)
        .await;
    let body: Value = by_type.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["providers"][0]["name"], "local");
}

#[tokio::test]
async fn routing_updates_apply_and_validate() {
    let server = test_server();
    server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&openai_body("primary"))
        .await;

    let ok = server
        .put("/llm-providers/routing")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({
            "strategy": "round-robin",
            "weights": {"primary": 1.0},
            "default_provider": "primary"
        }))
        .await;
    assert_eq!(ok.status_code(), 200);
    let body: Value = ok.json();
    assert_eq!(body["strategy"], "round-robin");
    assert_eq!(body["default_provider"], "primary");

    let bad_strategy = server
        .put("/llm-providers/routing")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({"strategy": "coin-flip"}))
        .await;
    assert_eq!(bad_strategy.status_code(), 400);

    let negative_weight = server
        .put("/llm-providers/routing")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({"weights": {"primary": -0.5}}))
        .await;
    assert_eq!(negative_weight.status_code(), 400);

    let unknown_default = server
        .put("/llm-providers/routing")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!({"default_provider": "ghost"}))
        .await;
    assert_eq!(unknown_default.status_code(), 404);
}

#[tokio::test]
async fn provider_types_is_the_closed_enumeration() {
    let server = test_server();
    let response = server
        .get("/llm-provider-types")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let types: Vec<String> = body["types"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        types,
        vec![
            "anthropic",
            "openai",
            "ollama",
            "gemini",
            "azure-openai",
            "bedrock",
            "custom"
        ]
    );
}

#[tokio::test]
async fn import_registers_each_config_independently() {
    let server = test_server();
    server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&openai_body("existing"))
        .await;

    let response = server
        .post("/llm-providers/import")
        .add_header(TENANT.0, TENANT.1)
        .json(&json!([
            {"name": "existing", "type": "openai", "api_key": "sk-x"},
            {"name": "fresh", "type": "openai", "api_key": "sk-y"},
            {"name": "broken", "type": "openai"}
        ]))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["registered"], json!(["fresh"]));
    assert!(body["failed"].get("existing").is_some());
    assert!(body["failed"].get("broken").is_some());

    let export = server
        .get("/llm-providers/export")
        .add_header(TENANT.0, TENANT.1)
        .await;
    let body: Value = export.json();
    assert_eq!(body["providers"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn status_reflects_registered_providers() {
    let server = test_server();
    server
        .post("/llm-providers")
        .add_header(TENANT.0, TENANT.1)
        .json(&openai_body("primary"))
        .await;

    let response = server
        .get("/llm-providers/status")
        .add_header(TENANT.0, TENANT.1)
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let primary = &body["providers"]["primary"];
    assert_eq!(primary["config"]["api_key"], "sk-p...cret");
    assert_eq!(primary["health"]["status"], "unknown");
    assert_eq!(primary["metrics"]["request_count"], 0);
}
