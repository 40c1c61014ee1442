//! REST API 集成测试

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use rel_shared::config::EngineConfig;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;
use validation_engine::{
    ArtifactRegistry, FieldKind, InMemoryLabelStore, InMemoryRuleRepository,
    InMemorySchemaCatalog, InterpretingCompiler, RuleInvoker, RuleLifecycleService, SchemaType,
    UninitializedFieldsMode,
    api::{self, AppState},
};

fn test_app() -> (Router, Uuid) {
    let catalog = Arc::new(InMemorySchemaCatalog::new());
    let invoice = catalog.register(
        SchemaType::new("a01", "Invoice")
            .with_field("amount", FieldKind::Number)
            .with_field("status", FieldKind::Text),
    );

    let registry = ArtifactRegistry::new();
    let config = EngineConfig::default();
    let service = Arc::new(RuleLifecycleService::new(
        catalog.clone(),
        Arc::new(InMemoryRuleRepository::new()),
        Arc::new(InMemoryLabelStore::with_labels(["STATUS_REQUIRED"])),
        Arc::new(InterpretingCompiler::new()),
        registry.clone(),
        &config,
    ));
    let state = AppState::new(
        service,
        RuleInvoker::new(registry, UninitializedFieldsMode::Ignore),
        catalog,
        config.record_variable,
    );

    (api::app(state), invoice.id)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "disabled");
    assert_eq!(body["executors"], 0);
}

#[tokio::test]
async fn test_save_then_validate_record() {
    let (app, type_id) = test_app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "typeId": type_id,
            "name": "Amount_Positive",
            "code": "amount > 0",
            "errorMessage": "金额必须大于 0"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["referencedFields"], json!(["amount"]));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/records/a01/validate",
        Some(json!({"amount": -3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["valid"], false);
    assert_eq!(body["data"]["errors"][0]["message"], "金额必须大于 0");

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/records/a01/validate?mode=FAIL",
        Some(json!({"status": "open"})),
    )
    .await;
    assert_eq!(body["data"]["errors"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unsupported_mode_is_bad_request() {
    let (app, type_id) = test_app();
    send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "typeId": type_id,
            "name": "Status_Set",
            "code": "status <> null",
            "errorMessageLabel": "STATUS_REQUIRED"
        })),
    )
    .await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/records/a01/validate?mode=LENIENT",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_syntax_error_is_bad_request() {
    let (app, type_id) = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "typeId": type_id,
            "name": "Broken",
            "code": "amount > 0 and status == 'x' or amount < 2",
            "errorMessage": "x"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "SYNTAX_ERROR");
}

#[tokio::test]
async fn test_request_validation() {
    let (app, type_id) = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "typeId": type_id,
            "name": "",
            "code": "amount > 0",
            "errorMessage": "x"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_rule_crud() {
    let (app, type_id) = test_app();
    let (_, body) = send(
        &app,
        Method::POST,
        "/api/rules",
        Some(json!({
            "typeId": type_id,
            "name": "Amount_Positive",
            "code": "amount > 0",
            "errorMessage": "x"
        })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::GET, &format!("/api/rules?type_id={}", type_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/api/rules/{}/active", id),
        Some(json!({"active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], false);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/rules/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::GET, &format!("/api/rules/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "RULE_NOT_FOUND");
}

#[tokio::test]
async fn test_missing_executor_is_configuration_error() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::POST, "/api/records/zzz/validate", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CONFIGURATION_ERROR");
}

#[tokio::test]
async fn test_initialize_installs_empty_executor() {
    let (app, _) = test_app();
    let (status, body) = send(&app, Method::POST, "/api/rules/initialize", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["compiled"], json!(["a01RuleExecutor"]));

    let (_, body) = send(&app, Method::POST, "/api/records/a01/validate", Some(json!({}))).await;
    assert_eq!(body["data"]["valid"], true);
}

#[tokio::test]
async fn test_translate_preview() {
    let (app, type_id) = test_app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/translate",
        Some(json!({"code": "(amount >= 2) and (status == 'x')", "typeId": type_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["code"],
        r#"(rel::ge(record.get("amount"), 2)) && (rel::eq(record.get("status"), "x"))"#
    );

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/translate",
        Some(json!({
            "code": "page.title <> null",
            "strategy": "keyed_store",
            "checkFields": false
        })),
    )
    .await;
    assert_eq!(body["data"]["code"], r#"!rel::eq(lookup("page").get("title"), null)"#);
    assert_eq!(body["data"]["referencedFields"], json!(["page"]));

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/translate",
        Some(json!({"code": "status == \"a b\"", "typeId": type_id, "quote": "\""})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["code"], r#"rel::eq(record.get("status"), "a b")"#);
}
