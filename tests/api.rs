//! HTTP surface tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use common::setup_test_db;
use concourse::api::{self, ApiState};
use concourse::config::{
    ChannelsConfig, Config, HandoverConfig, LlmConfig, SchedulingConfig, UploadConfig,
};

fn test_config() -> Config {
    Config {
        data_dir: std::path::PathBuf::from("/tmp/concourse-test"),
        port: 0,
        secret: "test-secret".to_string(),
        token_ttl: Duration::from_secs(3600),
        llm: LlmConfig {
            base_url: "http://localhost:1".to_string(),
            api_key: None,
            model: "test".to_string(),
            nlu_model: "test".to_string(),
            use_model_nlu: false,
            deadline: Duration::from_secs(1),
            max_tokens: 100,
        },
        uploads: UploadConfig {
            bucket: "chat-uploads".to_string(),
            public_base_url: "http://localhost:9000".to_string(),
            max_size_bytes: 15 * 1024 * 1024,
            put_expiry: Duration::from_secs(300),
            get_expiry: Duration::from_secs(3600),
        },
        scheduling: SchedulingConfig {
            calendar_base_url: "http://localhost:1".to_string(),
            calendar_token: None,
            working_hours_start: 9,
            working_hours_end: 18,
            slot_minutes: 60,
            days_ahead: 5,
            auto_commit: true,
            deadline: Duration::from_secs(1),
        },
        handover: HandoverConfig {
            low_confidence_threshold: 0.5,
            office_hours_start: None,
            office_hours_end: None,
        },
        channels: ChannelsConfig::default(),
    }
}

fn build_app() -> (axum::Router, Arc<ApiState>) {
    let state = ApiState::build_with_pool(test_config(), setup_test_db()).unwrap();
    (api::router(state.clone()), state)
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register(app: &axum::Router, name: &str, email: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": name, "email": email, "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoint() {
    let (app, _state) = build_app();
    let (status, body) = send(&app, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_login_roundtrip() {
    let (app, _state) = build_app();

    let token = register(&app, "Alice", "alice@x.com").await;
    assert!(!token.is_empty());

    // Duplicate email conflicts
    let (status, _) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "name": "Alice2", "email": "ALICE@x.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@x.com", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Alice");

    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@x.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn nlu_analyze_requires_auth_and_classifies() {
    let (app, _state) = build_app();

    let (status, _) = send(
        &app,
        "POST",
        "/nlu/analyze",
        None,
        Some(json!({ "text": "oi" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = register(&app, "Alice", "alice@x.com").await;
    let (status, body) = send(
        &app,
        "POST",
        "/nlu/analyze",
        Some(&token),
        Some(json!({ "text": "preciso agendar uma reunião, meu email é x@y.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "scheduling");
    assert_eq!(body["method"], "rule");
    assert_eq!(body["entities"]["email"]["normalized"], "x@y.com");
}

#[tokio::test]
async fn nlu_intents_listing() {
    let (app, _state) = build_app();
    let (status, body) = send(&app, "GET", "/nlu/intents?speaker=customer", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["intents"]
        .as_array()
        .unwrap()
        .iter()
        .map(|intent| intent["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"scheduling"));
    assert!(names.contains(&"complaint"));
}

#[tokio::test]
async fn upload_grant_boundaries_and_confirm_conflict() {
    let (app, _state) = build_app();
    let token = register(&app, "Alice", "alice@x.com").await;

    let max = 15 * 1024 * 1024u64;

    // Exactly the maximum is accepted
    let (status, body) = send(
        &app,
        "POST",
        "/uploads/grant",
        Some(&token),
        Some(json!({ "filename": "x.png", "mimetype": "image/png", "size": max })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let key = body["key"].as_str().unwrap().to_string();
    assert!(key.starts_with("messages/"));
    assert!(body["putUrl"].as_str().unwrap().contains(&key));

    // One byte larger is rejected at grant
    let (status, _) = send(
        &app,
        "POST",
        "/uploads/grant",
        Some(&token),
        Some(json!({ "filename": "x.png", "mimetype": "image/png", "size": max + 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Confirm materializes exactly one image message
    let confirm = json!({
        "key": key,
        "filename": "x.png",
        "mimetype": "image/png",
        "contactId": "contact-1",
    });
    let (status, body) = send(
        &app,
        "POST",
        "/uploads/confirm",
        Some(&token),
        Some(confirm.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["type"], "image");
    assert!(body["url"].as_str().is_some());

    // A second confirm for the same key conflicts
    let (status, _) = send(&app, "POST", "/uploads/confirm", Some(&token), Some(confirm)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn handover_lifecycle_over_http() {
    let (app, _state) = build_app();
    let op_a = register(&app, "Op A", "a@x.com").await;
    let op_b = register(&app, "Op B", "b@x.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/handovers/",
        Some(&op_a),
        Some(json!({
            "conversationId": "whatsapp:5511",
            "reason": "complaint",
            "customerName": "João",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["priority"], 4);
    let id = body["id"].as_str().unwrap().to_string();

    // Filtered listing sees it as pending
    let (status, body) = send(
        &app,
        "GET",
        "/handovers/?status=pending",
        Some(&op_a),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Exactly one accept wins
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/handovers/{id}/accept"),
        Some(&op_a),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/handovers/{id}/accept"),
        Some(&op_b),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/handovers/{id}/in-progress"),
        Some(&op_a),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/handovers/{id}/resolve"),
        Some(&op_a),
        Some(json!({ "resolution_notes": "refund issued" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "resolved");

    let (status, body) = send(&app, "GET", "/handovers/stats/summary", Some(&op_a), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["by_status"]["resolved"], 1);
}

#[tokio::test]
async fn custom_bot_crud() {
    let (app, _state) = build_app();
    let token = register(&app, "Alice", "alice@x.com").await;

    let (status, body) = send(
        &app,
        "POST",
        "/custom-bots",
        Some(&token),
        Some(json!({
            "name": "Meu Bot",
            "emoji": "🤖",
            "system_prompt": "Você é um bot de testes.",
            "api_key": "sk-custom",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["key"], "meubot");

    let (status, body) = send(&app, "GET", "/custom-bots", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, "DELETE", "/custom-bots/meubot", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "DELETE", "/custom-bots/meubot", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn contacts_list_and_history() {
    let (app, state) = build_app();
    let alice_token = register(&app, "Alice", "alice@x.com").await;

    let alice = state.users.find_by_email("alice@x.com").unwrap().unwrap();
    let bob = state.users.create("Bob", "bob@x.com", "h").unwrap();

    let conv = concourse::db::conversation_key(&alice.id, &bob.id);
    state
        .messages
        .append(concourse::db::NewMessage::text(&conv, &bob.id, "oi Alice"))
        .unwrap();
    state
        .messages
        .append(concourse::db::NewMessage::text(&conv, &bob.id, "tudo bem?"))
        .unwrap();

    let (status, body) = send(&app, "GET", "/contacts/", Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let contacts = body.as_array().unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0]["name"], "Bob");
    assert_eq!(contacts[0]["unread"], 2);
    assert_eq!(contacts[0]["lastMessage"]["text"], "tudo bem?");

    let (status, body) = send(
        &app,
        "GET",
        &format!("/contacts/{}/messages?limit=1", bob.id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = body.as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["text"], "tudo bem?");

    // Paging restarts from the oldest id of the previous page
    let before = page[0]["id"].as_str().unwrap();
    let (status, body) = send(
        &app,
        "GET",
        &format!("/contacts/{}/messages?limit=10&before={before}", bob.id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap()[0]["text"], "oi Alice");

    // Mark read, then the unread count drops
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/contacts/{}/read", bob.id),
        Some(&alice_token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, "GET", "/contacts/", Some(&alice_token), None).await;
    assert_eq!(body.as_array().unwrap()[0]["unread"], 0);
}

#[tokio::test]
async fn global_feed_requires_auth() {
    let (app, _state) = build_app();
    let (status, _) = send(&app, "GET", "/messages", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = register(&app, "Alice", "alice@x.com").await;
    let (status, body) = send(&app, "GET", "/messages?limit=10", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn whatsapp_webhook_ingests_and_dedupes() {
    let (app, state) = build_app();

    let payload = json!({
        "entry": [{
            "changes": [{
                "value": {
                    "contacts": [{"profile": {"name": "João"}}],
                    "messages": [{
                        "from": "5511999990000",
                        "id": "wamid.test.1",
                        "timestamp": "1700000000",
                        "type": "text",
                        "text": {"body": "olá"}
                    }]
                }
            }]
        }]
    });

    let (status, body) = send(
        &app,
        "POST",
        "/omni/webhooks/whatsapp",
        None,
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 1);

    // Redelivery of the same provider id is dropped
    let (status, body) = send(&app, "POST", "/omni/webhooks/whatsapp", None, Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], 0);

    // The contact was materialized exactly once
    let contact = state
        .users
        .find_or_create_external("whatsapp", "5511999990000", "João")
        .unwrap();
    assert_eq!(contact.name, "João");
}
