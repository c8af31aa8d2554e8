//! HTTP surface tests: a real server on an ephemeral port, a scripted
//! platform client behind it, and reqwest in front.

#![allow(clippy::unwrap_used)]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use {
    async_trait::async_trait,
    axum::{Json, Router, extract::State, routing::post},
    chrono::{TimeZone, Utc},
    reqwest::StatusCode,
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::mpsc},
};

use {
    relaygram_config::Settings,
    relaygram_gateway::{AppState, build_router},
    relaygram_platform::{
        Entity, EntityRef, MediaKind, MediaRef, PlatformClient, PlatformMessage,
        Result as PlatformResult,
    },
    relaygram_session::SessionManager,
    relaygram_webhook::WebhookDispatcher,
};

const API_KEY: &str = "test-key";

// ── Scripted platform client ─────────────────────────────────────────────────

struct FakeClient {
    /// Newest first.
    messages: Vec<PlatformMessage>,
}

#[async_trait]
impl PlatformClient for FakeClient {
    async fn connect(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn is_authorized(&self) -> PlatformResult<bool> {
        Ok(true)
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn resolve_entity(&self, entity: &EntityRef) -> PlatformResult<Entity> {
        Ok(Entity {
            id: match entity {
                EntityRef::Id(id) => *id,
                EntityRef::Name(_) => 777,
            },
            title: None,
            username: None,
        })
    }

    async fn history_page(
        &self,
        _entity: &Entity,
        offset_id: i64,
        limit: usize,
    ) -> PlatformResult<Vec<PlatformMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|m| offset_id == 0 || m.id < offset_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn message_by_id(
        &self,
        _entity: &Entity,
        message_id: i64,
    ) -> PlatformResult<Option<PlatformMessage>> {
        Ok(self.messages.iter().find(|m| m.id == message_id).cloned())
    }

    async fn download_media(
        &self,
        media: &MediaRef,
        target: &Path,
    ) -> PlatformResult<Option<PathBuf>> {
        let path = match (target.extension(), media.extension.as_deref()) {
            (None, Some(ext)) => target.with_extension(ext),
            _ => target.to_path_buf(),
        };
        tokio::fs::write(&path, b"image-bytes").await.unwrap();
        Ok(Some(path))
    }

    async fn subscribe(&self, _entity: &Entity) -> PlatformResult<mpsc::Receiver<PlatformMessage>> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn text_message(id: i64) -> PlatformMessage {
    PlatformMessage {
        id,
        sender: Some("alice".to_string()),
        text: Some(format!("message {id}")),
        timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        media: None,
    }
}

fn photo_message(id: i64) -> PlatformMessage {
    PlatformMessage {
        media: Some(MediaRef {
            kind: MediaKind::Photo,
            file_ref: format!("file-{id}"),
            extension: Some("jpg".to_string()),
        }),
        ..text_message(id)
    }
}

fn settings_with(tmp: &Path, extra: &[(&str, String)]) -> Arc<Settings> {
    let state_dir = tmp.join("state");
    std::fs::create_dir_all(&state_dir).unwrap();
    let mut vars: HashMap<String, String> = HashMap::from(
        [
            ("TELEGRAM_API_ID", "12345".to_string()),
            ("TELEGRAM_API_HASH", "hash".to_string()),
            ("TELEGRAM_PHONE", "+10000000000".to_string()),
            ("TELEGRAM_USERNAME", "relay".to_string()),
            ("API_KEY", API_KEY.to_string()),
            ("MEDIA_SIGNING_SECRET", "signing-secret".to_string()),
            ("TELEGRAM_SESSION_DIR", state_dir.display().to_string()),
            ("DATA_DIR", tmp.join("data").display().to_string()),
            (
                "TELEGRAM_MEDIA_DIR",
                tmp.join("media").display().to_string(),
            ),
        ]
        .map(|(k, v)| (k.to_string(), v)),
    );
    for (name, value) in extra {
        vars.insert((*name).to_string(), value.clone());
    }
    Arc::new(Settings::from_lookup(|name| vars.get(name).cloned()).unwrap())
}

struct TestApp {
    base: String,
    http: reqwest::Client,
    dispatcher: WebhookDispatcher,
}

impl TestApp {
    async fn spawn(settings: Arc<Settings>, messages: Vec<PlatformMessage>) -> Self {
        std::fs::create_dir_all(&settings.data_dir).unwrap();
        let dispatcher = WebhookDispatcher::new(settings.data_dir.clone());
        let session = SessionManager::start(
            Arc::clone(&settings),
            Arc::new(FakeClient { messages }),
            dispatcher.clone(),
        )
        .await
        .unwrap();

        let app = build_router(AppState { session, settings });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            dispatcher,
        }
    }

    async fn trigger(&self, body: Value) -> reqwest::Response {
        self.http
            .post(format!("{}/trigger", self.base))
            .header("X-API-Key", API_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, path_and_query: &str, key: Option<&str>) -> reqwest::Response {
        let mut request = self.http.get(format!("{}{path_and_query}", self.base));
        if let Some(key) = key {
            request = request.header("X-API-Key", key);
        }
        request.send().await.unwrap()
    }
}

async fn start_sink() -> (String, Arc<Mutex<Vec<Value>>>) {
    let bodies: Arc<Mutex<Vec<Value>>> = Arc::default();
    let app = Router::new()
        .route(
            "/hook",
            post(
                move |State(state): State<Arc<Mutex<Vec<Value>>>>,
                      Json(body): Json<Value>| async move {
                    state.lock().unwrap().push(body);
                    StatusCode::OK
                },
            ),
        )
        .with_state(Arc::clone(&bodies));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), bodies)
}

// ── Auth ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn protected_routes_require_the_api_key() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(1)]).await;

    let response = app
        .http
        .post(format!("{}/trigger", app.base))
        .json(&json!({"entity": "@chan"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "Unauthorized"
    );

    let response = app
        .get("/message?entity=@chan&message_id=1", Some("wrong-key"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bearer_token_is_accepted_as_the_api_key() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(1)]).await;

    let response = app
        .http
        .get(format!("{}/message?entity=@chan&message_id=1", app.base))
        .header("Authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// ── /trigger ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn trigger_returns_enriched_messages_newest_first() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(
        settings_with(tmp.path(), &[]),
        vec![text_message(3), text_message(2), text_message(1)],
    )
    .await;

    let response = app.trigger(json!({"entity": "@chan", "limit": 2})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let messages: Vec<Value> = response.json().await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["id"], 3);
    assert_eq!(messages[1]["id"], 2);
    assert_eq!(messages[0]["source_entity"], "@chan");
}

#[tokio::test]
async fn trigger_limit_defaults_to_two_and_accepts_numeric_strings() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(
        settings_with(tmp.path(), &[]),
        vec![text_message(3), text_message(2), text_message(1)],
    )
    .await;

    let response = app.trigger(json!({"entity": "@chan"})).await;
    assert_eq!(response.json::<Vec<Value>>().await.unwrap().len(), 2);

    let response = app.trigger(json!({"entity": "@chan", "limit": "3"})).await;
    assert_eq!(response.json::<Vec<Value>>().await.unwrap().len(), 3);
}

#[tokio::test]
async fn trigger_rejects_bad_payloads() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(1)]).await;

    let response = app.trigger(json!({"limit": 2})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "entity is required"
    );

    for bad_limit in [json!("abc"), json!(true), json!(1.5)] {
        let response = app
            .trigger(json!({"entity": "@chan", "limit": bad_limit}))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.json::<Value>().await.unwrap()["error"],
            "limit must be an integer"
        );
    }

    let response = app.trigger(json!({"entity": "@chan", "limit": 0})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "limit must be greater than zero"
    );
}

// ── /message ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn message_endpoint_wraps_the_single_result_in_an_array() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(42)]).await;

    let response = app
        .get("/message?entity=@chan&message_id=42", Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Vec<Value> = response.json().await.unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0]["id"], 42);
}

#[tokio::test]
async fn message_endpoint_validation_and_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(42)]).await;

    let response = app.get("/message?message_id=42", Some(API_KEY)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get("/message?entity=@chan&message_id=abc", Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "message_id must be an integer"
    );

    let response = app
        .get("/message?entity=@chan&message_id=404", Some(API_KEY))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "Message not found"
    );
}

// ── /media ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn signed_media_link_serves_the_file_without_a_key() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![photo_message(7)]).await;

    let response = app
        .get("/message?entity=@chan&message_id=7", Some(API_KEY))
        .await;
    let body: Vec<Value> = response.json().await.unwrap();
    let signed_url = body[0]["media"]["download_info"]["signed_url"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app.get(&signed_url, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("7.jpg")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"image-bytes");
}

#[tokio::test]
async fn tampered_media_token_is_an_opaque_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![photo_message(7)]).await;

    let response = app.get("/media/bm90LXJlYWw.Zm9yZ2Vk", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>().await.unwrap()["error"], "Not found");
}

#[tokio::test]
async fn expired_media_link_is_gone() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings_with(tmp.path(), &[("MEDIA_URL_TTL", "1".to_string())]);
    let app = TestApp::spawn(settings, vec![photo_message(7)]).await;

    let response = app
        .get("/message?entity=@chan&message_id=7", Some(API_KEY))
        .await;
    let body: Vec<Value> = response.json().await.unwrap();
    let signed_url = body[0]["media"]["download_info"]["signed_url"]
        .as_str()
        .unwrap()
        .to_string();

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let response = app.get(&signed_url, None).await;
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(
        response.json::<Value>().await.unwrap()["error"],
        "Link expired"
    );
}

// ── /health and / ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public_and_reports_connectivity() {
    let tmp = tempfile::tempdir().unwrap();
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), Vec::new()).await;

    let response = app.get("/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["session_connected"], true);
    assert_eq!(body["issues"], json!([]));
}

#[tokio::test]
async fn root_reveals_the_last_payload_only_with_a_key() {
    let tmp = tempfile::tempdir().unwrap();
    let (url, sink) = start_sink().await;
    let app = TestApp::spawn(settings_with(tmp.path(), &[]), vec![text_message(5)]).await;

    // Anonymous callers only learn the service is up.
    let response = app.get("/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap()["status"], "ok");

    // Authorized, before any delivery.
    let response = app.get("/", Some(API_KEY)).await;
    assert_eq!(
        response.json::<Value>().await.unwrap()["message"],
        "No response yet"
    );

    let response = app
        .trigger(json!({"entity": "@chan", "limit": 1, "webhook_url": url}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    app.dispatcher.flush().await;
    assert_eq!(sink.lock().unwrap().len(), 1);

    let response = app.get("/", Some(API_KEY)).await;
    let last: Value = response.json().await.unwrap();
    assert_eq!(last["id"], 5);
    assert_eq!(last["source_entity"], "@chan");
}
