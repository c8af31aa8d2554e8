use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
};

use {
    relaygram_config::Settings,
    relaygram_platform::PlatformClient,
    relaygram_session::{Error as SessionError, SessionManager},
    relaygram_webhook::WebhookDispatcher,
};

use crate::auth::{presented_api_key, require_api_key};

/// File the dispatcher persists the most recent payload to, relative to the
/// data dir.
const LAST_RESPONSE_FILE: &str = "last_response.json";

// ── Shared app state ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub session: SessionManager,
    pub settings: Arc<Settings>,
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/trigger", post(trigger_handler))
        .route("/message", get(message_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/", get(last_response_handler))
        .route("/health", get(health_handler))
        .route("/media/{token}", get(media_handler))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the front door: dispatcher, session manager, then the HTTP server.
pub async fn serve(settings: Arc<Settings>, client: Arc<dyn PlatformClient>) -> anyhow::Result<()> {
    let dispatcher = WebhookDispatcher::new(settings.data_dir.clone());
    let session = SessionManager::start(Arc::clone(&settings), client, dispatcher).await?;

    let app = build_router(AppState {
        session,
        settings: Arc::clone(&settings),
    });

    let listener =
        TcpListener::bind((settings.bind_host.as_str(), settings.bind_port)).await?;
    info!(addr = %listener.local_addr()?, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
}

fn operational_failure(e: &SessionError) -> Response {
    error!(error = %e, "operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
        .into_response()
}

async fn trigger_handler(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let Some(entity) = body.get("entity").and_then(Value::as_str) else {
        return bad_request("entity is required");
    };
    let webhook_url = body
        .get("webhook_url")
        .and_then(Value::as_str)
        .map(str::to_string);

    // Accept the limit as a JSON number or a numeric string.
    let limit = match body.get("limit") {
        None | Some(Value::Null) => 2,
        Some(Value::Number(n)) if n.as_i64().is_some() => n.as_i64().unwrap_or(2),
        Some(Value::String(s)) => match s.parse::<i64>() {
            Ok(limit) => limit,
            Err(_) => return bad_request("limit must be an integer"),
        },
        Some(_) => return bad_request("limit must be an integer"),
    };
    if limit < 1 {
        return bad_request("limit must be greater than zero");
    }

    info!(entity, limit, "processing trigger request");
    match state.session.fetch_history(entity, limit, webhook_url).await {
        Ok(messages) => {
            info!(entity, count = messages.len(), "retrieved messages");
            Json(messages).into_response()
        }
        Err(e) => operational_failure(&e),
    }
}

#[derive(Deserialize)]
struct MessageParams {
    entity: Option<String>,
    message_id: Option<String>,
    webhook_url: Option<String>,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(params): Query<MessageParams>,
) -> Response {
    let Some(entity) = params.entity.as_deref() else {
        return bad_request("entity is required");
    };
    let Some(raw_id) = params.message_id.as_deref() else {
        return bad_request("message_id is required");
    };
    let Ok(message_id) = raw_id.parse::<i64>() else {
        return bad_request("message_id must be an integer");
    };

    match state
        .session
        .fetch_by_id(entity, message_id, params.webhook_url)
        .await
    {
        Ok(Some(message)) => Json(json!([message])).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Message not found"})),
        )
            .into_response(),
        Err(e) => operational_failure(&e),
    }
}

#[derive(Deserialize)]
struct MediaParams {
    entity: Option<String>,
    message_id: Option<i64>,
}

/// The token itself is the capability; no API key here. Expired links are
/// `410 Gone`, everything else that fails verification is an opaque `404`.
async fn media_handler(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<MediaParams>,
) -> Response {
    let path = match state
        .session
        .resolve_media_path(&token, params.entity.as_deref(), params.message_id)
        .await
    {
        Ok(path) => path,
        Err(SessionError::Media(relaygram_media::Error::Expired { .. })) => {
            return (StatusCode::GONE, Json(json!({"error": "Link expired"}))).into_response();
        }
        Err(SessionError::Media(_)) => {
            return media_not_found();
        }
        Err(e) => return operational_failure(&e),
    };

    let Ok(contents) = tokio::fs::read(&path).await else {
        return media_not_found();
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        contents,
    )
        .into_response()
}

fn media_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"}))).into_response()
}

async fn health_handler(State(state): State<AppState>) -> Response {
    Json(state.session.health_snapshot().await).into_response()
}

/// Without a valid API key this reveals nothing, not even that the key was
/// wrong; with one it returns the most recently dispatched payload.
async fn last_response_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let authorized =
        presented_api_key(&headers).is_some_and(|key| state.settings.api_key_matches(key));
    if !authorized {
        return Json(json!({"status": "ok"})).into_response();
    }

    let path = state.settings.data_dir.join(LAST_RESPONSE_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(payload) => Json(payload).into_response(),
            Err(e) => {
                error!(error = %e, "last response file is not valid JSON");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal error"})),
                )
                    .into_response()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Json(json!({"message": "No response yet"})).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to read last response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Internal error"})),
            )
                .into_response()
        }
    }
}
