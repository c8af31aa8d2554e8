use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};

use crate::server::AppState;

/// Extract the presented API key from either `X-API-Key` or
/// `Authorization: Bearer <key>`.
#[must_use]
pub fn presented_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(key);
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Middleware protecting the trigger/message routes. Signed media links are
/// their own capability and `/health` stays open for monitors.
pub async fn require_api_key(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let presented = presented_api_key(request.headers());
    if presented.is_some_and(|key| state.settings.api_key_matches(key)) {
        return next.run(request).await;
    }

    tracing::warn!(
        method = %request.method(),
        path = %request.uri().path(),
        "unauthorized access attempt"
    );
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "Unauthorized"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_x_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", "direct".parse().unwrap());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer other".parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), Some("direct"));
    }

    #[test]
    fn falls_back_to_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer secret-key".parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), Some("secret-key"));
    }

    #[test]
    fn ignores_non_bearer_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic dXNlcjpwdw==".parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), None);
        assert_eq!(presented_api_key(&HeaderMap::new()), None);
    }
}
