//! HTTP basic authentication helpers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::server::AppState;

/// Decode `Authorization: Basic ...` into `user:pass`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credential = String::from_utf8(decoded).ok()?;
    credential.contains(':').then_some(credential)
}

pub fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"alarmd\"")],
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// Operational endpoints require `provider.endpoint_auth` when it is set.
pub async fn require_endpoint_auth(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    let Some(expected) = &state.endpoint_auth else {
        return next.run(req).await;
    };
    if basic_credentials(req.headers()).as_deref() == Some(expected.as_str()) {
        return next.run(req).await;
    }
    unauthorized("Unauthorized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        assert_eq!(basic_credentials(&headers), None);

        let encoded = STANDARD.encode("uuid:secret");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        assert_eq!(basic_credentials(&headers).as_deref(), Some("uuid:secret"));

        let no_colon = STANDARD.encode("justuser");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {no_colon}")).unwrap(),
        );
        assert_eq!(basic_credentials(&headers), None);
    }
}
