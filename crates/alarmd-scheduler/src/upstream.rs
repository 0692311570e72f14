//! HTTP client for the trigger platform.

use std::time::Duration;

use alarmd_core::error::{AlarmError, Result};
use alarmd_core::traits::{Platform, PlatformTrigger, TriggerTarget, platform::split_credential};
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpPlatform {
    client: reqwest::Client,
    base: String,
}

impl HttpPlatform {
    pub fn new(base_uri: &str, accept_invalid_certs: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| AlarmError::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base: base_uri.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, apikey: &str) -> RequestBuilder {
        let (user, password) = split_credential(apikey);
        self.client
            .request(method, format!("{}{path}", self.base))
            .basic_auth(user, Some(password))
    }

    async fn send(builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(|e| AlarmError::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let code = status.as_u16();
        // The platform explains rejections as {"error": "..."}.
        let message = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| format!("Received a {code} status code when firing the trigger"));
        Err(AlarmError::Http {
            status: Some(code),
            message,
        })
    }
}

/// `namespace/name` → rule path.
fn rule_path(rule: &str) -> String {
    let (namespace, name) = rule.split_once('/').unwrap_or(("_", rule));
    format!(
        "/api/v1/namespaces/{}/rules/{}",
        urlencoding::encode(namespace),
        urlencoding::encode(name)
    )
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn fire_trigger(&self, target: &TriggerTarget, payload: &Value) -> Result<()> {
        Self::send(
            self.request(Method::POST, &target.path(), &target.apikey)
                .json(payload),
        )
        .await?;
        Ok(())
    }

    async fn get_trigger(&self, target: &TriggerTarget) -> Result<PlatformTrigger> {
        let response =
            Self::send(self.request(Method::GET, &target.path(), &target.apikey)).await?;
        let body: Value = response.json().await.map_err(|e| AlarmError::Http {
            status: None,
            message: format!("invalid trigger body: {e}"),
        })?;
        let rules = body
            .get("rules")
            .and_then(Value::as_object)
            .map(|rules| rules.keys().cloned().collect())
            .unwrap_or_default();
        Ok(PlatformTrigger { rules })
    }

    async fn create_trigger(&self, target: &TriggerTarget) -> Result<()> {
        Self::send(
            self.request(Method::PUT, &target.path(), &target.apikey)
                .json(&serde_json::json!({})),
        )
        .await?;
        Ok(())
    }

    async fn delete_trigger(&self, target: &TriggerTarget) -> Result<()> {
        Self::send(self.request(Method::DELETE, &target.path(), &target.apikey)).await?;
        Ok(())
    }

    async fn delete_rule(&self, apikey: &str, rule: &str) -> Result<()> {
        Self::send(self.request(Method::DELETE, &rule_path(rule), apikey)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{delete, get};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn platform_app() -> Router {
        Router::new()
            .route(
                "/api/v1/namespaces/{ns}/triggers/{name}",
                get(|Path((_, name)): Path<(String, String)>| async move {
                    if name == "missing" {
                        return (StatusCode::NOT_FOUND, Json(json!({"error": "The requested resource does not exist."})));
                    }
                    (StatusCode::OK, Json(json!({"name": name, "rules": {"ns/r1": {}, "ns/r2": {}}})))
                })
                .post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    if !headers.contains_key("authorization") {
                        return StatusCode::UNAUTHORIZED;
                    }
                    if body["fail"] == true {
                        return StatusCode::TOO_MANY_REQUESTS;
                    }
                    StatusCode::ACCEPTED
                }),
            )
            .route(
                "/api/v1/namespaces/{ns}/rules/{name}",
                delete(|| async { StatusCode::OK }),
            )
    }

    #[tokio::test]
    async fn test_fire_and_status_mapping() {
        let base = serve(platform_app()).await;
        let platform = HttpPlatform::new(&base, false).unwrap();
        let target = TriggerTarget::new("uuid:key", "ns", "tick");

        platform.fire_trigger(&target, &json!({"a": 1})).await.unwrap();
        let err = platform
            .fire_trigger(&target, &json!({"fail": true}))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(429));
        assert_eq!(
            err.to_string(),
            "HTTP error 429: Received a 429 status code when firing the trigger"
        );
    }

    #[tokio::test]
    async fn test_get_trigger_lists_rules() {
        let base = serve(platform_app()).await;
        let platform = HttpPlatform::new(&format!("{base}/"), false).unwrap();

        let mut rules = platform
            .get_trigger(&TriggerTarget::new("uuid:key", "ns", "tick"))
            .await
            .unwrap()
            .rules;
        rules.sort();
        assert_eq!(rules, vec!["ns/r1", "ns/r2"]);

        let err = platform
            .get_trigger(&TriggerTarget::new("uuid:key", "ns", "missing"))
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), Some(404));
        assert!(err.to_string().contains("does not exist"));

        platform.delete_rule("uuid:key", "ns/r1").await.unwrap();
    }

    #[test]
    fn test_rule_path() {
        assert_eq!(rule_path("guest/r1"), "/api/v1/namespaces/guest/rules/r1");
        assert_eq!(rule_path("guest/my rule"), "/api/v1/namespaces/guest/rules/my%20rule");
    }

    #[tokio::test]
    async fn test_names_reach_the_platform_as_single_segments() {
        let app = Router::new().route(
            "/api/v1/namespaces/{ns}/triggers/{name}",
            get(|Path((ns, name)): Path<(String, String)>| async move {
                Json(json!({"rules": {format!("{ns}|{name}"): {}}}))
            }),
        );
        let base = serve(app).await;
        let platform = HttpPlatform::new(&base, false).unwrap();

        let rules = platform
            .get_trigger(&TriggerTarget::new("uuid:key", "my ns", "a/b?c"))
            .await
            .unwrap()
            .rules;
        assert_eq!(rules, vec!["my ns|a/b?c"]);
    }
}
