//! HTTP server implementation using Axum.

use std::future::Future;
use std::sync::Arc;

use alarmd_core::config::AlarmConfig;
use alarmd_scheduler::AlarmEngine;
use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::system::SystemStats;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlarmEngine>,
    /// `user:pass` required on the operational endpoints.
    pub endpoint_auth: Option<String>,
    /// Workers new triggers may be assigned to.
    pub workers: Vec<String>,
    pub triggers_limit: i64,
    pub start_time: std::time::Instant,
    pub system: Arc<SystemStats>,
}

impl AppState {
    pub fn new(engine: Arc<AlarmEngine>, config: &AlarmConfig) -> Self {
        Self {
            engine,
            endpoint_auth: config.provider.endpoint_auth.clone(),
            workers: config.provider.workers.clone(),
            triggers_limit: config.provider.triggers_limit,
            start_time: std::time::Instant::now(),
            system: Arc::new(SystemStats::new()),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    // Operational routes, behind endpoint auth when configured
    let operational = Router::new()
        .route("/health", get(super::routes::health))
        .route("/active", get(super::routes::active))
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            super::auth::require_endpoint_auth,
        ));

    // Trigger CRUD, authenticated by the caller's own credential
    let triggers = Router::new()
        .route("/triggers", post(super::crud::create_trigger))
        .route(
            "/triggers/{namespace}/{name}",
            get(super::crud::get_trigger)
                .put(super::crud::update_trigger)
                .delete(super::crud::delete_trigger),
        );

    Router::new()
        .route("/ping", get(super::routes::ping))
        .merge(operational)
        .merge(triggers)
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Serve until `shutdown` resolves.
pub async fn start_server<F>(state: AppState, port: u16, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarmd_core::error::Result;
    use alarmd_core::traits::{Platform, PlatformTrigger, TriggerTarget};
    use alarmd_scheduler::ActiveHost;
    use alarmd_store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct NullPlatform;

    #[async_trait::async_trait]
    impl Platform for NullPlatform {
        async fn fire_trigger(&self, _: &TriggerTarget, _: &Value) -> Result<()> {
            Ok(())
        }
        async fn get_trigger(&self, _: &TriggerTarget) -> Result<PlatformTrigger> {
            Ok(PlatformTrigger::default())
        }
        async fn create_trigger(&self, _: &TriggerTarget) -> Result<()> {
            Ok(())
        }
        async fn delete_trigger(&self, _: &TriggerTarget) -> Result<()> {
            Ok(())
        }
        async fn delete_rule(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
    }

    fn test_router(endpoint_auth: Option<&str>) -> Router {
        let mut config = AlarmConfig::default();
        config.provider.endpoint_auth = endpoint_auth.map(String::from);
        config.provider.workers = vec!["worker0".into(), "worker1".into()];
        let engine = AlarmEngine::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(NullPlatform),
            Arc::new(ActiveHost::standalone("host0")),
        );
        build_router(AppState::new(engine, &config))
    }

    fn basic(credential: &str) -> String {
        format!("Basic {}", STANDARD.encode(credential))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, basic("uuid:key"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str, credential: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(credential) = credential {
            builder = builder.header(header::AUTHORIZATION, basic(credential));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let app = test_router(Some("admin:pw"));
        let (status, body) = call(&app, get("/ping", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"msg": "pong"}));
    }

    #[tokio::test]
    async fn test_operational_endpoints_require_auth() {
        let app = test_router(Some("admin:pw"));
        let (status, _) = call(&app, get("/health", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, get("/health", Some("admin:wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, get("/health", Some("admin:pw"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["worker"], "worker0");
        assert_eq!(body["activeHost"], "host0");
        assert_eq!(body["triggers"], 0);
        assert!(body["memory"]["total"].as_u64().unwrap() > 0);
        assert!(body["memory"]["usagePercent"].is_number());
        assert!(body["cpu"]["usagePercent"].is_number());
    }

    #[tokio::test]
    async fn test_active_switch() {
        let app = test_router(None);
        let (_, body) = call(&app, get("/active?active=false", None)).await;
        assert_eq!(body["active"], false);
        assert_eq!(body["host"], "host0");

        let (_, body) = call(&app, get("/active", None)).await;
        assert_eq!(body["active"], false);
        let (_, body) = call(&app, get("/active?active=true", None)).await;
        assert_eq!(body["active"], true);

        let (status, _) = call(&app, get("/active?active=maybe", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_trigger_crud_round_trip() {
        let app = test_router(None);

        let (status, _) = call(
            &app,
            Request::builder()
                .method("POST")
                .uri("/triggers")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"namespace": "ns", "name": "t", "minutes": 5}).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(
            &app,
            json_request("POST", "/triggers", json!({"namespace": "ns", "name": "t", "minutes": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = call(
            &app,
            json_request(
                "POST",
                "/triggers",
                json!({"namespace": "ns", "name": "t", "minutes": 5, "trigger_payload": {"k": "v"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "uuid:key/ns/t");
        assert_eq!(body["worker"], "worker0");

        let (status, _) = call(
            &app,
            json_request("POST", "/triggers", json!({"namespace": "ns", "name": "t", "minutes": 5})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app, get("/triggers/ns/t", Some("uuid:key"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["minutes"], 5);
        assert_eq!(body["config"]["payload"], json!({"k": "v"}));
        assert_eq!(body["status"]["active"], true);

        // Another tenant cannot see it.
        let (status, _) = call(&app, get("/triggers/ns/t", Some("other:key"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, json_request("PUT", "/triggers/ns/t", json!({"minutes": 10}))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, get("/triggers/ns/t", Some("uuid:key"))).await;
        assert_eq!(body["config"]["minutes"], 10);
        assert_eq!(body["status"]["active"], true);

        let (status, body) = call(&app, json_request("PUT", "/triggers/ns/t", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "no updatable parameters were specified");

        let delete = Request::builder()
            .method("DELETE")
            .uri("/triggers/ns/t")
            .header(header::AUTHORIZATION, basic("uuid:key"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, delete).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, get("/triggers/ns/t", Some("uuid:key"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
