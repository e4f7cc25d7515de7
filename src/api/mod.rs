//! devhub REST API
//!
//! HTTP API layer for the hub, built with Axum.
//!
//! # Endpoints
//!
//! ## Devices
//! - `POST /api/v1/bootstrap` - Register a device, returns its configuration
//! - `POST /api/v1/ingest` - Submit device data
//!
//! ## Dashboard
//! - `GET /api/v1/devices` - Data history of all devices
//! - `GET /api/v1/identities` - Known devices
//! - `GET /api/v1/devices/:id` - One device and its live state
//! - `GET /api/v1/devices/:id/data` - Data history of one device
//! - `GET /api/v1/devices/:id/config` - Current configuration
//! - `PATCH /api/v1/devices/:id/config` - Replace and push configuration
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /api/v1/devices/:id/stream` - Live data of one device

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ApiConfig;
use crate::shutdown::Shutdown;
use crate::websocket::stream_handler;

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Device routes
        .route("/bootstrap", post(routes::bootstrap::bootstrap))
        .route("/ingest", post(routes::ingest::ingest))
        // Dashboard routes
        .route("/devices", get(routes::devices::list_data))
        .route("/identities", get(routes::devices::list_identities))
        .route("/devices/:id", get(routes::devices::get_device))
        .route("/devices/:id/data", get(routes::devices::device_data))
        .route(
            "/devices/:id/config",
            get(routes::devices::get_config).patch(routes::devices::patch_config),
        )
        // WebSocket route
        .route("/devices/:id/stream", get(stream_handler));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Serve the API until `shutdown` fires
pub async fn serve(state: AppState, config: &ApiConfig, shutdown: Shutdown) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("devhub API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("devhub API shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::device::DeviceId;
    use crate::hub::{Hub, HubOptions};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use std::time::Duration;
    use tower::util::ServiceExt;

    const FRIDGE_META: &str = r#"{"type": "fridge", "name": "kitchen", "dev_id": "AA:BB"}"#;
    const FRIDGE_PATCH: &str = r#"{"turnedOn":false,"streamOn":true,"collectFreq":100,"sendFreq":900}"#;

    fn create_test_app() -> (Router, Arc<Hub>) {
        let hub = Arc::new(Hub::in_memory(HubOptions::default()));
        let router = build_router(AppState::new(Arc::clone(&hub)));
        (router, hub)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn send(method: &str, uri: &str, body: impl Into<String>) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.into()))
            .unwrap()
    }

    async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    async fn bootstrap(app: &Router) {
        let response = app
            .clone()
            .oneshot(send("POST", "/api/v1/bootstrap", format!(r#"{{"meta": {}}}"#, FRIDGE_META)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_live() {
        let (app, _hub) = create_test_app();
        let response = app.oneshot(get("/health/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready() {
        let (app, _hub) = create_test_app();
        let response = app.oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_ready_after_store_closed() {
        let (app, hub) = create_test_app();
        hub.shutdown().await;
        let response = app.oneshot(get("/health/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_full() {
        let (app, _hub) = create_test_app();
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bootstrap_returns_default_config() {
        let (app, _hub) = create_test_app();
        let response = app
            .oneshot(send("POST", "/api/v1/bootstrap", format!(r#"{{"meta": {}}}"#, FRIDGE_META)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["turnedOn"], true);
        assert_eq!(body["sendFreq"], 5000);
    }

    #[tokio::test]
    async fn test_bootstrap_unknown_kind() {
        let (app, _hub) = create_test_app();
        let response = app
            .oneshot(send(
                "POST",
                "/api/v1/bootstrap",
                r#"{"meta": {"type": "toaster", "name": "t", "dev_id": "AA"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_and_read_history() {
        let (app, _hub) = create_test_app();
        let frame = format!(
            r#"{{"time": 1699000000000, "meta": {}, "data": {{"tempCam1": {{"1699000000000": 4.0}}, "tempCam2": {{}}}}}}"#,
            FRIDGE_META
        );
        let response = app.clone().oneshot(send("POST", "/api/v1/ingest", frame)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.oneshot(get("/api/v1/devices/AA:BB/data")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["time"], 1699000000000i64);
    }

    #[tokio::test]
    async fn test_ingest_invalid_json() {
        let (app, _hub) = create_test_app();
        let response = app
            .oneshot(send("POST", "/api/v1/ingest", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_bad_payload() {
        let (app, hub) = create_test_app();
        let frame = format!(r#"{{"meta": {}, "data": {{"turnovers": {{}}}}}}"#, FRIDGE_META);
        let response = app.oneshot(send("POST", "/api/v1/ingest", frame)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(hub.ingestor.history_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_unknown_device() {
        let (app, _hub) = create_test_app();
        let response = app.oneshot(get("/api/v1/devices/ZZ/config")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_patch_config_persists_and_pushes() {
        let (app, hub) = create_test_app();
        let shutdown = Shutdown::new();
        let handles = hub.start(&shutdown);
        bootstrap(&app).await;

        let id = DeviceId::parse("AA:BB").unwrap();
        let (conn, mut rx) = ChannelConnection::new("device", 8);
        hub.distributor.register_connection(id, Arc::new(conn)).await;

        // the patch listener subscribes asynchronously
        let mut listeners = 0;
        for _ in 0..100 {
            let response = app
                .clone()
                .oneshot(send("PATCH", "/api/v1/devices/AA:BB/config", FRIDGE_PATCH))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
            listeners = body["listeners"].as_u64().unwrap();
            if listeners > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(listeners, 1);

        let pushed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&pushed[..], FRIDGE_PATCH.as_bytes());

        let response = app.oneshot(get("/api/v1/devices/AA:BB/config")).await.unwrap();
        assert_eq!(&body_bytes(response).await[..], FRIDGE_PATCH.as_bytes());

        shutdown.trigger("test");
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_patch_config_wrong_schema() {
        let (app, _hub) = create_test_app();
        bootstrap(&app).await;
        let response = app
            .oneshot(send("PATCH", "/api/v1/devices/AA:BB/config", r#"{"name":"FastMode"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_device_reports_live_state() {
        let (app, _hub) = create_test_app();
        bootstrap(&app).await;

        let response = app.oneshot(get("/api/v1/devices/AA:BB")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["type"], "fridge");
        assert_eq!(body["registered"], true);
        assert_eq!(body["connected"], false);
        assert_eq!(body["observers"], 0);
    }

    #[tokio::test]
    async fn test_list_identities() {
        let (app, _hub) = create_test_app();
        bootstrap(&app).await;

        let response = app.oneshot(get("/api/v1/identities")).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body[0]["dev_id"], "AA:BB");
    }
}
