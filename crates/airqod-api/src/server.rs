//! HTTP server configuration and request routing.
//!
//! Axum server setup with middleware stack and graceful shutdown.
//! Requests flow through middleware in order:
//! 1. Request ID generation
//! 2. Request/response logging
//! 3. Timeout enforcement
//! 4. Basic authentication (all /api routes)
//! 5. Handler execution
//!
//! The route table mirrors the administrative surface: queue CRUD,
//! asynchronous clears, schedule CRUD, queue statistics and a liveness
//! probe. Only the probe is reachable without credentials.

use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{handlers, middleware::auth::auth_middleware, AppState};

/// Creates the Axum router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new().route("/health", get(handlers::liveness_check));

    let api_routes = Router::new()
        .route("/api/queue", post(handlers::create_record).get(handlers::list_records))
        .route("/api/queue/{id}", get(handlers::get_record).delete(handlers::delete_record))
        .route("/api/clearBatchRequests/{batch}", get(handlers::clear_batch))
        .route("/api/clearDistrictRequests/{district}", get(handlers::clear_district))
        .route("/api/schedules", post(handlers::create_schedule).get(handlers::list_schedules))
        .route(
            "/api/schedules/{id}",
            get(handlers::get_schedule)
                .put(handlers::update_schedule)
                .delete(handlers::delete_schedule),
        )
        .route("/api/stats", get(handlers::stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject a request ID into all responses.
///
/// Adds an X-Request-Id header for tracing requests across services.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Starts the HTTP server with graceful shutdown support.
///
/// Binds to the specified address and serves requests until a shutdown
/// signal is received.
///
/// # Errors
///
/// Returns `std::io::Error` if the port is already in use or the
/// network interface is unavailable.
pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for a shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests to complete");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use airqod_core::{
        DeliveryRecord, MemoryStorage, RecordDraft, RecordStatus, RecordStore, TestClock,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::*;
    use crate::AdminCredentials;

    // admin:district
    const AUTH: &str = "Basic YWRtaW46ZGlzdHJpY3Q=";

    fn test_state() -> (AppState, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let state = AppState::new(
            storage.clone(),
            storage.clone(),
            Arc::new(TestClock::new()),
            AdminCredentials { username: "admin".into(), password: "district".into() },
        );
        (state, storage)
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request.header(header::AUTHORIZATION, AUTH)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_is_reachable_without_credentials() {
        let (state, _) = test_state();
        let app = create_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn api_rejects_missing_and_bad_credentials() {
        let (state, _) = test_state();
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/api/stats")
                    // admin:wrong
                    .header(header::AUTHORIZATION, "Basic YWRtaW46d3Jvbmc=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn queue_create_then_fetch_round_trip() {
        let (state, storage) = test_state();
        let app = create_router(state);

        let draft = serde_json::json!({
            "source": "airqo",
            "destination": "dhis2",
            "content_type": "application/json",
            "body": "{\"value\":1}",
            "district": "Kampala",
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(draft.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let created = body_json(response).await;
        assert_eq!(created["status"], "pending");
        let id = created["id"].as_str().expect("record id").to_string();

        let response = app
            .oneshot(
                authed(Request::get(format!("/api/queue/{id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let fetched = body_json(response).await;
        assert_eq!(fetched["destination"], "dhis2");
        assert_eq!(storage.record_count().await, 1);
    }

    #[tokio::test]
    async fn queue_create_rejects_empty_destination() {
        let (state, _) = test_state();
        let app = create_router(state);

        let draft = serde_json::json!({
            "source": "airqo",
            "destination": "",
            "content_type": "application/json",
            "body": "{}",
        });
        let response = app
            .oneshot(
                authed(Request::post("/api/queue"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(draft.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "invalid_input");
    }

    #[tokio::test]
    async fn queue_listing_honors_status_filter() {
        let (state, storage) = test_state();
        let now = state.clock.now_utc();

        let mut failed = DeliveryRecord::from_draft(
            RecordDraft { destination: "dhis2".into(), ..RecordDraft::default() },
            now,
        );
        failed.status = RecordStatus::Failed;
        storage.insert_record(&failed).await.unwrap();

        let pending = DeliveryRecord::from_draft(
            RecordDraft { destination: "dhis2".into(), ..RecordDraft::default() },
            now,
        );
        storage.insert_record(&pending).await.unwrap();

        let app = create_router(state);
        let response = app
            .clone()
            .oneshot(
                authed(Request::get("/api/queue?status=failed")).body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json.as_array().map(Vec::len), Some(1));
        assert_eq!(json[0]["status"], "failed");

        let response = app
            .oneshot(
                authed(Request::get("/api/queue?status=bogus")).body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batch_clear_acknowledges_and_deletes() {
        let (state, storage) = test_state();
        let now = state.clock.now_utc();

        let record = DeliveryRecord::from_draft(
            RecordDraft {
                destination: "dhis2".into(),
                batch_id: Some("batch-7".into()),
                ..RecordDraft::default()
            },
            now,
        );
        storage.insert_record(&record).await.unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(
                authed(Request::get("/api/clearBatchRequests/batch-7"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = body_json(response).await;
        assert_eq!(json["status"], "accepted");
        assert!(json["task_id"].as_str().is_some());

        // The clear runs in a spawned task; yield until it lands.
        for _ in 0..50 {
            if storage.record_count().await == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(storage.record_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_crud_round_trip() {
        let (state, _) = test_state();
        let app = create_router(state);

        let draft = serde_json::json!({
            "name": "weekly-push",
            "cron_expr": "0 3 * * 1",
            "server": "dhis2",
            "body": "{}",
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::post("/api/schedules"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(draft.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let update = serde_json::json!({
            "name": "weekly-push",
            "cron_expr": "0 4 * * 1",
            "server": "dhis2",
            "body": "{}",
        });
        let response = app
            .clone()
            .oneshot(
                authed(Request::put(format!("/api/schedules/{id}")))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(update.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cron_expr"], "0 4 * * 1");

        let response = app
            .clone()
            .oneshot(
                authed(Request::delete(format!("/api/schedules/{id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                authed(Request::get(format!("/api/schedules/{id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn schedule_creation_rejects_invalid_cron() {
        let (state, _) = test_state();
        let app = create_router(state);

        let draft = serde_json::json!({
            "name": "broken",
            "cron_expr": "every sometimes",
            "server": "dhis2",
        });
        let response = app
            .oneshot(
                authed(Request::post("/api/schedules"))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(draft.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_cron");
    }

    #[tokio::test]
    async fn stats_reports_queue_depth() {
        let (state, storage) = test_state();
        let now = state.clock.now_utc();

        storage
            .insert_record(&DeliveryRecord::from_draft(
                RecordDraft { destination: "dhis2".into(), ..RecordDraft::default() },
                now,
            ))
            .await
            .unwrap();

        let app = create_router(state);
        let response = app
            .oneshot(authed(Request::get("/api/stats")).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["pending"], 1);
        assert_eq!(json["succeeded"], 0);
    }
}
