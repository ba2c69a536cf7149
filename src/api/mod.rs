//! pawpair HTTP API
//!
//! Built with Axum. Serves the two pages, the JSON API they call, the
//! websocket that pushes panel updates, and the sprite and sound assets.
//!
//! # Endpoints
//!
//! ## Pages
//! - `GET /`, `GET /todo` - Checklist page (`?room=`)
//! - `GET /pet` - Pet page (`?room=`)
//!
//! ## Tasks
//! - `GET /api/v1/rooms/:room/sides/:side/tasks` - Checklist snapshot
//! - `POST /api/v1/rooms/:room/sides/:side/tasks` - Add a task
//! - `POST /api/v1/rooms/:room/sides/:side/tasks/:id/toggle` - Flip done
//! - `DELETE /api/v1/rooms/:room/sides/:side/tasks/:id` - Archive a task
//! - `GET /api/v1/rooms/:room/coins` - Room balance
//!
//! ## Pet
//! - `GET /api/v1/rooms/:room/pet` - Pet snapshot
//! - `POST /api/v1/rooms/:room/pet/actions/:action` - Feed, pet, play or bathe
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! ## WebSocket
//! - `GET /ws` - Panel push

pub mod dto;
pub mod error;
pub mod render;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::websocket::{forward_updates, reap_idle_rooms, websocket_handler};

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route(
            "/rooms/:room/sides/:side/tasks",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/rooms/:room/sides/:side/tasks/:id/toggle",
            post(routes::tasks::toggle_task),
        )
        .route(
            "/rooms/:room/sides/:side/tasks/:id",
            axum::routing::delete(routes::tasks::archive_task),
        )
        .route("/rooms/:room/coins", get(routes::tasks::get_coins))
        .route("/rooms/:room/pet", get(routes::pet::get_pet))
        .route(
            "/rooms/:room/pet/actions/:action",
            post(routes::pet::perform_action),
        );

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    let assets = ServeDir::new(&state.config.api.assets_dir);
    let shared_state = Arc::new(state);

    Router::new()
        .route("/", get(routes::pages::checklist_page))
        .route("/todo", get(routes::pages::checklist_page))
        .route("/pet", get(routes::pages::pet_page))
        .route("/ws", get(websocket_handler))
        .nest("/api/v1", api_routes)
        .nest("/health", health_routes)
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Serve until a shutdown signal, then stop every room
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.api.addr();
    let registry = Arc::clone(&state.registry);
    let forwarder = forward_updates(Arc::clone(&state.hub), registry.subscribe());
    let reaper = state
        .config
        .rooms
        .idle_timeout()
        .map(|idle| reap_idle_rooms(Arc::clone(&registry), Arc::clone(&state.hub), idle));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("pawpair listening on {}", addr);

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)));

    registry.shutdown().await;
    forwarder.abort();
    if let Some(reaper) = reaper {
        reaper.abort();
    }

    tracing::info!("pawpair shut down gracefully");
    result
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let state = AppState::new(Config::default(), Arc::new(MemoryBackend::new()));
        build_router(state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("Content-Type", "application/json");
        }
        let request = request
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = create_test_app();

        assert_eq!(send(&app, "GET", "/health/live", None).await.0, StatusCode::OK);
        assert_eq!(send(&app, "GET", "/health/ready", None).await.0, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_task_lifecycle_moves_coins() {
        let app = create_test_app();
        let tasks = "/api/v1/rooms/default/sides/left/tasks";

        let (status, body) = send(&app, "POST", tasks, Some(r#"{"title": "Dishes", "reward": 3}"#)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["tasks"][0]["title"], "Dishes");
        let id = body["tasks"][0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("{}/{}/toggle", tasks, id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"][0]["done"], true);
        assert_eq!(body["coins"], 3);

        let (status, body) = send(&app, "DELETE", &format!("{}/{}", tasks, id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["tasks"].as_array().unwrap().len(), 0);

        let (_, body) = send(&app, "GET", "/api/v1/rooms/default/coins", None).await;
        assert_eq!(body["coins"], 3);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/rooms/default/sides/left/tasks",
            Some(r#"{"title": "", "reward": 3}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        // Malformed bodies get the same envelope as other errors
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/rooms/default/sides/left/tasks",
            Some(r#"{"title": "Dishes", "reward": "x"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert!(body["request_id"].is_string());

        let (status, _) = send(&app, "GET", "/api/v1/rooms/default/sides/middle/tasks", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "GET", "/api/v1/rooms/bad.room/pet", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_ROOM");

        let (status, _) = send(&app, "POST", "/api/v1/rooms/default/pet/actions/dance", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "POST", "/api/v1/rooms/default/sides/left/tasks/42/toggle", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pet_action_without_coins_conflicts() {
        let app = create_test_app();

        let (status, body) = send(&app, "POST", "/api/v1/rooms/default/pet/actions/feed", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_COINS");
        assert_eq!(body["error"]["message"], "Not enough coins!");

        let (_, pet) = send(&app, "GET", "/api/v1/rooms/default/pet", None).await;
        assert_eq!(pet["hunger"], 100);
        assert_eq!(pet["animation"], "idle");
    }

    #[tokio::test]
    async fn test_pet_action_with_coins() {
        let app = create_test_app();
        let tasks = "/api/v1/rooms/default/sides/right/tasks";

        let (_, body) = send(&app, "POST", tasks, Some(r#"{"title": "Cook", "reward": 5}"#)).await;
        let id = body["tasks"][0]["id"].as_str().unwrap().to_string();
        send(&app, "POST", &format!("{}/{}/toggle", tasks, id), None).await;

        let (status, pet) = send(&app, "POST", "/api/v1/rooms/default/pet/actions/pet", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pet["animation"], "pet");
        assert_eq!(pet["sound"], "/sounds/purr.mp3");
        assert_eq!(pet["coins"], 3);
    }

    #[tokio::test]
    async fn test_pages_render() {
        let app = create_test_app();

        for uri in ["/", "/todo?room=den", "/pet"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }
}
