//! HTTP and socket surface of the bridge.

pub mod http;
pub mod socket;

use axum::http::{header, HeaderMap, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::session::SessionHandle;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "chassis_session";

/// Session handle from the session cookie, else from `Authorization: Bearer`.
pub fn session_from_headers(headers: &HeaderMap) -> Option<SessionHandle> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty());

    if let Some(handle) = from_cookie {
        return Some(SessionHandle::from(handle));
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(SessionHandle::from)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Define allowed headers explicitly (required when using credentials)
    let allowed_headers = [header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT];

    let origins = if origins.is_empty() {
        tracing::warn!("No valid CORS origins configured, defaulting to localhost");
        vec![HeaderValue::from_static("http://localhost:3000")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(allowed_headers)
        .allow_credentials(true)
}

/// Build the full application: HTTP routes, `/ws` and the Socket.IO layer.
pub fn router(state: Arc<AppState>) -> Router {
    let (socketio_layer, io) = socketioxide::SocketIo::new_layer();
    socket::register_socketio(&io, state.clone());

    tracing::info!("CORS allowed origins: {:?}", state.config.server.allowed_origins);
    let cors = cors_layer(&state.config.server.allowed_origins);

    routes(state).layer(ServiceBuilder::new().layer(cors).layer(socketio_layer))
}

/// HTTP and plain WebSocket routes without the Socket.IO layer.
pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(http::login))
        .route("/logout", post(http::logout))
        .route("/control/:action", post(http::control))
        .route("/config", get(http::client_config))
        .route("/health", get(http::health))
        .route("/ws", get(socket::ws_handler))
        .with_state(state)
}
