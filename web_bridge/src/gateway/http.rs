//! HTTP handlers: login, logout, control commands, client config and health.

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chassis_lib::VideoConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

use super::{session_from_headers, SESSION_COOKIE};
use crate::error::{ApiError, ControlError, SessionError, TranslateError};
use crate::multiplexer::MultiplexerStats;
use crate::security::{log_auth_attempt, log_rate_limit_exceeded, log_validation_error};
use crate::state::AppState;
use crate::translator::ControlParams;

/// Body shared by every JSON reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub password: String,
}

fn client_key(addr: Option<ConnectInfo<SocketAddr>>) -> String {
    addr.map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn session_cookie(value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, value, max_age_secs
    )
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    addr: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let client = client_key(addr);

    if !state.auth_rate_limiter.check(&client) {
        log_rate_limit_exceeded(&client, "auth");
        return Err(ApiError::RateLimited);
    }

    let request: LoginRequest = serde_json::from_slice(&body).map_err(|e| {
        log_validation_error(&client, &e.to_string());
        ApiError::MalformedBody(e.to_string())
    })?;

    let session = match state
        .sessions
        .authenticate(&request.device_id, &request.password)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            log_auth_attempt(&client, &request.device_id, false);
            return Err(e.into());
        }
    };

    log_auth_attempt(&client, session.device_id.as_str(), true);
    state.auth_rate_limiter.reset(&client);

    let cookie = session_cookie(session.handle.as_str(), state.sessions.ttl().as_secs());
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(ApiResponse::ok("Login successful")),
    )
        .into_response())
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(handle) = session_from_headers(&headers) {
        state.sessions.invalidate(&handle);
    }

    (
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(ApiResponse::ok("Logged out")),
    )
        .into_response()
}

/// Missing or empty body means "no parameters".
fn parse_params(body: &[u8]) -> Result<ControlParams, TranslateError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ControlParams::default());
    }
    serde_json::from_slice(body).map_err(|e| TranslateError::InvalidParameter {
        name: "body",
        reason: e.to_string(),
    })
}

pub async fn control(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, ApiError> {
    let handle = session_from_headers(&headers).ok_or(SessionError::NotAuthenticated)?;
    let device = state.sessions.resolve(&handle)?;

    if !state.command_rate_limiter.check(handle.as_str()) {
        log_rate_limit_exceeded(device.as_str(), "command");
        return Err(ApiError::RateLimited);
    }

    let result = match parse_params(&body) {
        Ok(params) => state.translator.dispatch(&device, &action, &params).await,
        Err(e) => Err(ControlError::from(e)),
    };

    match result {
        Ok(_) => Ok(Json(ApiResponse::ok("Command sent"))),
        Err(ControlError::Translate(e)) => {
            log_validation_error(device.as_str(), &e.to_string());
            Err(ControlError::Translate(e).into())
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDefaults {
    pub speed: f64,
    pub omega: f64,
    pub acceleration: f64,
    pub speed_step: f64,
    pub command_debounce_time: u64,
}

/// Values the operator page needs before login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub video: VideoConfig,
    pub defaults: ClientDefaults,
    pub device_id_digits: usize,
}

pub async fn client_config(State(state): State<Arc<AppState>>) -> Json<ClientConfig> {
    let config = &state.config;
    Json(ClientConfig {
        video: config.video.clone(),
        defaults: ClientDefaults {
            speed: config.defaults.speed,
            omega: config.defaults.omega,
            acceleration: config.defaults.acceleration,
            speed_step: config.defaults.speed_step,
            command_debounce_time: config.defaults.command_debounce_ms,
        },
        device_id_digits: config.auth.device_id_digits,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub broker_connected: bool,
    pub sessions: usize,
    pub multiplexer: Option<MultiplexerStats>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let broker_connected = state.link.is_connected();
    let multiplexer = state.multiplexer.stats().await.ok();
    let status = if broker_connected && multiplexer.is_some() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthReport {
        status,
        broker_connected,
        sessions: state.sessions.len(),
        multiplexer,
    })
}
