use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Entries untouched for this long are forgotten
const IDLE_EVICTION: Duration = Duration::from_secs(300);

/// Per-client rate limiter (login attempts per address, commands per session)
pub struct ClientRateLimiter {
    limiters: Mutex<HashMap<String, (DirectLimiter, Instant)>>,
    quota: Quota,
}

impl ClientRateLimiter {
    /// Login attempts allowed per client and minute.
    pub fn per_minute(max_attempts: u32) -> Self {
        let max = NonZeroU32::new(max_attempts).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_minute(max))
    }

    /// Commands allowed per client and second.
    pub fn per_second(max_commands: u32) -> Self {
        let max = NonZeroU32::new(max_commands).unwrap_or(NonZeroU32::MIN);
        Self::with_quota(Quota::per_second(max))
    }

    fn with_quota(quota: Quota) -> Self {
        Self {
            limiters: Mutex::new(HashMap::new()),
            quota,
        }
    }

    pub fn check(&self, client_id: &str) -> bool {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        limiters.retain(|_, (_, last_seen)| now.duration_since(*last_seen) < IDLE_EVICTION);

        let quota = self.quota;
        let (limiter, last_seen) = limiters
            .entry(client_id.to_string())
            .or_insert_with(|| (RateLimiter::direct(quota), now));

        *last_seen = now;
        limiter.check().is_ok()
    }

    pub fn reset(&self, client_id: &str) {
        let mut limiters = self.limiters.lock().unwrap_or_else(|e| e.into_inner());
        limiters.remove(client_id);
    }
}

/// Audit logging for security events
pub fn log_auth_attempt(client_id: &str, device_id: &str, success: bool) {
    if success {
        tracing::info!(
            security_event = "auth_success",
            client_id = client_id,
            device_id = device_id,
            "Authentication successful"
        );
    } else {
        tracing::warn!(
            security_event = "auth_failure",
            client_id = client_id,
            device_id = device_id,
            "Authentication failed"
        );
    }
}

pub fn log_rate_limit_exceeded(client_id: &str, limit_type: &str) {
    tracing::warn!(
        security_event = "rate_limit_exceeded",
        client_id = client_id,
        limit_type = limit_type,
        "Rate limit exceeded"
    );
}

pub fn log_validation_error(client_id: &str, error: &str) {
    tracing::warn!(
        security_event = "validation_error",
        client_id = client_id,
        error = error,
        "Input validation failed"
    );
}

pub fn log_socket_rejected(client_id: &str, transport: &str) {
    tracing::warn!(
        security_event = "socket_rejected",
        client_id = client_id,
        transport = transport,
        "Unauthenticated socket closed"
    );
}
