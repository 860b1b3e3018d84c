//! Session registry: maps opaque session handles to authenticated devices.

use chassis_lib::{AuthConfig, DeviceId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{AuthError, SessionError};

/// Opaque session token handed to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(String);

impl SessionHandle {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionHandle {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub handle: SessionHandle,
    pub device_id: DeviceId,
    pub authenticated_at: DateTime<Utc>,
    expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

enum PasswordCheck {
    Plain(String),
    Bcrypt(String),
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionHandle, Session>>,
    password: PasswordCheck,
    device_id_digits: usize,
    ttl: Duration,
}

impl SessionRegistry {
    pub fn new(auth: &AuthConfig, ttl: Duration) -> Self {
        let password = match &auth.password_hash {
            Some(hash) => PasswordCheck::Bcrypt(hash.clone()),
            None => PasswordCheck::Plain(auth.password.clone()),
        };
        Self {
            sessions: Mutex::new(HashMap::new()),
            password,
            device_id_digits: auth.device_id_digits,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionHandle, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn password_matches(&self, candidate: &str) -> bool {
        match &self.password {
            PasswordCheck::Plain(expected) => expected == candidate,
            PasswordCheck::Bcrypt(hash) => {
                let hash = hash.clone();
                let candidate = candidate.to_string();
                match tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &hash)).await {
                    Ok(Ok(matches)) => matches,
                    Ok(Err(e)) => {
                        tracing::error!("Configured password hash is unusable: {}", e);
                        false
                    }
                    Err(e) => {
                        tracing::error!("Password verification task failed: {}", e);
                        false
                    }
                }
            }
        }
    }

    /// Create a new session for `device_id`.
    ///
    /// The device id format is checked before the password.
    pub async fn authenticate(&self, device_id: &str, password: &str) -> Result<Session, AuthError> {
        let device_id = DeviceId::parse(device_id, self.device_id_digits)
            .ok_or(AuthError::InvalidDeviceIdFormat)?;

        if !self.password_matches(password).await {
            return Err(AuthError::WrongPassword);
        }

        let session = Session {
            handle: SessionHandle::generate(),
            device_id,
            authenticated_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions().insert(session.handle.clone(), session.clone());
        Ok(session)
    }

    /// Device bound to `handle`. Expired sessions are removed and reported
    /// exactly like unknown ones.
    pub fn resolve(&self, handle: &SessionHandle) -> Result<DeviceId, SessionError> {
        let mut sessions = self.sessions();
        let now = Instant::now();
        match sessions.get(handle) {
            Some(session) if !session.is_expired(now) => Ok(session.device_id.clone()),
            Some(_) => {
                sessions.remove(handle);
                Err(SessionError::NotAuthenticated)
            }
            None => Err(SessionError::NotAuthenticated),
        }
    }

    pub fn invalidate(&self, handle: &SessionHandle) {
        self.sessions().remove(handle);
    }

    /// Drop every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
