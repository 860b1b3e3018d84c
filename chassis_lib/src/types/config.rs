use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Environment variable naming the TOML configuration file.
pub const CONFIG_PATH_ENV: &str = "CHASSIS_BRIDGE_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
    pub defaults: MotionDefaults,
    pub limits: MotionLimits,
    pub video: VideoConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /// Outbound status frames queued per browser connection before frames are skipped
    pub status_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            status_buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub control_prefix: String,
    pub status_prefix: String,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            broker_url: "mqtt://127.0.0.1:1883".to_string(),
            username: None,
            password: None,
            client_id: format!("universal-chassis-{}", &suffix[..6]),
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            control_prefix: "CarControl_".to_string(),
            status_prefix: "CarStatus_".to_string(),
            reconnect_initial_ms: 100,
            reconnect_max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared operator password, used when no hash is configured
    pub password: String,
    /// bcrypt hash of the operator password; takes precedence over `password`
    pub password_hash: Option<String>,
    /// Number of digits in a device id
    pub device_id_digits: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: "88888888".to_string(),
            password_hash: None,
            device_id_digits: 3,
        }
    }
}

/// Values used when an operator request omits a parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionDefaults {
    pub speed: f64,        // m/s
    pub omega: f64,        // rad/s
    pub acceleration: f64, // m/s^2
    pub duration: u32,     // ms, 0 = continuous
    pub speed_step: f64,
    pub command_debounce_ms: u64,
}

impl Default for MotionDefaults {
    fn default() -> Self {
        Self {
            speed: 0.5,
            omega: 0.1,
            acceleration: 10.0,
            duration: 0,
            speed_step: 0.1,
            command_debounce_ms: 20,
        }
    }
}

/// Absolute-value caps on operator supplied parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionLimits {
    pub max_speed: f64,
    pub max_omega: f64,
    pub max_acceleration: f64,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_speed: 2.0,
            max_omega: 3.0,
            max_acceleration: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoConfig {
    pub enabled: bool,
    pub url: String,
    pub fallback_image: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8080/stream".to_string(),
            fallback_image: "/images/no-video.png".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub auth_per_minute: u32,
    pub commands_per_second: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            auth_per_minute: 5,
            commands_per_second: 100,
        }
    }
}

impl BridgeConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let config: BridgeConfig = toml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from `$CHASSIS_BRIDGE_CONFIG` (or defaults), apply environment
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from_file(&path)?,
            Err(_) => {
                tracing::warn!("{} not set, using built-in defaults", CONFIG_PATH_ENV);
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override selected fields from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BIND_ADDRESS") {
            self.server.bind_address = v;
        }
        if let Some(port) = lookup("HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(origins) = lookup("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = lookup("MQTT_BROKER_URL") {
            self.mqtt.broker_url = v;
        }
        if let Some(v) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(v);
        }
        if let Some(v) = lookup("AUTH_PASSWORD") {
            self.auth.password = v;
        }
        if let Some(v) = lookup("AUTH_PASSWORD_HASH") {
            self.auth.password_hash = Some(v);
        }
        if let Some(n) = lookup("RATE_LIMIT_AUTH_PER_MINUTE").and_then(|v| v.parse().ok()) {
            self.rate_limit.auth_per_minute = n;
        }
        if let Some(n) = lookup("RATE_LIMIT_COMMANDS_PER_SECOND").and_then(|v| v.parse().ok()) {
            self.rate_limit.commands_per_second = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.device_id_digits == 0 {
            return Err(eyre::eyre!("auth.device_id_digits must be at least 1"));
        }

        for (name, prefix) in [
            ("mqtt.control_prefix", &self.mqtt.control_prefix),
            ("mqtt.status_prefix", &self.mqtt.status_prefix),
        ] {
            if prefix.is_empty() {
                return Err(eyre::eyre!("{} must not be empty", name));
            }
            if prefix.contains(|c| c == '+' || c == '#') {
                return Err(eyre::eyre!(
                    "{} ({:?}) must not contain MQTT wildcards",
                    name,
                    prefix
                ));
            }
        }
        if self.mqtt.control_prefix == self.mqtt.status_prefix {
            return Err(eyre::eyre!(
                "mqtt.control_prefix and mqtt.status_prefix must differ"
            ));
        }

        for (name, value) in [
            ("defaults.speed", self.defaults.speed),
            ("defaults.omega", self.defaults.omega),
            ("defaults.acceleration", self.defaults.acceleration),
            ("limits.max_speed", self.limits.max_speed),
            ("limits.max_omega", self.limits.max_omega),
            ("limits.max_acceleration", self.limits.max_acceleration),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(eyre::eyre!("{} must be a positive number, got {}", name, value));
            }
        }

        for (name, value, limit) in [
            ("speed", self.defaults.speed, self.limits.max_speed),
            ("omega", self.defaults.omega, self.limits.max_omega),
            (
                "acceleration",
                self.defaults.acceleration,
                self.limits.max_acceleration,
            ),
        ] {
            if value > limit {
                return Err(eyre::eyre!(
                    "defaults.{} ({}) exceeds its limit ({})",
                    name,
                    value,
                    limit
                ));
            }
        }

        if self.server.status_buffer == 0 {
            return Err(eyre::eyre!("server.status_buffer must be at least 1"));
        }
        if self.session.ttl_secs == 0 {
            return Err(eyre::eyre!("session.ttl_secs must be at least 1"));
        }
        if self.rate_limit.auth_per_minute == 0 || self.rate_limit.commands_per_second == 0 {
            return Err(eyre::eyre!("rate limits must be at least 1"));
        }
        if self.mqtt.reconnect_initial_ms == 0
            || self.mqtt.reconnect_max_ms < self.mqtt.reconnect_initial_ms
        {
            return Err(eyre::eyre!(
                "mqtt reconnect backoff must satisfy 0 < initial <= max"
            ));
        }

        Ok(())
    }
}
