use serde::{Deserialize, Serialize};

/// Motion command understood by the chassis firmware.
///
/// Serialized with the command name in the `command` field, e.g.
/// `{"command":"speed","vx":0.5,...}` or `{"command":"stop"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum MotionCommand {
    /// Body velocity command
    Speed {
        vx: f64,           // Linear velocity in x direction (m/s)
        vy: f64,           // Linear velocity in y direction (m/s)
        omega: f64,        // Angular velocity about z, counter-clockwise positive (rad/s)
        duration: u32,     // Milliseconds to hold the velocity, 0 = until the next command
        acceleration: f64, // m/s^2
    },

    /// Stop command
    Stop,
}

impl MotionCommand {
    /// Create a new velocity command
    pub fn new_speed(vx: f64, vy: f64, omega: f64, duration: u32, acceleration: f64) -> Self {
        Self::Speed {
            vx,
            vy,
            omega,
            duration,
            acceleration,
        }
    }

    /// Create a stop command
    pub fn new_stop() -> Self {
        Self::Stop
    }

    /// Name used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Speed { .. } => "speed",
            Self::Stop => "stop",
        }
    }

    /// Encode as the UTF-8 JSON payload published on the control topic.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
