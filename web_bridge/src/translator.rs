//! Command translator: operator actions to chassis motion commands.
//!
//! Sign convention expected by the firmware: `left` turns counter-clockwise
//! (positive omega), `right` clockwise (negative omega). `move` carries
//! joystick values through unchanged.

use chassis_lib::{DeviceId, MotionCommand, MotionDefaults, MotionLimits};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::broker::BrokerLink;
use crate::error::{ControlError, TranslateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    Move,
}

impl FromStr for Action {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(Action::Forward),
            "backward" => Ok(Action::Backward),
            "left" => Ok(Action::Left),
            "right" => Ok(Action::Right),
            "stop" => Ok(Action::Stop),
            "move" => Ok(Action::Move),
            other => Err(TranslateError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Forward => "forward",
            Action::Backward => "backward",
            Action::Left => "left",
            Action::Right => "right",
            Action::Stop => "stop",
            Action::Move => "move",
        };
        f.write_str(name)
    }
}

/// Optional numeric parameters of a control request.
///
/// Browsers send slider values either as JSON numbers or numeric strings;
/// `null` counts as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlParams {
    #[serde(default)]
    pub speed: Option<Value>,
    #[serde(default)]
    pub omega: Option<Value>,
    #[serde(default)]
    pub acceleration: Option<Value>,
}

fn parse_param(
    name: &'static str,
    raw: Option<&Value>,
    limit: f64,
) -> Result<Option<f64>, TranslateError> {
    let invalid = |reason: String| TranslateError::InvalidParameter { name, reason };

    let value = match raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("{} is not representable", n)))?,
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| invalid(format!("{:?} is not a number", s)))?,
        Some(other) => return Err(invalid(format!("expected a number, got {}", other))),
    };

    if !value.is_finite() {
        return Err(invalid("must be a finite number".to_string()));
    }
    if value.abs() > limit {
        return Err(invalid(format!("{} exceeds limit {}", value, limit)));
    }
    Ok(Some(value))
}

/// Build the motion command for `action`.
///
/// Present-but-invalid parameters are rejected rather than replaced by
/// defaults. `stop` ignores parameters entirely.
pub fn translate(
    action: Action,
    params: &ControlParams,
    defaults: &MotionDefaults,
    limits: &MotionLimits,
) -> Result<MotionCommand, TranslateError> {
    if action == Action::Stop {
        return Ok(MotionCommand::new_stop());
    }

    let speed = parse_param("speed", params.speed.as_ref(), limits.max_speed)?;
    let omega = parse_param("omega", params.omega.as_ref(), limits.max_omega)?;
    let acceleration = parse_param(
        "acceleration",
        params.acceleration.as_ref(),
        limits.max_acceleration,
    )?
    .unwrap_or(defaults.acceleration);

    let (vx, omega) = match action {
        Action::Forward => (speed.unwrap_or(defaults.speed), 0.0),
        Action::Backward => (-speed.unwrap_or(defaults.speed), 0.0),
        Action::Left => (0.0, omega.unwrap_or(defaults.omega)),
        Action::Right => (0.0, -omega.unwrap_or(defaults.omega)),
        Action::Move => (
            speed.unwrap_or(defaults.speed),
            omega.unwrap_or(defaults.omega),
        ),
        Action::Stop => return Ok(MotionCommand::new_stop()),
    };

    Ok(MotionCommand::new_speed(
        vx,
        0.0,
        omega,
        defaults.duration,
        acceleration,
    ))
}

/// Validates operator requests and publishes them to the device control topic.
pub struct CommandTranslator {
    link: Arc<dyn BrokerLink>,
    control_prefix: String,
    defaults: MotionDefaults,
    limits: MotionLimits,
}

impl CommandTranslator {
    pub fn new(
        link: Arc<dyn BrokerLink>,
        control_prefix: impl Into<String>,
        defaults: MotionDefaults,
        limits: MotionLimits,
    ) -> Self {
        Self {
            link,
            control_prefix: control_prefix.into(),
            defaults,
            limits,
        }
    }

    pub fn translate(
        &self,
        action: &str,
        params: &ControlParams,
    ) -> Result<MotionCommand, TranslateError> {
        let action = action.parse::<Action>()?;
        translate(action, params, &self.defaults, &self.limits)
    }

    /// Translate and publish once. Failures are returned, never retried.
    pub async fn dispatch(
        &self,
        device: &DeviceId,
        action: &str,
        params: &ControlParams,
    ) -> Result<MotionCommand, ControlError> {
        let command = self.translate(action, params)?;
        let topic = device.topic(&self.control_prefix);
        let payload = command.to_payload()?;

        self.link.publish(&topic, payload).await?;
        tracing::debug!("Sent {} command to {}", command.name(), topic);
        Ok(command)
    }
}
