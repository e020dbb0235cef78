//! Hysteresis-based control policy.
//!
//! A pure function of `(reading, prior snapshot)` — no internal state, no
//! I/O. The fan runs on a hysteresis band (on at ≥ 30 °C, off at ≤ 25 °C,
//! hold in between); the light uses a single 50.0 lux threshold with no
//! band. The asymmetry matches the deployed devices and is deliberate.

use crate::db::models::{ControlMode, StateSnapshot};
use crate::parser::Reading;

/// Temperature at or above which the fan turns on (°C).
pub const FAN_ON_TEMP: f64 = 30.0;
/// Temperature at or below which the fan turns off (°C).
pub const FAN_OFF_TEMP: f64 = 25.0;
/// Light intensity below which the grow light turns on (lux).
pub const LIGHT_ON_LUX: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    OpenFan,
    CloseFan,
    OpenLight,
    CloseLight,
}

impl ActuatorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenFan => "open_fan",
            Self::CloseFan => "close_fan",
            Self::OpenLight => "open_light",
            Self::CloseLight => "close_light",
        }
    }
}

/// Target actuator states for the next snapshot, plus the commands needed
/// to get the device there.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub fan_on: bool,
    pub light_on: bool,
    pub control_mode: ControlMode,
    pub commands: Vec<ActuatorCommand>,
}

pub fn decide(reading: &Reading, prior: Option<&StateSnapshot>) -> Decision {
    let fan_was_on = prior.map(|p| p.fan_on).unwrap_or(false);
    let light_was_on = prior.map(|p| p.light_on).unwrap_or(false);
    let mode = prior.map(|p| p.control_mode).unwrap_or(ControlMode::Auto);

    // Manual mode freezes the actuators: the reading is still persisted for
    // continuous history, but no commands are evaluated.
    if mode == ControlMode::Manual {
        return Decision {
            fan_on: fan_was_on,
            light_on: light_was_on,
            control_mode: ControlMode::Manual,
            commands: Vec::new(),
        };
    }

    let mut fan_on = fan_was_on;
    let mut light_on = light_was_on;
    let mut commands = Vec::new();

    if reading.temperature >= FAN_ON_TEMP && !fan_was_on {
        fan_on = true;
        commands.push(ActuatorCommand::OpenFan);
    } else if reading.temperature <= FAN_OFF_TEMP && fan_was_on {
        fan_on = false;
        commands.push(ActuatorCommand::CloseFan);
    }

    if reading.light_intensity < LIGHT_ON_LUX && !light_was_on {
        light_on = true;
        commands.push(ActuatorCommand::OpenLight);
    } else if reading.light_intensity >= LIGHT_ON_LUX && light_was_on {
        light_on = false;
        commands.push(ActuatorCommand::CloseLight);
    }

    Decision {
        fan_on,
        light_on,
        control_mode: ControlMode::Auto,
        commands,
    }
}
