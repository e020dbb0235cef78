use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::{ControlMode, StateSnapshot};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SnapshotDto {
    pub id: i64,
    pub device_id: String,
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity percentage
    pub humidity: f64,
    /// Lux-equivalent
    pub light_intensity: f64,
    pub fan_on: bool,
    pub light_on: bool,
    pub control_mode: ControlMode,
    pub created_at: DateTime<Utc>,
}

impl From<StateSnapshot> for SnapshotDto {
    fn from(s: StateSnapshot) -> Self {
        Self {
            id: s.id,
            device_id: s.device_id,
            temperature: s.temperature,
            humidity: s.humidity,
            light_intensity: s.light_intensity,
            fan_on: s.fan_on,
            light_on: s.light_on,
            control_mode: s.control_mode,
            created_at: s.created_at,
        }
    }
}

/// Manual override request. At least one actuator must be given; omitted
/// actuators keep their current state.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OverrideRequest {
    pub fan_on: Option<bool>,
    pub light_on: Option<bool>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    /// Number of snapshots to return, newest first
    pub limit: Option<i64>,
}
