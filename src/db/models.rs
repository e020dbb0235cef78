use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Who currently governs a device's actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "control_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Auto,
    Manual,
}

/// One immutable row of the `state_snapshots` table.
///
/// For a given `device_id` the row with the largest `id` is the only
/// authoritative source of current actuator state and control mode. Rows are
/// never mutated or deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StateSnapshot {
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

/// Fields of a snapshot before the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewSnapshot {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub light_intensity: f64,
    pub fan_on: bool,
    pub light_on: bool,
    pub control_mode: ControlMode,
}
