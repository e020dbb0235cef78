//! Data-quality filter: bounds the single-step delta between consecutive
//! accepted readings for a device.
//!
//! The check itself is pure; updating the last-valid cache after an accept
//! is the caller's responsibility so the filter stays testable in isolation.

use std::fmt;

use crate::parser::Reading;
use crate::reading_cache::LastValidReading;

#[derive(Debug, Clone, Copy)]
pub struct AnomalyLimits {
    /// Max accepted |Δtemperature| in °C
    pub max_temp_delta: f64,
    /// Max accepted |Δhumidity| in %RH
    pub max_humidity_delta: f64,
}

impl Default for AnomalyLimits {
    fn default() -> Self {
        Self {
            max_temp_delta: 10.0,
            max_humidity_delta: 25.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    TemperatureJump { delta: f64, max: f64 },
    HumidityJump { delta: f64, max: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TemperatureJump { delta, max } => {
                write!(f, "temperature jumped {delta:.1}°C (max {max:.1})")
            }
            Self::HumidityJump { delta, max } => {
                write!(f, "humidity jumped {delta:.1}%RH (max {max:.1})")
            }
        }
    }
}

/// Accept or reject a reading against the last accepted values for the
/// device. A device with no baseline (cold start) is always accepted.
pub fn check(
    reading: &Reading,
    last: Option<&LastValidReading>,
    limits: &AnomalyLimits,
) -> Result<(), RejectReason> {
    let Some(last) = last else {
        return Ok(());
    };

    let temp_delta = (reading.temperature - last.temperature).abs();
    if temp_delta > limits.max_temp_delta {
        return Err(RejectReason::TemperatureJump {
            delta: temp_delta,
            max: limits.max_temp_delta,
        });
    }

    let humidity_delta = (reading.humidity - last.humidity).abs();
    if humidity_delta > limits.max_humidity_delta {
        return Err(RejectReason::HumidityJump {
            delta: humidity_delta,
            max: limits.max_humidity_delta,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(temperature: f64, humidity: f64) -> Reading {
        Reading {
            device_id: "dev1".into(),
            temperature,
            humidity,
            light_intensity: 100.0,
        }
    }

    fn last(temperature: f64, humidity: f64) -> LastValidReading {
        LastValidReading {
            temperature,
            humidity,
        }
    }

    #[test]
    fn cold_start_always_accepts() {
        let limits = AnomalyLimits::default();
        assert!(check(&reading(99.0, 99.0), None, &limits).is_ok());
    }

    #[test]
    fn rejects_temperature_jump_beyond_limit() {
        let limits = AnomalyLimits::default();
        let result = check(&reading(40.0, 60.0), Some(&last(25.0, 60.0)), &limits);
        assert!(matches!(result, Err(RejectReason::TemperatureJump { .. })));
    }

    #[test]
    fn accepts_against_original_baseline_after_rejection() {
        // A rejected reading must not move the baseline: 26.0 compares
        // against 25.0, not against the rejected 40.0.
        let limits = AnomalyLimits::default();
        let baseline = last(25.0, 60.0);
        assert!(check(&reading(40.0, 60.0), Some(&baseline), &limits).is_err());
        assert!(check(&reading(26.0, 60.0), Some(&baseline), &limits).is_ok());
    }

    #[test]
    fn rejects_humidity_jump_beyond_limit() {
        let limits = AnomalyLimits::default();
        let result = check(&reading(25.0, 90.0), Some(&last(25.0, 60.0)), &limits);
        assert!(matches!(result, Err(RejectReason::HumidityJump { .. })));
    }

    #[test]
    fn delta_exactly_at_limit_is_accepted() {
        let limits = AnomalyLimits::default();
        assert!(check(&reading(35.0, 60.0), Some(&last(25.0, 60.0)), &limits).is_ok());
        assert!(check(&reading(25.0, 85.0), Some(&last(25.0, 60.0)), &limits).is_ok());
    }

    #[test]
    fn drops_are_bounded_too() {
        let limits = AnomalyLimits::default();
        let result = check(&reading(10.0, 60.0), Some(&last(25.0, 60.0)), &limits);
        assert!(matches!(result, Err(RejectReason::TemperatureJump { .. })));
    }
}
