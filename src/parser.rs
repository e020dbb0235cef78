//! Decodes the raw device wire format into a typed [`Reading`].
//!
//! Devices publish `{device_id;temperature;humidity;light_intensity}` —
//! four semicolon-separated fields wrapped in a pair of braces.

use crate::error::GatewayError;

/// One inbound measurement. Ephemeral: lives only until it produces a
/// snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    pub temperature: f64,
    pub humidity: f64,
    pub light_intensity: f64,
}

pub fn parse(payload: &[u8]) -> Result<Reading, GatewayError> {
    // The braces must be the first and last bytes: devices send the frame
    // without any padding, and padded frames are treated as malformed.
    let text = std::str::from_utf8(payload)
        .map_err(|_| GatewayError::MalformedPayload("payload is not valid UTF-8".into()))?;

    let inner = text
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| {
            GatewayError::MalformedPayload(format!("missing brace delimiters: {text}"))
        })?;

    let parts: Vec<&str> = inner.split(';').collect();
    if parts.len() != 4 {
        return Err(GatewayError::MalformedPayload(format!(
            "expected 4 fields, got {}: {text}",
            parts.len()
        )));
    }

    Ok(Reading {
        device_id: parts[0].to_owned(),
        temperature: parse_finite(parts[1], "temperature")?,
        humidity: parse_finite(parts[2], "humidity")?,
        light_intensity: parse_finite(parts[3], "light_intensity")?,
    })
}

fn parse_finite(field: &str, name: &str) -> Result<f64, GatewayError> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| GatewayError::MalformedPayload(format!("{name} is not a decimal: {field}")))?;
    if !value.is_finite() {
        return Err(GatewayError::MalformedPayload(format!(
            "{name} is not finite: {field}"
        )));
    }
    Ok(value)
}
