use thiserror::Error;

/// Failures that can occur while handling a single reading or override.
///
/// All of these are contained to the cycle that produced them; none of them
/// ever terminates the process.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Inbound payload does not match the `{device_id;temp;hum;light}` wire shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The durable store could not be reached for a write.
    #[error("state store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    /// Another writer committed a snapshot for this device between our read
    /// and our append. The caller re-reads and re-decides.
    #[error("concurrent snapshot committed for device {device_id}")]
    SnapshotConflict { device_id: String },

    /// The device has no snapshot history.
    #[error("no snapshot history for device {0}")]
    UnknownDevice(String),
}
