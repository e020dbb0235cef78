//! Live-update fan-out: every committed snapshot is broadcast on a Redis
//! pub/sub channel consumed by the dashboards.
//!
//! Fire-and-forget: a missed update is recovered by the dashboard's next
//! full reload, so publish failures are logged and never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::db::models::StateSnapshot;

#[async_trait]
pub trait LiveNotifier: Send + Sync {
    async fn publish(&self, snapshot: &StateSnapshot) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisNotifier {
    conn: ConnectionManager,
    channel: String,
}

impl RedisNotifier {
    /// Connect to Redis; the connection manager reconnects on its own after
    /// transient outages.
    pub async fn connect(redis_url: &str, channel: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("invalid Redis URL")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to Redis")?;
        Ok(Self {
            conn,
            channel: channel.to_owned(),
        })
    }
}

#[async_trait]
impl LiveNotifier for RedisNotifier {
    async fn publish(&self, snapshot: &StateSnapshot) -> Result<()> {
        let payload = snapshot_payload(snapshot)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(&self.channel, payload)
            .await
            .context("Redis publish failed")?;
        debug!(
            channel = %self.channel,
            snapshot_id = snapshot.id,
            device_id = %snapshot.device_id,
            "Snapshot broadcast on live channel"
        );
        Ok(())
    }
}

/// Serialize a snapshot for the live channel: decimals as plain floats,
/// `created_at` as ISO-8601 text.
pub fn snapshot_payload(snapshot: &StateSnapshot) -> Result<String> {
    serde_json::to_string(snapshot).context("failed to serialize snapshot")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ControlMode;
    use chrono::{TimeZone, Utc};

    #[test]
    fn payload_has_plain_floats_and_iso8601_timestamp() {
        let snapshot = StateSnapshot {
            id: 42,
            device_id: "dev1".into(),
            temperature: 23.5,
            humidity: 60.2,
            light_intensity: 120.0,
            fan_on: true,
            light_on: false,
            control_mode: ControlMode::Manual,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap(),
        };

        let value: serde_json::Value =
            serde_json::from_str(&snapshot_payload(&snapshot).unwrap()).unwrap();

        assert_eq!(value["id"], 42);
        assert_eq!(value["device_id"], "dev1");
        assert_eq!(value["temperature"], 23.5);
        assert_eq!(value["fan_on"], true);
        assert_eq!(value["control_mode"], "manual");
        let ts = value["created_at"].as_str().unwrap();
        assert!(ts.starts_with("2025-06-01T12:30:00"), "not ISO-8601: {ts}");
    }
}
