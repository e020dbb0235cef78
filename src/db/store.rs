use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::{NewSnapshot, StateSnapshot};
use crate::error::GatewayError;

/// Durable, append-only snapshot history. The store is the sole arbiter of
/// actuator truth: every decision re-reads `latest` immediately before acting.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent snapshot for a device, `None` if the device has never
    /// produced one.
    async fn latest(&self, device_id: &str) -> Result<Option<StateSnapshot>, GatewayError>;

    /// Append a snapshot, assigning `id` and `created_at`.
    ///
    /// `prior_id` is the id the caller observed from `latest` (or `None` for
    /// a new device). The append commits only if that is still the device's
    /// newest row; otherwise `SnapshotConflict` is returned and the caller
    /// must re-read and re-decide.
    async fn append(
        &self,
        new: NewSnapshot,
        prior_id: Option<i64>,
    ) -> Result<StateSnapshot, GatewayError>;

    /// Newest snapshot of every known device, for the dashboard.
    async fn latest_per_device(&self) -> Result<Vec<StateSnapshot>, GatewayError>;

    /// Most recent `limit` snapshots for one device, newest first.
    async fn history(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StateSnapshot>, GatewayError>;
}

#[derive(Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn latest(&self, device_id: &str) -> Result<Option<StateSnapshot>, GatewayError> {
        sqlx::query_as::<_, StateSnapshot>(
            r#"
            SELECT id, device_id, temperature, humidity, light_intensity,
                   fan_on, light_on, control_mode, created_at
            FROM state_snapshots
            WHERE device_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(GatewayError::StoreUnavailable)
    }

    async fn append(
        &self,
        new: NewSnapshot,
        prior_id: Option<i64>,
    ) -> Result<StateSnapshot, GatewayError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(GatewayError::StoreUnavailable)?;

        // Serialize writers per device for the duration of the transaction.
        // Under READ COMMITTED, two appends carrying the same prior id could
        // otherwise both evaluate the MAX(id) check before either commits
        // and both insert.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(&new.device_id)
            .execute(&mut *tx)
            .await
            .map_err(GatewayError::StoreUnavailable)?;

        // Conditional insert: commits only while `prior_id` is still the
        // device's max id. A concurrent writer makes the WHERE clause false
        // and the insert returns no row.
        let inserted = sqlx::query_as::<_, StateSnapshot>(
            r#"
            INSERT INTO state_snapshots
                (device_id, temperature, humidity, light_intensity,
                 fan_on, light_on, control_mode)
            SELECT $1, $2, $3, $4, $5, $6, $7
            WHERE (SELECT MAX(id) FROM state_snapshots WHERE device_id = $1)
                  IS NOT DISTINCT FROM $8
            RETURNING id, device_id, temperature, humidity, light_intensity,
                      fan_on, light_on, control_mode, created_at
            "#,
        )
        .bind(&new.device_id)
        .bind(round_to(new.temperature, 2))
        .bind(round_to(new.humidity, 1))
        .bind(round_to(new.light_intensity, 1))
        .bind(new.fan_on)
        .bind(new.light_on)
        .bind(new.control_mode)
        .bind(prior_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(GatewayError::StoreUnavailable)?;

        tx.commit().await.map_err(GatewayError::StoreUnavailable)?;

        inserted.ok_or(GatewayError::SnapshotConflict {
            device_id: new.device_id,
        })
    }

    async fn latest_per_device(&self) -> Result<Vec<StateSnapshot>, GatewayError> {
        sqlx::query_as::<_, StateSnapshot>(
            r#"
            SELECT DISTINCT ON (device_id)
                   id, device_id, temperature, humidity, light_intensity,
                   fan_on, light_on, control_mode, created_at
            FROM state_snapshots
            ORDER BY device_id, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::StoreUnavailable)
    }

    async fn history(
        &self,
        device_id: &str,
        limit: i64,
    ) -> Result<Vec<StateSnapshot>, GatewayError> {
        sqlx::query_as::<_, StateSnapshot>(
            r#"
            SELECT id, device_id, temperature, humidity, light_intensity,
                   fan_on, light_on, control_mode, created_at
            FROM state_snapshots
            WHERE device_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(GatewayError::StoreUnavailable)
    }
}

/// Round to `decimals` places, mirroring the fixed-point persisted shape
/// (temperature 2 decimals, humidity and light 1 decimal).
fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
