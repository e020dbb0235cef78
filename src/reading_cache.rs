use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

/// Last anomaly-filter-accepted (temperature, humidity) pair for a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastValidReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// In-memory baseline of the last accepted reading per device, used only by
/// the anomaly filter to bound single-step deltas.
///
/// Not durable: the map is empty after a restart, so the first reading per
/// device is always accepted and establishes a fresh baseline. Wrapped in
/// `Arc` so it can be cheaply cloned and shared across tasks.
#[derive(Clone, Default)]
pub struct ValidReadingCache {
    inner: Arc<RwLock<HashMap<String, LastValidReading>>>,
}

impl ValidReadingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the baseline for `device_id`. Called exactly once per
    /// accepted reading, never on rejection.
    pub async fn update(&self, device_id: &str, last: LastValidReading) {
        self.inner.write().await.insert(device_id.to_owned(), last);
    }

    pub async fn get(&self, device_id: &str) -> Option<LastValidReading> {
        self.inner.read().await.get(device_id).copied()
    }
}
