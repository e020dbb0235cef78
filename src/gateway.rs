//! The message-driven decision and state-reconciliation engine.
//!
//! Both entry points — inbound readings from the bus and operator overrides
//! from the web layer — funnel through the same read-decide-append path.
//! The persisted snapshot history is the only source of actuator truth: the
//! latest snapshot is re-read immediately before every decision, and the
//! append carries the observed prior id as an optimistic-concurrency token
//! so a concurrent writer forces a re-read instead of a silent overwrite.

use std::sync::Arc;

use tracing::warn;

use crate::anomaly::{self, AnomalyLimits};
use crate::control::{self, ActuatorCommand};
use crate::db::models::{ControlMode, NewSnapshot, StateSnapshot};
use crate::db::store::SnapshotStore;
use crate::error::GatewayError;
use crate::mqtt::CommandSink;
use crate::notify::LiveNotifier;
use crate::parser;
use crate::reading_cache::{LastValidReading, ValidReadingCache};

/// Bounded retries of the read-decide-append cycle on write conflict.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Outcome of one inbound message cycle.
#[derive(Debug)]
pub enum Ingest {
    Committed(StateSnapshot),
    /// Dropped by the anomaly filter; nothing reached the store or the bus.
    Rejected,
}

pub struct GatewayService {
    store: Arc<dyn SnapshotStore>,
    commands: Arc<dyn CommandSink>,
    notifier: Arc<dyn LiveNotifier>,
    cache: ValidReadingCache,
    limits: AnomalyLimits,
}

impl GatewayService {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        commands: Arc<dyn CommandSink>,
        notifier: Arc<dyn LiveNotifier>,
        cache: ValidReadingCache,
        limits: AnomalyLimits,
    ) -> Self {
        Self {
            store,
            commands,
            notifier,
            cache,
            limits,
        }
    }

    /// Handle one raw inbound payload: parse, filter, reconcile against the
    /// latest persisted state, run the control policy, dispatch commands and
    /// commit a new snapshot.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<Ingest, GatewayError> {
        let reading = parser::parse(payload)?;

        let last = self.cache.get(&reading.device_id).await;
        if let Err(reason) = anomaly::check(&reading, last.as_ref(), &self.limits) {
            warn!(
                device_id = %reading.device_id,
                reason = %reason,
                "Reading rejected by anomaly filter"
            );
            return Ok(Ingest::Rejected);
        }
        // Exactly once per accepted reading; a rejection above never moves
        // the baseline.
        self.cache
            .update(
                &reading.device_id,
                LastValidReading {
                    temperature: reading.temperature,
                    humidity: reading.humidity,
                },
            )
            .await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let prior = self.latest_or_unknown(&reading.device_id).await;
            let decision = control::decide(&reading, prior.as_ref());
            self.dispatch_all(&reading.device_id, &decision.commands)
                .await;

            let new = NewSnapshot {
                device_id: reading.device_id.clone(),
                temperature: reading.temperature,
                humidity: reading.humidity,
                light_intensity: reading.light_intensity,
                fan_on: decision.fan_on,
                light_on: decision.light_on,
                control_mode: decision.control_mode,
            };
            match self.store.append(new, prior.as_ref().map(|p| p.id)).await {
                Ok(snapshot) => {
                    self.notify(&snapshot).await;
                    return Ok(Ingest::Committed(snapshot));
                }
                Err(GatewayError::SnapshotConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(
                        device_id = %reading.device_id,
                        attempt,
                        "Concurrent snapshot committed, re-reading"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Operator override: force one or both actuators and switch the device
    /// to manual mode. The actuator command goes out before the snapshot is
    /// committed; a crash in between leaves the device commanded and the
    /// store one step behind, which the next telemetry cycle reconciles.
    pub async fn override_actuators(
        &self,
        device_id: &str,
        fan_on: Option<bool>,
        light_on: Option<bool>,
    ) -> Result<StateSnapshot, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let prior = self.latest_or_unknown(device_id).await;

            // A device with no history gets a zero-valued sensor baseline.
            let (temperature, humidity, light_intensity, prior_fan, prior_light) = match &prior {
                Some(p) => (
                    p.temperature,
                    p.humidity,
                    p.light_intensity,
                    p.fan_on,
                    p.light_on,
                ),
                None => (0.0, 0.0, 0.0, false, false),
            };

            let mut issued = Vec::new();
            if let Some(on) = fan_on {
                issued.push(if on {
                    ActuatorCommand::OpenFan
                } else {
                    ActuatorCommand::CloseFan
                });
            }
            if let Some(on) = light_on {
                issued.push(if on {
                    ActuatorCommand::OpenLight
                } else {
                    ActuatorCommand::CloseLight
                });
            }
            self.dispatch_all(device_id, &issued).await;

            let new = NewSnapshot {
                device_id: device_id.to_owned(),
                temperature,
                humidity,
                light_intensity,
                fan_on: fan_on.unwrap_or(prior_fan),
                light_on: light_on.unwrap_or(prior_light),
                control_mode: ControlMode::Manual,
            };
            match self.store.append(new, prior.as_ref().map(|p| p.id)).await {
                Ok(snapshot) => {
                    self.notify(&snapshot).await;
                    return Ok(snapshot);
                }
                Err(GatewayError::SnapshotConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(device_id = %device_id, attempt, "Override raced a writer, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Hand the device back to the control policy: carries everything
    /// forward unchanged except `control_mode = auto`. The policy itself is
    /// not re-run here; the next inbound reading is free to act.
    pub async fn resume_auto(&self, device_id: &str) -> Result<StateSnapshot, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let prior = self
                .store
                .latest(device_id)
                .await?
                .ok_or_else(|| GatewayError::UnknownDevice(device_id.to_owned()))?;

            let new = NewSnapshot {
                device_id: device_id.to_owned(),
                temperature: prior.temperature,
                humidity: prior.humidity,
                light_intensity: prior.light_intensity,
                fan_on: prior.fan_on,
                light_on: prior.light_on,
                control_mode: ControlMode::Auto,
            };
            match self.store.append(new, Some(prior.id)).await {
                Ok(snapshot) => {
                    self.notify(&snapshot).await;
                    return Ok(snapshot);
                }
                Err(GatewayError::SnapshotConflict { .. }) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(device_id = %device_id, attempt, "Auto-resume raced a writer, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A failed read degrades to "device unknown" rather than aborting the
    /// cycle: the device is treated as new (actuators off, auto mode). This
    /// is a documented risk of the design, not an oversight.
    async fn latest_or_unknown(&self, device_id: &str) -> Option<StateSnapshot> {
        match self.store.latest(device_id).await {
            Ok(prior) => prior,
            Err(e) => {
                warn!(
                    device_id = %device_id,
                    error = %e,
                    "Store read failed, treating device as new"
                );
                None
            }
        }
    }

    /// Publish commands best-effort: a failed publish is logged and the
    /// cycle continues, because the snapshot records the decision, not
    /// confirmed device compliance.
    async fn dispatch_all(&self, device_id: &str, commands: &[ActuatorCommand]) {
        for &command in commands {
            if let Err(e) = self.commands.publish(device_id, command).await {
                warn!(
                    device_id = %device_id,
                    command = command.as_str(),
                    error = %e,
                    "Command publish failed, state will still be committed"
                );
            }
        }
    }

    async fn notify(&self, snapshot: &StateSnapshot) {
        if let Err(e) = self.notifier.publish(snapshot).await {
            warn!(
                device_id = %snapshot.device_id,
                snapshot_id = snapshot.id,
                error = %e,
                "Live notification failed, dashboards will catch up on reload"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct FakeStore {
        rows: Mutex<Vec<StateSnapshot>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        conflict_once: AtomicBool,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                fail_reads: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                conflict_once: AtomicBool::new(false),
            }
        }

        fn seed(&self, new: NewSnapshot) {
            let mut rows = self.rows.lock().unwrap();
            let id = rows.len() as i64 + 1;
            rows.push(StateSnapshot {
                id,
                device_id: new.device_id,
                temperature: new.temperature,
                humidity: new.humidity,
                light_intensity: new.light_intensity,
                fan_on: new.fan_on,
                light_on: new.light_on,
                control_mode: new.control_mode,
                created_at: Utc::now(),
            });
        }

        fn max_id(&self, rows: &[StateSnapshot], device_id: &str) -> Option<i64> {
            rows.iter()
                .filter(|r| r.device_id == device_id)
                .map(|r| r.id)
                .max()
        }
    }

    #[async_trait]
    impl SnapshotStore for FakeStore {
        async fn latest(&self, device_id: &str) -> Result<Option<StateSnapshot>, GatewayError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(GatewayError::StoreUnavailable(sqlx::Error::PoolTimedOut));
            }
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|r| r.device_id == device_id)
                .max_by_key(|r| r.id)
                .cloned())
        }

        async fn append(
            &self,
            new: NewSnapshot,
            prior_id: Option<i64>,
        ) -> Result<StateSnapshot, GatewayError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(GatewayError::StoreUnavailable(sqlx::Error::PoolTimedOut));
            }
            if self.conflict_once.swap(false, Ordering::SeqCst) {
                return Err(GatewayError::SnapshotConflict {
                    device_id: new.device_id,
                });
            }
            let mut rows = self.rows.lock().unwrap();
            if self.max_id(&rows, &new.device_id) != prior_id {
                return Err(GatewayError::SnapshotConflict {
                    device_id: new.device_id,
                });
            }
            let id = rows.len() as i64 + 1;
            let snapshot = StateSnapshot {
                id,
                device_id: new.device_id,
                temperature: new.temperature,
                humidity: new.humidity,
                light_intensity: new.light_intensity,
                fan_on: new.fan_on,
                light_on: new.light_on,
                control_mode: new.control_mode,
                created_at: Utc::now(),
            };
            rows.push(snapshot.clone());
            Ok(snapshot)
        }

        async fn latest_per_device(&self) -> Result<Vec<StateSnapshot>, GatewayError> {
            unimplemented!("not exercised by gateway tests")
        }

        async fn history(
            &self,
            _device_id: &str,
            _limit: i64,
        ) -> Result<Vec<StateSnapshot>, GatewayError> {
            unimplemented!("not exercised by gateway tests")
        }
    }

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<(String, ActuatorCommand)>>,
    }

    #[async_trait]
    impl CommandSink for FakeSink {
        async fn publish(&self, device_id: &str, command: ActuatorCommand) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((device_id.to_owned(), command));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        published: Mutex<Vec<StateSnapshot>>,
    }

    #[async_trait]
    impl LiveNotifier for FakeNotifier {
        async fn publish(&self, snapshot: &StateSnapshot) -> Result<()> {
            self.published.lock().unwrap().push(snapshot.clone());
            Ok(())
        }
    }

    fn service() -> (
        GatewayService,
        Arc<FakeStore>,
        Arc<FakeSink>,
        Arc<FakeNotifier>,
    ) {
        let store = Arc::new(FakeStore::new());
        let sink = Arc::new(FakeSink::default());
        let notifier = Arc::new(FakeNotifier::default());
        let gateway = GatewayService::new(
            store.clone(),
            sink.clone(),
            notifier.clone(),
            ValidReadingCache::new(),
            AnomalyLimits::default(),
        );
        (gateway, store, sink, notifier)
    }

    fn auto_snapshot(device_id: &str, fan_on: bool, light_on: bool) -> NewSnapshot {
        NewSnapshot {
            device_id: device_id.to_owned(),
            temperature: 25.0,
            humidity: 60.0,
            light_intensity: 100.0,
            fan_on,
            light_on,
            control_mode: ControlMode::Auto,
        }
    }

    #[tokio::test]
    async fn cold_start_reading_commits_and_commands() {
        let (gateway, store, sink, notifier) = service();

        let outcome = gateway
            .handle_payload(b"{dev1;31.0;50.0;100.0}")
            .await
            .unwrap();

        let Ingest::Committed(snapshot) = outcome else {
            panic!("expected commit");
        };
        assert!(snapshot.fan_on);
        assert!(!snapshot.light_on);
        assert_eq!(snapshot.control_mode, ControlMode::Auto);
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::OpenFan)]
        );
        assert_eq!(notifier.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn manual_mode_freezes_actuators_but_persists_reading() {
        let (gateway, store, sink, notifier) = service();
        store.seed(NewSnapshot {
            control_mode: ControlMode::Manual,
            light_on: true,
            ..auto_snapshot("dev1", false, true)
        });

        let outcome = gateway
            .handle_payload(b"{dev1;35.0;55.0;10.0}")
            .await
            .unwrap();

        let Ingest::Committed(snapshot) = outcome else {
            panic!("expected commit");
        };
        assert!(sink.sent.lock().unwrap().is_empty(), "no commands in manual");
        assert_eq!(snapshot.control_mode, ControlMode::Manual);
        assert!(!snapshot.fan_on);
        assert!(snapshot.light_on);
        assert_eq!(snapshot.temperature, 35.0);
        assert_eq!(store.rows.lock().unwrap().len(), 2);
        assert_eq!(notifier.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn anomalous_reading_is_dropped_without_moving_baseline() {
        let (gateway, store, _sink, notifier) = service();

        let first = gateway
            .handle_payload(b"{dev1;25.0;60.0;100.0}")
            .await
            .unwrap();
        assert!(matches!(first, Ingest::Committed(_)));

        // Delta 15 > 10: rejected, nothing stored or broadcast.
        let second = gateway
            .handle_payload(b"{dev1;40.0;60.0;100.0}")
            .await
            .unwrap();
        assert!(matches!(second, Ingest::Rejected));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert_eq!(notifier.published.lock().unwrap().len(), 1);

        // 26.0 compares against the original 25.0 baseline, not the
        // rejected 40.0, and is accepted.
        let third = gateway
            .handle_payload(b"{dev1;26.0;60.0;100.0}")
            .await
            .unwrap();
        assert!(matches!(third, Ingest::Committed(_)));
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error_with_no_side_effects() {
        let (gateway, store, sink, notifier) = service();

        let result = gateway.handle_payload(b"dev1;31.0;50.0").await;
        assert!(matches!(result, Err(GatewayError::MalformedPayload(_))));
        assert!(store.rows.lock().unwrap().is_empty());
        assert!(sink.sent.lock().unwrap().is_empty());
        assert!(notifier.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn override_commands_device_before_commit() {
        let (gateway, store, sink, notifier) = service();

        let snapshot = gateway
            .override_actuators("dev1", Some(true), None)
            .await
            .unwrap();

        assert!(snapshot.fan_on);
        assert!(!snapshot.light_on);
        assert_eq!(snapshot.control_mode, ControlMode::Manual);
        // No history: zero-valued sensor baseline.
        assert_eq!(snapshot.temperature, 0.0);
        assert_eq!(snapshot.humidity, 0.0);
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::OpenFan)]
        );
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert_eq!(notifier.published.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn override_carries_forward_the_untouched_actuator() {
        let (gateway, store, sink, _notifier) = service();
        store.seed(auto_snapshot("dev1", false, true));

        let snapshot = gateway
            .override_actuators("dev1", Some(true), None)
            .await
            .unwrap();

        assert!(snapshot.fan_on);
        assert!(snapshot.light_on, "light untouched by the override");
        assert_eq!(snapshot.temperature, 25.0, "sensors carried forward");
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::OpenFan)]
        );
    }

    #[tokio::test]
    async fn resume_auto_keeps_actuators_and_flips_mode() {
        let (gateway, store, sink, _notifier) = service();
        store.seed(NewSnapshot {
            control_mode: ControlMode::Manual,
            fan_on: true,
            ..auto_snapshot("dev1", true, false)
        });

        let snapshot = gateway.resume_auto("dev1").await.unwrap();

        assert_eq!(snapshot.control_mode, ControlMode::Auto);
        assert!(snapshot.fan_on, "actuators unchanged by resume");
        assert!(sink.sent.lock().unwrap().is_empty());

        // The next qualifying reading is then free to act again.
        let outcome = gateway
            .handle_payload(b"{dev1;24.0;60.0;100.0}")
            .await
            .unwrap();
        let Ingest::Committed(next) = outcome else {
            panic!("expected commit");
        };
        assert!(!next.fan_on);
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::CloseFan)]
        );
    }

    #[tokio::test]
    async fn resume_auto_for_unknown_device_fails() {
        let (gateway, ..) = service();
        let result = gateway.resume_auto("ghost").await;
        assert!(matches!(result, Err(GatewayError::UnknownDevice(_))));
    }

    #[tokio::test]
    async fn append_failure_aborts_cycle_and_skips_notification() {
        let (gateway, store, _sink, notifier) = service();
        store.fail_writes.store(true, Ordering::SeqCst);

        let result = gateway.handle_payload(b"{dev1;31.0;50.0;100.0}").await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
        assert!(notifier.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_failure_degrades_fresh_device_to_cold_start() {
        let (gateway, store, sink, _notifier) = service();
        store.fail_reads.store(true, Ordering::SeqCst);

        // No history: the degraded read and the real state agree, so the
        // cycle commits as a brand-new device.
        let outcome = gateway
            .handle_payload(b"{dev1;31.0;50.0;100.0}")
            .await
            .unwrap();
        let Ingest::Committed(snapshot) = outcome else {
            panic!("expected commit");
        };
        assert!(snapshot.fan_on);
        assert_eq!(snapshot.control_mode, ControlMode::Auto);
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::OpenFan)]
        );
    }

    #[tokio::test]
    async fn read_failure_with_history_cannot_overwrite_it() {
        let (gateway, store, _sink, notifier) = service();
        store.seed(NewSnapshot {
            control_mode: ControlMode::Manual,
            fan_on: true,
            ..auto_snapshot("dev1", true, false)
        });
        store.fail_reads.store(true, Ordering::SeqCst);

        // The degraded read claims "new device", but the conditional append
        // refuses to commit over existing history: retries exhaust instead
        // of a stale auto decision clobbering the manual snapshot.
        let result = gateway.handle_payload(b"{dev1;31.0;50.0;100.0}").await;
        assert!(matches!(result, Err(GatewayError::SnapshotConflict { .. })));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert!(notifier.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn override_publishes_command_even_when_commit_fails() {
        let (gateway, store, sink, notifier) = service();
        store.fail_writes.store(true, Ordering::SeqCst);

        // Command goes out before the commit is attempted: a crash (or a
        // store outage) between the two leaves the device commanded and the
        // store one step behind.
        let result = gateway.override_actuators("dev1", Some(true), None).await;
        assert!(matches!(result, Err(GatewayError::StoreUnavailable(_))));
        assert_eq!(
            *sink.sent.lock().unwrap(),
            vec![("dev1".to_owned(), ActuatorCommand::OpenFan)]
        );
        assert!(store.rows.lock().unwrap().is_empty());
        assert!(notifier.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_conflict_triggers_reread_and_commits() {
        let (gateway, store, sink, _notifier) = service();
        store.conflict_once.store(true, Ordering::SeqCst);

        let outcome = gateway
            .handle_payload(b"{dev1;31.0;50.0;100.0}")
            .await
            .unwrap();
        assert!(matches!(outcome, Ingest::Committed(_)));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        // The retry re-decides and re-dispatches; duplicates are acceptable
        // under at-least-once delivery.
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }
}
