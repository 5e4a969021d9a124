// src/core/monitors/capacity.rs

//! Periodic pool-free-space check with reserve enforcement.
//! Shares the [`Debouncer`] built for the inotify monitor so
//! crossing a threshold repeatedly doesn't flood the hub.

use crate::core::DPlaneError;
use crate::core::audit::{AuditEvent, AuditLogger};
use crate::core::exec::{CommandExecutor, ExecClass, whitelist};
use crate::core::hub::{Event, Hub, Level};
use crate::core::metrics::POOL_CAPACITY_USED_PCT;
use crate::core::monitors::debounce::{Debouncer, Decision};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Free-space reading for one pool, as parsed from `zpool list`.
#[derive(Debug, Clone, Copy)]
pub struct CapacityReading {
    pub used_pct: f64,
}

/// A reservation dataset name that can be released to free emergency space,
/// e.g. `tank/reserve`. Releasing it (`zfs set reservation=0`) buys writes
/// during a near-full emergency without requiring user action.
#[derive(Debug, Clone)]
pub struct ReservationDataset {
    pub dataset: String,
}

pub struct CapacityGuardian {
    pools: Vec<String>,
    warning_pct: f64,
    critical_pct: f64,
    reservation: Option<ReservationDataset>,
    debouncer: Mutex<Debouncer>,
}

impl CapacityGuardian {
    pub fn new(pools: Vec<String>, warning_pct: f64, critical_pct: f64, reservation: Option<ReservationDataset>) -> Self {
        Self {
            pools,
            warning_pct,
            critical_pct,
            reservation,
            debouncer: Mutex::new(Debouncer::new()),
        }
    }

    async fn read_pool(exec: &CommandExecutor, pool: &str) -> Result<CapacityReading, DPlaneError> {
        whitelist::check(whitelist::Kind::PoolName, pool)?;
        let out = exec
            .run(ExecClass::Fast, "zpool", &["list", "-Hp", "-o", "capacity", pool])
            .await?;
        let pct: f64 = out
            .combined_output
            .trim()
            .trim_end_matches('%')
            .parse()
            .map_err(|_| DPlaneError::DependencyUnavailable(format!("unparseable zpool list output for '{pool}'")))?;
        Ok(CapacityReading { used_pct: pct })
    }

    /// Releases the configured reservation dataset, if any, to free emergency
    /// write headroom. Best-effort: failures are logged, not propagated,
    /// since the caller is already reacting to a critical condition.
    async fn release_reservation(&self, exec: &CommandExecutor) {
        let Some(reservation) = &self.reservation else {
            return;
        };
        if whitelist::check(whitelist::Kind::DatasetName, &reservation.dataset).is_err() {
            warn!(dataset = %reservation.dataset, "reservation dataset name failed whitelist, not releasing");
            return;
        }
        match exec
            .run(
                ExecClass::Medium,
                "zfs",
                &["set", "reservation=0", &reservation.dataset],
            )
            .await
        {
            Ok(out) if out.success() => {
                tracing::info!(dataset = %reservation.dataset, "released capacity reservation");
            }
            Ok(out) => warn!(output = %out.combined_output, "releasing reservation returned non-zero"),
            Err(e) => warn!(error = %e, "releasing reservation failed"),
        }
    }

    pub async fn tick(&self, exec: &CommandExecutor, hub: &Hub, audit: &AuditLogger) {
        let now = Instant::now();
        for pool in &self.pools {
            let reading = match Self::read_pool(exec, pool).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(pool, error = %e, "capacity guardian read failed this tick");
                    continue;
                }
            };
            POOL_CAPACITY_USED_PCT.with_label_values(&[pool]).set(reading.used_pct);

            let critical = reading.used_pct >= self.critical_pct;
            let warning = reading.used_pct >= self.warning_pct && !critical;

            let mut debouncer = self.debouncer.lock().await;
            for (key, breaching) in [("critical", critical), ("warning", warning)] {
                match debouncer.evaluate(&format!("capacity:{pool}"), key, breaching, now) {
                    Decision::Fire => {
                        let level = if key == "critical" { Level::Critical } else { Level::Warning };
                        hub.broadcast(Event::new(
                            "capacity",
                            level,
                            serde_json::json!({"pool": pool, "used_pct": reading.used_pct, "level": key}),
                        ))
                        .await;
                        audit
                            .log(
                                AuditEvent::new("system", "capacity_threshold_crossed", pool, "internal", true)
                                    .with_details(format!("{key} at {:.1}%", reading.used_pct)),
                            )
                            .await;
                        if key == "critical" {
                            drop(debouncer);
                            self.release_reservation(exec).await;
                            debouncer = self.debouncer.lock().await;
                        }
                    }
                    Decision::FireClear => {
                        hub.broadcast(Event::new(
                            "capacity",
                            Level::Clear,
                            serde_json::json!({"pool": pool, "used_pct": reading.used_pct, "level": key}),
                        ))
                        .await;
                    }
                    Decision::Suppress => {}
                }
            }
        }
    }

    pub async fn run(
        self: Arc<Self>,
        exec: CommandExecutor,
        hub: Arc<Hub>,
        audit: Arc<AuditLogger>,
        interval: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&exec, &hub, &audit).await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_dataset_failing_whitelist_is_not_fatal() {
        let bad = ReservationDataset { dataset: "tank; rm -rf /".into() };
        assert!(whitelist::check(whitelist::Kind::DatasetName, &bad.dataset).is_err());
    }
}
