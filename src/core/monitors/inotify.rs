// src/core/monitors/inotify.rs

//! Periodic inotify-watch accounting. Counts file descriptors
//! whose symlink target contains `inotify` across every process, compares
//! against the kernel's `max_user_watches` limit, and publishes a
//! debounced alert to the hub.

use crate::core::metrics::INOTIFY_WATCHES_USED_PCT;
use crate::core::monitors::debounce::{Debouncer, Decision};
use crate::core::{DPlaneError, hub::{Event, Hub, Level}};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const MAX_WATCHES_PATH: &str = "/proc/sys/fs/inotify/max_user_watches";
const WARNING_PCT: f64 = 90.0;
const CRITICAL_PCT: f64 = 95.0;

/// A single tick's worth of inotify watch accounting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InotifyStats {
    pub used: u64,
    pub limit: u64,
    pub percent: f64,
    pub warning: bool,
    pub critical: bool,
}

impl InotifyStats {
    fn compute(used: u64, limit: u64) -> Self {
        let percent = if limit == 0 {
            0.0
        } else {
            (used as f64 / limit as f64) * 100.0
        };
        Self {
            used,
            limit,
            percent,
            warning: percent >= WARNING_PCT,
            critical: percent >= CRITICAL_PCT,
        }
    }
}

/// Reads the kernel limit and counts inotify-backed file descriptors across
/// `/proc/*/fd/*`. Runs on a blocking thread: this is a filesystem walk.
async fn collect_stats() -> Result<InotifyStats, DPlaneError> {
    tokio::task::spawn_blocking(collect_stats_blocking)
        .await
        .map_err(|e| DPlaneError::Internal(format!("inotify accounting task panicked: {e}")))?
}

fn collect_stats_blocking() -> Result<InotifyStats, DPlaneError> {
    let limit: u64 = std::fs::read_to_string(MAX_WATCHES_PATH)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(8192);

    let mut used: u64 = 0;
    if let Ok(proc_entries) = std::fs::read_dir("/proc") {
        for proc_entry in proc_entries.flatten() {
            if !proc_entry.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let fd_dir = proc_entry.path().join("fd");
            let Ok(fd_entries) = std::fs::read_dir(&fd_dir) else {
                continue;
            };
            for fd_entry in fd_entries.flatten() {
                if let Ok(target) = std::fs::read_link(fd_entry.path())
                    && target.to_string_lossy().contains("inotify")
                {
                    used += 1;
                }
            }
        }
    }

    Ok(InotifyStats::compute(used, limit))
}

/// Periodic inotify monitor, debounced against the given hub.
pub struct InotifyMonitor {
    interval: Duration,
    debouncer: Mutex<Debouncer>,
}

impl InotifyMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            debouncer: Mutex::new(Debouncer::new()),
        }
    }

    /// Runs one collection + debounce + publish cycle.
    pub async fn tick(&self, hub: &Hub) {
        let stats = match collect_stats().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "inotify accounting failed this tick");
                return;
            }
        };

        INOTIFY_WATCHES_USED_PCT.set(stats.percent);

        // "info" events bypass debounce: they drive UI refresh, not alerts.
        hub.broadcast(Event::new(
            "inotify_stats",
            Level::Info,
            serde_json::json!({
                "used": stats.used,
                "limit": stats.limit,
                "percent": stats.percent,
            }),
        ))
        .await;

        let now = Instant::now();
        let mut debouncer = self.debouncer.lock().await;
        for (key, breaching) in [("critical", stats.critical), ("warning", stats.warning && !stats.critical)] {
            match debouncer.evaluate("inotify", key, breaching, now) {
                Decision::Fire => {
                    drop_and_fire(hub, key, &stats).await;
                }
                Decision::FireClear => {
                    hub.broadcast(Event::new(
                        "inotify_stats",
                        Level::Clear,
                        serde_json::json!({"level": key, "used": stats.used, "limit": stats.limit}),
                    ))
                    .await;
                }
                Decision::Suppress => {}
            }
        }
    }

    pub async fn run(&self, hub: std::sync::Arc<Hub>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(&hub).await,
                _ = shutdown.recv() => break,
            }
        }
    }
}

async fn drop_and_fire(hub: &Hub, level: &str, stats: &InotifyStats) {
    let hub_level = if level == "critical" { Level::Critical } else { Level::Warning };
    hub.broadcast(Event::new(
        "inotify_stats",
        hub_level,
        serde_json::json!({"level": level, "used": stats.used, "limit": stats.limit, "percent": stats.percent}),
    ))
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_normal_warning_critical() {
        let normal = InotifyStats::compute(100, 8192);
        assert!(!normal.warning && !normal.critical);

        let warn = InotifyStats::compute(7500, 8192);
        assert!(warn.warning && !warn.critical);

        let crit = InotifyStats::compute(7900, 8192);
        assert!(crit.critical);
    }

    #[tokio::test]
    async fn collect_stats_reads_real_proc() {
        let stats = collect_stats().await.unwrap();
        assert!(stats.limit > 0);
    }
}
