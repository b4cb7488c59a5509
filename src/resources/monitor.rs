//! Live system telemetry: on-demand snapshots, a periodic background
//! sampler with rolling statistics, and the critical-pressure safety valve.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Point-in-time reading. Recomputed on every query; never persisted beyond
/// the rolling statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    /// Fraction of total memory in use, 0.0-1.0
    pub memory_used_fraction: f64,
    pub memory_available_bytes: u64,
    /// Fraction of total CPU in use, 0.0-1.0
    pub cpu_used_fraction: f64,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
}

/// Threshold bands, configurable per deployment.
#[derive(Debug, Clone, Copy)]
pub struct PressureThresholds {
    pub memory_warning: f64,
    pub memory_critical: f64,
    pub cpu_warning: f64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            memory_warning: 0.80,
            memory_critical: 0.92,
            cpu_warning: 0.90,
        }
    }
}

/// Something holding reclaimable memory (the cached model). Invoked on
/// critical pressure regardless of what jobs are mid-flight; holders must
/// tolerate losing their resource and re-acquire it on next use.
pub trait Reclaimable: Send + Sync {
    fn reclaim(&self);
}

/// Rolling statistics maintained by the background sampler.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RollingStats {
    pub peak_memory_fraction: f64,
    pub average_cpu_fraction: f64,
    pub samples: u64,
    pub last_level: PressureLevel,
}

impl Default for RollingStats {
    fn default() -> Self {
        Self {
            peak_memory_fraction: 0.0,
            average_cpu_fraction: 0.0,
            samples: 0,
            last_level: PressureLevel::Normal,
        }
    }
}

/// sysinfo returns zero or stale CPU figures when two refreshes land
/// within MINIMUM_CPU_UPDATE_INTERVAL of each other, so the sampler
/// remembers when it last refreshed and reuses the previous reading for
/// anything faster than that.
struct Sampler {
    system: System,
    cpu_refreshed_at: Instant,
}

pub struct ResourceMonitor {
    sampler: Mutex<Sampler>,
    thresholds: PressureThresholds,
    stats: Mutex<RollingStats>,
    reclaimers: Mutex<Vec<Arc<dyn Reclaimable>>>,
    physical_cores: usize,
    total_memory_bytes: u64,
}

impl ResourceMonitor {
    pub fn new(thresholds: PressureThresholds) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();

        let physical_cores = system.physical_core_count().unwrap_or(2);
        let total_memory_bytes = system.total_memory();

        Self {
            sampler: Mutex::new(Sampler {
                system,
                cpu_refreshed_at: Instant::now(),
            }),
            thresholds,
            stats: Mutex::new(RollingStats::default()),
            reclaimers: Mutex::new(Vec::new()),
            physical_cores,
            total_memory_bytes,
        }
    }

    pub fn physical_cores(&self) -> usize {
        self.physical_cores
    }

    pub fn total_memory_bytes(&self) -> u64 {
        self.total_memory_bytes
    }

    /// Register a holder of reclaimable memory for the critical safety valve.
    pub fn register_reclaimer(&self, reclaimer: Arc<dyn Reclaimable>) {
        self.reclaimers
            .lock()
            .expect("reclaimer lock poisoned")
            .push(reclaimer);
    }

    /// Take a fresh reading. Cheap enough to call before every pipeline
    /// decision point (job start, chunk boundaries). Memory refreshes on
    /// every call; CPU only refreshes once the sysinfo minimum interval has
    /// passed, otherwise the last reading is reused.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut sampler = self.sampler.lock().expect("sysinfo lock poisoned");
        sampler.system.refresh_memory();
        if sampler.cpu_refreshed_at.elapsed() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL {
            sampler.system.refresh_cpu_usage();
            sampler.cpu_refreshed_at = Instant::now();
        }

        let total = sampler.system.total_memory().max(1);
        let available = sampler.system.available_memory();

        ResourceSnapshot {
            memory_used_fraction: 1.0 - (available as f64 / total as f64),
            memory_available_bytes: available,
            cpu_used_fraction: f64::from(sampler.system.global_cpu_usage()) / 100.0,
            sampled_at: Utc::now(),
        }
    }

    /// Classify a snapshot against the configured threshold bands.
    pub fn pressure(&self, snapshot: &ResourceSnapshot) -> PressureLevel {
        if snapshot.memory_used_fraction >= self.thresholds.memory_critical {
            PressureLevel::Critical
        } else if snapshot.memory_used_fraction >= self.thresholds.memory_warning
            || snapshot.cpu_used_fraction >= self.thresholds.cpu_warning
        {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    /// Fold a reading into the rolling statistics and fire the emergency
    /// reclamation on critical pressure. Global side effect independent of
    /// any specific job.
    pub fn observe(&self, snapshot: &ResourceSnapshot) -> PressureLevel {
        let level = self.pressure(snapshot);

        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.samples += 1;
            stats.peak_memory_fraction = stats.peak_memory_fraction.max(snapshot.memory_used_fraction);
            let n = stats.samples as f64;
            stats.average_cpu_fraction =
                stats.average_cpu_fraction + (snapshot.cpu_used_fraction - stats.average_cpu_fraction) / n;
            stats.last_level = level;
        }

        match level {
            PressureLevel::Critical => {
                warn!(
                    memory_used = format!("{:.1}%", snapshot.memory_used_fraction * 100.0),
                    "critical memory pressure, triggering emergency reclamation"
                );
                let reclaimers = self.reclaimers.lock().expect("reclaimer lock poisoned");
                for reclaimer in reclaimers.iter() {
                    reclaimer.reclaim();
                }
            }
            PressureLevel::Warning => {
                warn!(
                    memory_used = format!("{:.1}%", snapshot.memory_used_fraction * 100.0),
                    cpu_used = format!("{:.1}%", snapshot.cpu_used_fraction * 100.0),
                    "resource pressure warning"
                );
            }
            PressureLevel::Normal => {
                debug!(
                    memory_used = format!("{:.1}%", snapshot.memory_used_fraction * 100.0),
                    "resource sample"
                );
            }
        }

        level
    }

    pub fn stats(&self) -> RollingStats {
        *self.stats.lock().expect("stats lock poisoned")
    }

    /// Spawn the periodic sampler (~5s cadence in production).
    pub fn spawn_background(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let snapshot = monitor.snapshot();
                monitor.observe(&snapshot);
            }
        })
    }
}
