//! Periodic resource sampling: memory, database and backup sizes, pool load.

use chrono::Local;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use utoipa::ToSchema;

use crate::db::ConnectionPool;
use crate::db::pool::PoolStats;
use crate::utils::thread_manager::ThreadManager;

const POOL_UTILIZATION_WARN: f64 = 0.8;
const MEMORY_WARN_BYTES: u64 = 1 << 30;
const BACKUP_DIR_WARN_BYTES: u64 = 5 << 30;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResourceSample {
    pub timestamp: String,
    /// Resident set size; only known on Linux.
    pub memory_bytes: Option<u64>,
    pub db_size_bytes: u64,
    pub backup_dir_bytes: u64,
    #[schema(value_type = Object)]
    pub pool: PoolStats,
    pub pool_utilization: f64,
    pub warnings: Vec<String>,
}

#[cfg(target_os = "linux")]
fn resident_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory() -> Option<u64> {
    None
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn dir_size(path: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() => dir_size(&entry.path()),
            Ok(_) => entry.metadata().map(|m| m.len()).unwrap_or(0),
            Err(_) => 0,
        })
        .sum()
}

pub struct ResourceMonitor {
    pool: Arc<ConnectionPool>,
    db_path: PathBuf,
    backup_dir: PathBuf,
    log_dir: PathBuf,
    latest: Mutex<Option<ResourceSample>>,
}

impl ResourceMonitor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        db_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            log_dir: log_dir.into(),
            latest: Mutex::new(None),
        }
    }

    pub fn sample(&self) -> ResourceSample {
        let pool = self.pool.stats();
        let pool_utilization = if pool.max_size == 0 {
            0.0
        } else {
            pool.active as f64 / pool.max_size as f64
        };
        let memory_bytes = resident_memory();
        let backup_dir_bytes = dir_size(&self.backup_dir);

        let mut warnings = Vec::new();
        if pool_utilization >= POOL_UTILIZATION_WARN {
            warnings.push(format!(
                "pool utilisation {:.0}% ({}/{})",
                pool_utilization * 100.0,
                pool.active,
                pool.max_size
            ));
        }
        if memory_bytes.is_some_and(|m| m >= MEMORY_WARN_BYTES) {
            warnings.push(format!("resident memory {} MiB", memory_bytes.unwrap_or(0) >> 20));
        }
        if backup_dir_bytes >= BACKUP_DIR_WARN_BYTES {
            warnings.push(format!("backup directory {} MiB", backup_dir_bytes >> 20));
        }

        let sample = ResourceSample {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            memory_bytes,
            db_size_bytes: file_size(&self.db_path),
            backup_dir_bytes,
            pool,
            pool_utilization,
            warnings,
        };
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(sample.clone());
        sample
    }

    /// Most recent sample taken by [`sample`](Self::sample), if any.
    pub fn latest(&self) -> Option<ResourceSample> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, writer: &Mutex<RollingFileAppender>) -> anyhow::Result<()> {
        let sample = self.sample();
        info!(
            memory_bytes = ?sample.memory_bytes,
            db_size_bytes = sample.db_size_bytes,
            backup_dir_bytes = sample.backup_dir_bytes,
            pool_active = sample.pool.active,
            pool_size = sample.pool.size,
            "Resource sample"
        );
        for warning in &sample.warnings {
            warn!(warning = %warning, "Resource threshold exceeded");
        }

        let line = serde_json::to_string(&sample)?;
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        Ok(())
    }

    /// Samples every `interval` on `manager`'s thread, appending each sample
    /// as a JSON line to the daily `resource.<date>.log`.
    pub fn start(self: &Arc<Self>, manager: &ThreadManager, interval: Duration) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.log_dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("resource")
            .filename_suffix("log")
            .build(&self.log_dir)?;
        let writer = Arc::new(Mutex::new(appender));

        manager.register_resource("resource log", writer.clone(), |writer| {
            writer.lock().unwrap_or_else(PoisonError::into_inner).flush()?;
            Ok(())
        });

        let monitor = Arc::clone(self);
        manager.start(move |signal| {
            loop {
                if let Err(e) = monitor.record(&writer) {
                    warn!(error = %e, "Failed to record resource sample");
                }
                if signal.wait(interval) {
                    break;
                }
            }
            Ok(())
        })?;
        Ok(())
    }
}
