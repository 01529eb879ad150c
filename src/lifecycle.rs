//! Shared application state, background task startup and orderly shutdown.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::config::Config;
use crate::db::pool::PoolStats;
use crate::db::{self, ConnectionPool, PoolConfig};
use crate::error::HrResult;
use crate::services::salary::SalaryService;
use crate::utils::backup_service::BackupService;
use crate::utils::employee_cache::EmployeeCache;
use crate::utils::resource_monitor::{ResourceMonitor, ResourceSample};
use crate::utils::thread_manager::ThreadRegistry;

pub const AUTO_BACKUP_THREAD: &str = "auto-backup";
pub const RESOURCE_MONITOR_THREAD: &str = "resource-monitor";
pub const LEAK_WATCHDOG_THREAD: &str = "leak-watchdog";

const SHUTDOWN_LEAK_THRESHOLD: Duration = Duration::from_secs(60);
const CACHE_WARMUP_BATCH: usize = 250;

pub struct AppState {
    pub config: Config,
    pub pool: Arc<ConnectionPool>,
    pub cache: EmployeeCache,
    pub salary: SalaryService,
    pub backups: Arc<BackupService>,
    pub monitor: Arc<ResourceMonitor>,
    pub threads: Arc<ThreadRegistry>,
    started_at: Instant,
    started_wall: DateTime<Local>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SystemStatus {
    pub started_at: String,
    pub uptime_secs: u64,
    #[schema(value_type = Object)]
    pub pool: PoolStats,
    pub background_tasks: Vec<String>,
    pub resources: Option<ResourceSample>,
}

impl AppState {
    /// Builds the pool and services and bootstraps the schema.
    pub async fn init(config: Config) -> HrResult<Self> {
        if let Some(parent) = config.database_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = Arc::new(ConnectionPool::new(
            db::connect_options(&config.database_path),
            PoolConfig {
                max_size: config.pool_max_size,
                acquire_timeout: config.pool_acquire_timeout,
                leak_threshold: config.pool_leak_threshold,
            },
        ));
        {
            let mut conn = pool.acquire().await?;
            let outcome = db::init_schema(&mut conn).await;
            pool.release(conn).await;
            outcome?;
        }

        let backups = Arc::new(BackupService::new(
            pool.clone(),
            &config.database_path,
            &config.backup_dir,
            config.backup_keep_count,
        ));
        let monitor = Arc::new(ResourceMonitor::new(
            pool.clone(),
            &config.database_path,
            &config.backup_dir,
            &config.log_dir,
        ));

        Ok(Self {
            salary: SalaryService::new(pool.clone()),
            cache: EmployeeCache::default(),
            threads: Arc::new(ThreadRegistry::new(config.stop_poll_interval)),
            config,
            pool,
            backups,
            monitor,
            started_at: Instant::now(),
            started_wall: Local::now(),
        })
    }

    pub async fn warm_cache(&self) {
        match self.cache.warmup(&self.pool, CACHE_WARMUP_BATCH).await {
            Ok(count) => info!(count, "Employee cache warmed"),
            Err(e) => warn!(error = ?e, "Employee cache warm-up failed"),
        }
    }

    /// Starts auto-backup, resource monitoring and the leak watchdog. A task
    /// that fails to start is logged; the others still run.
    pub fn start_background_tasks(&self, runtime: Handle) {
        let config = &self.config;

        let backup = self.threads.get(AUTO_BACKUP_THREAD);
        if let Err(e) = self.backups.start_auto_backup(
            &backup,
            runtime,
            config.auto_backup_interval,
            config.backup_retry_delay,
        ) {
            error!(error = %e, "Failed to start auto backup");
        }

        let monitor = self.threads.get(RESOURCE_MONITOR_THREAD);
        if let Err(e) = self.monitor.start(&monitor, config.resource_monitor_interval) {
            error!(error = ?e, "Failed to start resource monitor");
        }

        let watchdog = self.threads.get(LEAK_WATCHDOG_THREAD);
        let pool = self.pool.clone();
        let interval = config.leak_check_interval;
        let started = watchdog.start(move |signal| {
            while !signal.wait(interval) {
                let leaks = pool.check_configured_leaks();
                let stats = pool.stats();
                info!(
                    leaks = leaks.len(),
                    size = stats.size,
                    idle = stats.idle,
                    active = stats.active,
                    "Connection pool check"
                );
            }
            Ok(())
        });
        if let Err(e) = started {
            error!(error = %e, "Failed to start leak watchdog");
        }

        info!(running = ?self.threads.running(), "Background tasks started");
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            started_at: self.started_wall.format("%Y-%m-%d %H:%M:%S").to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            pool: self.pool.stats(),
            background_tasks: self.threads.running(),
            resources: self.monitor.latest(),
        }
    }

    /// Reports held connections, stops background threads, then closes the pool.
    pub async fn shutdown(&self) {
        info!("Shutting down");
        let leaks = self.pool.check_leaks(SHUTDOWN_LEAK_THRESHOLD);
        if !leaks.is_empty() {
            warn!(count = leaks.len(), "Connections still held at shutdown");
        }
        let stats = self.pool.stats();
        info!(size = stats.size, active = stats.active, idle = stats.idle, "Pool state at shutdown");

        let threads = self.threads.clone();
        let timeout = self.config.thread_stop_timeout;
        let poll = self.config.stop_poll_interval.min(Duration::from_millis(500));
        match tokio::task::spawn_blocking(move || threads.stop_all(timeout, poll)).await {
            Ok(true) => info!("Background threads stopped"),
            Ok(false) => warn!("Some background threads did not stop in time"),
            Err(e) => error!(error = %e, "Stopping background threads failed"),
        }

        self.pool.close_all().await;
        info!(uptime_secs = self.started_at.elapsed().as_secs(), "Shutdown complete");
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Config rooted in a fresh temp directory; keep the `TempDir` alive.
    pub fn test_config() -> (TempDir, Config) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::from_env();
        config.database_path = dir.path().join("data").join("hr.db");
        config.backup_dir = dir.path().join("backups");
        config.log_dir = dir.path().join("logs");
        config.stop_poll_interval = Duration::from_millis(50);
        config.thread_stop_timeout = Duration::from_secs(5);
        config.api_prefix = "/api".to_string();
        (dir, config)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_config;
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_tasks_start_and_stop() {
        let (_dir, mut config) = test_config();
        config.auto_backup_interval = Duration::from_secs(3600);
        config.resource_monitor_interval = Duration::from_secs(3600);
        let state = AppState::init(config).await.unwrap();
        assert!(state.config.database_path.exists());

        state.start_background_tasks(Handle::current());
        assert_eq!(
            state.threads.running(),
            vec![AUTO_BACKUP_THREAD, LEAK_WATCHDOG_THREAD, RESOURCE_MONITOR_THREAD]
        );

        let status = state.status();
        assert_eq!(status.background_tasks.len(), 3);

        state.shutdown().await;
        assert!(state.threads.running().is_empty());
        assert_eq!(state.pool.stats().size, 0);
    }
}
