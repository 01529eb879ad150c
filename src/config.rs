use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: String,
    pub database_path: PathBuf,
    pub api_prefix: String,
    pub log_dir: PathBuf,

    // Connection pool
    pub pool_max_size: usize,
    pub pool_acquire_timeout: Duration,
    pub pool_leak_threshold: Duration,
    pub leak_check_interval: Duration,

    // Backups
    pub backup_dir: PathBuf,
    pub auto_backup_interval: Duration,
    pub backup_keep_count: usize,
    pub backup_retry_delay: Duration,

    // Background threads
    pub resource_monitor_interval: Duration,
    pub stop_poll_interval: Duration,
    pub thread_stop_timeout: Duration,

    // Rate limiting
    pub rate_protected_per_min: u32,
    pub rate_import_per_min: u32,
}

/// Reads `key`, falling back to `default` when unset or unparseable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid config value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(env_or(key, default))
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            server_addr: env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string()),
            database_path: env_or("DATABASE_PATH", PathBuf::from("data/hr_admin.db")),
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            log_dir: env_or("LOG_DIR", PathBuf::from("logs")),

            pool_max_size: env_or("POOL_MAX_SIZE", 10),
            pool_acquire_timeout: env_secs("POOL_ACQUIRE_TIMEOUT_SECS", 30),
            pool_leak_threshold: env_secs("POOL_LEAK_THRESHOLD_SECS", 300),
            leak_check_interval: env_secs("LEAK_CHECK_INTERVAL_SECS", 600),

            backup_dir: env_or("BACKUP_DIR", PathBuf::from("backups")),
            auto_backup_interval: Duration::from_secs(
                env_or::<u64>("AUTO_BACKUP_INTERVAL_HOURS", 12) * 3600,
            ),
            backup_keep_count: env_or("BACKUP_KEEP_COUNT", 10),
            backup_retry_delay: env_secs("BACKUP_RETRY_SECS", 300),

            resource_monitor_interval: env_secs("RESOURCE_MONITOR_INTERVAL_SECS", 60),
            stop_poll_interval: env_secs("STOP_POLL_SECS", 5),
            thread_stop_timeout: env_secs("THREAD_STOP_TIMEOUT_SECS", 15),

            rate_protected_per_min: env_or("RATE_PROTECTED_PER_MIN", 1000),
            rate_import_per_min: env_or("RATE_IMPORT_PER_MIN", 30),
        }
    }
}
