//! Database snapshots: on demand, on a timer, and restore.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::db::ConnectionPool;
use crate::error::{HrError, HrResult};
use crate::model::backup::Backup;
use crate::utils::thread_manager::ThreadManager;

/// Description prefix that marks automatic backups; only these are trimmed.
pub const AUTO_BACKUP_PREFIX: &str = "Automatic backup";
const SAFETY_PREFIX: &str = "Pre-restore safety copy";

pub struct BackupService {
    pool: Arc<ConnectionPool>,
    db_path: PathBuf,
    backup_dir: PathBuf,
    keep_count: usize,
    /// Serialises snapshot creation against restores.
    exclusive: Mutex<()>,
}

impl BackupService {
    pub fn new(
        pool: Arc<ConnectionPool>,
        db_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        keep_count: usize,
    ) -> Self {
        Self {
            pool,
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            keep_count,
            exclusive: Mutex::new(()),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn path_of(&self, backup: &Backup) -> PathBuf {
        self.backup_dir.join(&backup.filename)
    }

    async fn unused_filename(&self) -> HrResult<String> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut filename = format!("backup_{stamp}.db");
        let mut n = 1;
        while tokio::fs::try_exists(self.backup_dir.join(&filename)).await? {
            filename = format!("backup_{stamp}_{n}.db");
            n += 1;
        }
        Ok(filename)
    }

    async fn snapshot(&self, description: Option<&str>) -> HrResult<Backup> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let filename = self.unused_filename().await?;
        let target = self.backup_dir.join(&filename);
        let description = match description {
            Some(d) if !d.trim().is_empty() => d.trim().to_string(),
            _ => format!("{AUTO_BACKUP_PREFIX} - {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
        };

        let target_str = target
            .to_str()
            .ok_or_else(|| HrError::Internal(format!("backup path is not UTF-8: {}", target.display())))?
            .to_string();

        let mut conn = self.pool.acquire().await?;
        let outcome = async {
            sqlx::query("VACUUM INTO ?")
                .bind(target_str)
                .execute(&mut *conn)
                .await?;
            let id = Backup::insert(&mut conn, &filename, Some(&description)).await?;
            Backup::get(&mut conn, id).await
        }
        .await;
        self.pool.release(conn).await;

        if outcome.is_err() && tokio::fs::try_exists(&target).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&target).await;
        }
        outcome
    }

    /// Writes a consistent copy of the database and records it. Without a
    /// description the backup counts as automatic.
    #[instrument(skip(self))]
    pub async fn create_backup(&self, description: Option<&str>) -> HrResult<Backup> {
        let _exclusive = self.exclusive.lock().await;
        let backup = self.snapshot(description).await?;
        info!(backup_id = backup.id, filename = %backup.filename, "Backup created");
        Ok(backup)
    }

    pub async fn list_backups(&self) -> HrResult<Vec<Backup>> {
        let pool = &self.pool;
        with_connection!(pool, |conn| Backup::list(&mut conn))
    }

    async fn remove(&self, backup: &Backup) -> HrResult<()> {
        match tokio::fs::remove_file(self.path_of(backup)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(filename = %backup.filename, "Backup file already missing");
            }
            Err(e) => return Err(e.into()),
        }
        let pool = &self.pool;
        with_connection!(pool, |conn| Backup::delete(&mut conn, backup.id))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_backup(&self, id: i64) -> HrResult<()> {
        let pool = &self.pool;
        let backup = with_connection!(pool, |conn| Backup::get(&mut conn, id))?;
        self.remove(&backup).await?;
        info!(backup_id = id, filename = %backup.filename, "Backup deleted");
        Ok(())
    }

    /// Replaces the live database with backup `id`. A safety snapshot is taken
    /// first and put back if the swap fails. Returns the safety snapshot.
    #[instrument(skip(self))]
    pub async fn restore_backup(&self, id: i64) -> HrResult<Backup> {
        let _exclusive = self.exclusive.lock().await;
        let pool = &self.pool;
        let backup = with_connection!(pool, |conn| Backup::get(&mut conn, id))?;
        let source = self.path_of(&backup);
        if !tokio::fs::try_exists(&source).await? {
            return Err(HrError::NotFound(format!("backup file {}", backup.filename)));
        }

        let safety = self
            .snapshot(Some(&format!("{SAFETY_PREFIX} before restoring {}", backup.filename)))
            .await?;
        let safety_path = self.path_of(&safety);

        let dropped = self.pool.close_all().await;
        info!(dropped, "Connections released for restore");

        if let Err(e) = tokio::fs::copy(&source, &self.db_path).await {
            error!(error = %e, "Restore failed, putting the safety copy back");
            match tokio::fs::copy(&safety_path, &self.db_path).await {
                Ok(_) => {
                    if let Err(register) = self.register_again(&safety).await {
                        warn!(error = %register, "Safety copy restored but not recorded");
                    }
                }
                Err(rollback) => error!(error = %rollback, "Rollback from safety copy failed"),
            }
            return Err(e.into());
        }

        let safety = self.register_again(&safety).await?;

        info!(backup_id = id, filename = %backup.filename, "Database restored");
        Ok(safety)
    }

    /// Records a snapshot in the current database. A file copied into place
    /// predates the metadata row of the safety snapshot taken just before it.
    async fn register_again(&self, snapshot: &Backup) -> HrResult<Backup> {
        let pool = &self.pool;
        let description = snapshot.description.as_deref();
        with_connection!(pool, |conn| async {
            let new_id = Backup::insert(&mut conn, &snapshot.filename, description).await?;
            Backup::get(&mut conn, new_id).await
        })
    }

    /// Keeps the `keep` newest automatic backups and deletes the rest.
    pub async fn cleanup_old_backups(&self, keep: usize) -> HrResult<usize> {
        let pool = &self.pool;
        let automatic = with_connection!(pool, |conn| Backup::list_with_prefix(&mut conn, AUTO_BACKUP_PREFIX))?;
        let mut removed = 0;
        for backup in automatic.iter().skip(keep) {
            self.remove(backup).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, keep, "Old automatic backups removed");
        }
        Ok(removed)
    }

    async fn auto_backup_once(&self) -> HrResult<()> {
        self.create_backup(None).await?;
        self.cleanup_old_backups(self.keep_count).await?;
        Ok(())
    }

    /// Runs backup + trim on `manager`'s thread every `interval`, retrying
    /// after `retry_delay` when a round fails.
    pub fn start_auto_backup(
        self: &Arc<Self>,
        manager: &ThreadManager,
        runtime: Handle,
        interval: Duration,
        retry_delay: Duration,
    ) -> std::io::Result<()> {
        let service = Arc::clone(self);
        manager.start(move |signal| {
            info!(interval_secs = interval.as_secs(), "Auto backup started");
            while !signal.should_stop() {
                let pause = match runtime.block_on(service.auto_backup_once()) {
                    Ok(()) => interval,
                    Err(e) => {
                        error!(error = %e, retry_secs = retry_delay.as_secs(), "Auto backup failed");
                        retry_delay
                    }
                };
                if signal.wait(pause) {
                    break;
                }
            }
            info!("Auto backup stopped");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::model::employee::{Employee, EmployeeFields};

    async fn service() -> (tempfile::TempDir, Arc<ConnectionPool>, Arc<BackupService>) {
        let (dir, pool) = test_pool().await;
        let service = Arc::new(BackupService::new(
            pool.clone(),
            dir.path().join("test.db"),
            dir.path().join("backups"),
            2,
        ));
        (dir, pool, service)
    }

    async fn employee_count(pool: &ConnectionPool) -> usize {
        let mut conn = pool.acquire().await.unwrap();
        let employees = Employee::list(&mut conn).await.unwrap();
        pool.release(conn).await;
        employees.len()
    }

    #[tokio::test]
    async fn create_list_delete() {
        let (_dir, _pool, service) = service().await;
        let backup = service.create_backup(Some("before payroll")).await.unwrap();
        assert!(backup.filename.starts_with("backup_"));
        assert!(backup.filename.ends_with(".db"));
        assert!(service.backup_dir().join(&backup.filename).exists());

        let listed = service.list_backups().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].description.as_deref(), Some("before payroll"));

        service.delete_backup(backup.id).await.unwrap();
        assert!(!service.backup_dir().join(&backup.filename).exists());
        assert!(matches!(service.delete_backup(backup.id).await, Err(HrError::NotFound(_))));
    }

    #[tokio::test]
    async fn cleanup_only_trims_automatic_backups() {
        let (_dir, _pool, service) = service().await;
        service.create_backup(Some("manual")).await.unwrap();
        for _ in 0..4 {
            service.create_backup(None).await.unwrap();
        }
        assert_eq!(service.cleanup_old_backups(2).await.unwrap(), 2);

        let remaining = service.list_backups().await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().any(|b| b.description.as_deref() == Some("manual")));
    }

    #[tokio::test]
    async fn restore_brings_back_deleted_rows() {
        let (_dir, pool, service) = service().await;
        let mut conn = pool.acquire().await.unwrap();
        let id = Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: "Sun Li".into(),
                employee_number: Some("B1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;

        let backup = service.create_backup(Some("with Sun Li")).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        Employee::delete(&mut conn, id).await.unwrap();
        pool.release(conn).await;
        assert_eq!(employee_count(&pool).await, 0);

        let safety = service.restore_backup(backup.id).await.unwrap();
        assert!(safety.description.unwrap().starts_with(SAFETY_PREFIX));
        assert_eq!(employee_count(&pool).await, 1);
        assert!(service.list_backups().await.unwrap().iter().any(|b| b.filename == safety.filename));
    }

    #[tokio::test]
    async fn failed_restore_keeps_live_data() {
        let (_dir, pool, service) = service().await;
        let backup = service.create_backup(Some("empty")).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: "Zhou Yi".into(),
                employee_number: Some("R1".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;

        // A directory in place of the snapshot makes the copy fail.
        let snapshot = service.backup_dir().join(&backup.filename);
        std::fs::remove_file(&snapshot).unwrap();
        std::fs::create_dir(&snapshot).unwrap();

        let err = service.restore_backup(backup.id).await.unwrap_err();
        assert!(matches!(err, HrError::Io(_)));

        assert_eq!(employee_count(&pool).await, 1);
        let listed = service.list_backups().await.unwrap();
        let safety = listed
            .iter()
            .find(|b| b.description.as_deref().is_some_and(|d| d.starts_with(SAFETY_PREFIX)))
            .expect("safety copy recorded");
        assert!(service.backup_dir().join(&safety.filename).is_file());
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_backup_runs_on_managed_thread() {
        let (_dir, _pool, service) = service().await;
        let manager = ThreadManager::with_poll_granularity("auto-backup", Duration::from_millis(50));
        service
            .start_auto_backup(&manager, Handle::current(), Duration::from_secs(3600), Duration::from_millis(100))
            .unwrap();

        let mut backups = Vec::new();
        for _ in 0..100 {
            backups = service.list_backups().await.unwrap();
            if !backups.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(backups.len(), 1);
        assert!(backups[0].description.as_deref().unwrap().starts_with(AUTO_BACKUP_PREFIX));

        let stopped = tokio::task::spawn_blocking(move || manager.stop(Duration::from_secs(5), Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(stopped);
    }
}
