/// Runs `$body` with a pooled connection bound to `$conn`, releasing it afterwards.
macro_rules! with_connection {
    ($pool:expr, |$conn:ident| $body:expr) => {{
        let mut $conn = $pool.acquire().await?;
        let outcome = $body.await;
        $pool.release($conn).await;
        outcome
    }};
}

pub mod pool;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, SqliteConnection};
use std::path::Path;
use std::time::Duration;

use crate::error::HrResult;

pub use pool::{ConnectionPool, PoolConfig};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS insurance_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        personal_rate REAL NOT NULL DEFAULT 0,
        company_rate REAL NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS insurance_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        base_amount REAL NOT NULL DEFAULT 0,
        items TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS employees (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        employee_number TEXT UNIQUE,
        id_card TEXT,
        department TEXT,
        position TEXT,
        entry_date TEXT,
        leave_date TEXT,
        insurance_group_id INTEGER REFERENCES insurance_groups (id) ON DELETE SET NULL,
        custom_fields TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS position_changes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        employee_id INTEGER NOT NULL REFERENCES employees (id) ON DELETE CASCADE,
        old_position TEXT,
        new_position TEXT NOT NULL,
        old_salary REAL NOT NULL DEFAULT 0,
        new_salary REAL NOT NULL,
        effective_date TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_position_changes_employee_date
        ON position_changes (employee_id, effective_date)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        employee_id INTEGER NOT NULL REFERENCES employees (id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        status TEXT,
        work_hours REAL NOT NULL DEFAULT 0,
        late_minutes REAL NOT NULL DEFAULT 0,
        early_leave_minutes REAL NOT NULL DEFAULT 0,
        overtime_hours REAL NOT NULL DEFAULT 0,
        absence_days REAL NOT NULL DEFAULT 0,
        custom_data TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_attendance_employee_date
        ON attendance (employee_id, date)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS salary_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        employee_id INTEGER NOT NULL REFERENCES employees (id) ON DELETE CASCADE,
        month TEXT NOT NULL,
        base_salary REAL NOT NULL DEFAULT 0,
        actual_salary REAL NOT NULL DEFAULT 0,
        deductions REAL NOT NULL DEFAULT 0,
        insurance REAL NOT NULL DEFAULT 0,
        tax REAL NOT NULL DEFAULT 0,
        details TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        UNIQUE (employee_id, month)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS backups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT NOT NULL,
        description TEXT,
        created_at TEXT NOT NULL
    )
    "#,
];

/// Connection options for the single database file.
pub fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Delete)
        .busy_timeout(Duration::from_secs(5))
        .log_statements(log::LevelFilter::Debug)
}

pub async fn init_schema(conn: &mut SqliteConnection) -> HrResult<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    tracing::info!(tables = 7, "Database schema ready");
    Ok(())
}

pub fn now() -> chrono::NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// A pool over a throwaway database file; keep the `TempDir` alive.
    pub async fn test_pool() -> (TempDir, Arc<ConnectionPool>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = Arc::new(ConnectionPool::new(
            connect_options(&dir.path().join("test.db")),
            PoolConfig::default(),
        ));
        let mut conn = pool.acquire().await.expect("acquire");
        init_schema(&mut conn).await.expect("schema");
        pool.release(conn).await;
        (dir, pool)
    }
}
