use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::{HrError, HrResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Backup {
    pub id: i64,
    #[schema(example = "backup_20230101_120000_000.db")]
    pub filename: String,
    pub description: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

impl Backup {
    pub async fn insert(
        conn: &mut SqliteConnection,
        filename: &str,
        description: Option<&str>,
    ) -> HrResult<i64> {
        let result =
            sqlx::query("INSERT INTO backups (filename, description, created_at) VALUES (?, ?, ?)")
                .bind(filename)
                .bind(description)
                .bind(now())
                .execute(&mut *conn)
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> HrResult<Backup> {
        sqlx::query_as::<_, Backup>("SELECT * FROM backups WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| HrError::NotFound(format!("backup {id}")))
    }

    /// Newest first.
    pub async fn list(conn: &mut SqliteConnection) -> HrResult<Vec<Backup>> {
        let backups =
            sqlx::query_as::<_, Backup>("SELECT * FROM backups ORDER BY created_at DESC, id DESC")
                .fetch_all(&mut *conn)
                .await?;
        Ok(backups)
    }

    /// Backups whose description starts with `prefix`, newest first.
    pub async fn list_with_prefix(
        conn: &mut SqliteConnection,
        prefix: &str,
    ) -> HrResult<Vec<Backup>> {
        let backups = sqlx::query_as::<_, Backup>(
            r#"
            SELECT * FROM backups
            WHERE substr(description, 1, length(?1)) = ?1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(prefix)
        .fetch_all(&mut *conn)
        .await?;
        Ok(backups)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
