use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::{HrError, HrResult};
use crate::utils::date_parser::Month;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct PositionChange {
    pub id: i64,
    pub employee_id: i64,
    pub old_position: Option<String>,
    pub new_position: String,
    pub old_salary: f64,
    pub new_salary: f64,
    #[schema(value_type = String, format = "date", example = "2023-01-16")]
    pub effective_date: NaiveDate,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

/// Request body for recording a position change.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewPositionChange {
    #[schema(example = 1)]
    pub employee_id: i64,
    #[schema(example = "Junior Accountant")]
    pub old_position: Option<String>,
    #[schema(example = "Accountant")]
    pub new_position: String,
    #[schema(example = 6000.0)]
    pub old_salary: Option<f64>,
    #[schema(example = 8000.0)]
    pub new_salary: f64,
    #[schema(example = "2023-01-16")]
    pub effective_date: String,
}

impl PositionChange {
    pub async fn find(conn: &mut SqliteConnection, id: i64) -> HrResult<Option<PositionChange>> {
        let change =
            sqlx::query_as::<_, PositionChange>("SELECT * FROM position_changes WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(change)
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> HrResult<PositionChange> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| HrError::NotFound(format!("position change {id}")))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut SqliteConnection,
        employee_id: i64,
        old_position: Option<&str>,
        new_position: &str,
        old_salary: f64,
        new_salary: f64,
        effective_date: NaiveDate,
    ) -> HrResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO position_changes
            (employee_id, old_position, new_position, old_salary, new_salary, effective_date, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(employee_id)
        .bind(old_position)
        .bind(new_position)
        .bind(old_salary)
        .bind(new_salary)
        .bind(effective_date)
        .bind(now())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<bool> {
        let result = sqlx::query("DELETE FROM position_changes WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Optionally narrowed to one employee and one month, newest first.
    pub async fn filtered(
        conn: &mut SqliteConnection,
        employee_id: Option<i64>,
        month: Option<Month>,
    ) -> HrResult<Vec<PositionChange>> {
        let changes = sqlx::query_as::<_, PositionChange>(
            r#"
            SELECT * FROM position_changes
            WHERE (?1 IS NULL OR employee_id = ?1)
              AND (?2 IS NULL OR effective_date >= ?2)
              AND (?3 IS NULL OR effective_date < ?3)
            ORDER BY effective_date DESC, id DESC
            "#,
        )
        .bind(employee_id)
        .bind(month.map(|m| m.first_day()))
        .bind(month.map(|m| m.end_exclusive()))
        .fetch_all(&mut *conn)
        .await?;
        Ok(changes)
    }

    /// Changes effective in `[from, until)`, oldest first.
    pub async fn for_employee_between(
        conn: &mut SqliteConnection,
        employee_id: i64,
        from: NaiveDate,
        until: NaiveDate,
    ) -> HrResult<Vec<PositionChange>> {
        let changes = sqlx::query_as::<_, PositionChange>(
            r#"
            SELECT * FROM position_changes
            WHERE employee_id = ? AND effective_date >= ? AND effective_date < ?
            ORDER BY effective_date ASC, id ASC
            "#,
        )
        .bind(employee_id)
        .bind(from)
        .bind(until)
        .fetch_all(&mut *conn)
        .await?;
        Ok(changes)
    }

    /// Most recent change effective strictly before `date`.
    pub async fn latest_before(
        conn: &mut SqliteConnection,
        employee_id: i64,
        date: NaiveDate,
    ) -> HrResult<Option<PositionChange>> {
        let change = sqlx::query_as::<_, PositionChange>(
            r#"
            SELECT * FROM position_changes
            WHERE employee_id = ? AND effective_date < ?
            ORDER BY effective_date DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(employee_id)
        .bind(date)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(change)
    }
}
