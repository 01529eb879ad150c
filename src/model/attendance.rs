use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::HrResult;
use crate::model::JsonMap;
use crate::utils::date_parser::Month;

/// Canonical attendance status markers. Spreadsheet exports use either the
/// English or the Chinese label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AttendanceStatus {
    #[strum(to_string = "normal", serialize = "正常")]
    Normal,
    #[strum(to_string = "late", serialize = "迟到")]
    Late,
    #[strum(to_string = "early_leave", serialize = "早退")]
    EarlyLeave,
    #[strum(to_string = "absent", serialize = "缺勤", serialize = "旷工")]
    Absent,
    #[strum(to_string = "leave", serialize = "请假")]
    Leave,
}

impl AttendanceStatus {
    /// Known labels map onto their canonical form; anything else is kept as written.
    pub fn normalize(raw: &str) -> String {
        let trimmed = raw.trim();
        trimmed
            .parse::<AttendanceStatus>()
            .map(|s| s.as_ref().to_string())
            .unwrap_or_else(|_| trimmed.to_string())
    }

    pub fn is_normal(status: Option<&str>) -> bool {
        matches!(
            status.map(|s| s.trim().parse::<AttendanceStatus>()),
            Some(Ok(AttendanceStatus::Normal))
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AttendanceRecord {
    pub id: i64,
    pub employee_id: i64,
    #[schema(value_type = String, format = "date", example = "2023-01-03")]
    pub date: NaiveDate,
    pub status: Option<String>,
    pub work_hours: f64,
    pub late_minutes: f64,
    pub early_leave_minutes: f64,
    pub overtime_hours: f64,
    pub absence_days: f64,
    #[schema(value_type = Object)]
    pub custom_data: Json<JsonMap>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

/// A parsed import row ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendance {
    pub employee_id: i64,
    pub date: NaiveDate,
    pub status: Option<String>,
    pub work_hours: f64,
    pub late_minutes: f64,
    pub early_leave_minutes: f64,
    pub overtime_hours: f64,
    pub absence_days: f64,
    pub custom_data: JsonMap,
}

impl AttendanceRecord {
    pub async fn insert(conn: &mut SqliteConnection, row: &NewAttendance) -> HrResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance
            (employee_id, date, status, work_hours, late_minutes, early_leave_minutes,
             overtime_hours, absence_days, custom_data, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.employee_id)
        .bind(row.date)
        .bind(&row.status)
        .bind(row.work_hours)
        .bind(row.late_minutes)
        .bind(row.early_leave_minutes)
        .bind(row.overtime_hours)
        .bind(row.absence_days)
        .bind(Json(&row.custom_data))
        .bind(now())
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn for_employee_in_month(
        conn: &mut SqliteConnection,
        employee_id: i64,
        month: Month,
    ) -> HrResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT * FROM attendance
            WHERE employee_id = ? AND date >= ? AND date < ?
            ORDER BY date, id
            "#,
        )
        .bind(employee_id)
        .bind(month.first_day())
        .bind(month.end_exclusive())
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    pub async fn in_month(
        conn: &mut SqliteConnection,
        month: Month,
    ) -> HrResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(
            "SELECT * FROM attendance WHERE date >= ? AND date < ? ORDER BY date, employee_id, id",
        )
        .bind(month.first_day())
        .bind(month.end_exclusive())
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }

    /// Newest rows first.
    pub async fn latest(conn: &mut SqliteConnection, limit: i64) -> HrResult<Vec<AttendanceRecord>> {
        let rows = sqlx::query_as::<_, AttendanceRecord>(
            "SELECT * FROM attendance ORDER BY date DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}
