use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::HrResult;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct SalaryRecord {
    pub id: i64,
    pub employee_id: i64,
    #[schema(example = "2023-01")]
    pub month: String,
    pub base_salary: f64,
    pub actual_salary: f64,
    pub deductions: f64,
    pub insurance: f64,
    pub tax: f64,
    /// Full computation breakdown.
    #[schema(value_type = Object)]
    pub details: Json<Value>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
}

/// Salary row joined with the owning employee's department and position.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct SalaryCostRow {
    pub employee_id: i64,
    pub department: Option<String>,
    pub position: Option<String>,
    pub base_salary: f64,
    #[schema(value_type = Object)]
    pub details: Json<Value>,
}

pub struct SalaryRecordValues<'a> {
    pub employee_id: i64,
    pub month: &'a str,
    pub base_salary: f64,
    pub actual_salary: f64,
    pub deductions: f64,
    pub insurance: f64,
    pub tax: f64,
    pub details: &'a Value,
}

impl SalaryRecord {
    /// Insert or overwrite the single row for (employee, month); returns its id.
    pub async fn upsert(conn: &mut SqliteConnection, values: &SalaryRecordValues<'_>) -> HrResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO salary_records
            (employee_id, month, base_salary, actual_salary, deductions, insurance, tax, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (employee_id, month) DO UPDATE SET
                base_salary = excluded.base_salary,
                actual_salary = excluded.actual_salary,
                deductions = excluded.deductions,
                insurance = excluded.insurance,
                tax = excluded.tax,
                details = excluded.details
            RETURNING id
            "#,
        )
        .bind(values.employee_id)
        .bind(values.month)
        .bind(values.base_salary)
        .bind(values.actual_salary)
        .bind(values.deductions)
        .bind(values.insurance)
        .bind(values.tax)
        .bind(Json(values.details))
        .bind(now())
        .fetch_one(&mut *conn)
        .await?;
        Ok(id)
    }

    /// History filtered by optional month and employee, newest month first.
    pub async fn history(
        conn: &mut SqliteConnection,
        month: Option<&str>,
        employee_id: Option<i64>,
    ) -> HrResult<Vec<SalaryRecord>> {
        let records = sqlx::query_as::<_, SalaryRecord>(
            r#"
            SELECT * FROM salary_records
            WHERE (?1 IS NULL OR month = ?1) AND (?2 IS NULL OR employee_id = ?2)
            ORDER BY month DESC, employee_id
            "#,
        )
        .bind(month)
        .bind(employee_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(records)
    }

    pub async fn cost_rows(conn: &mut SqliteConnection, month: &str) -> HrResult<Vec<SalaryCostRow>> {
        let rows = sqlx::query_as::<_, SalaryCostRow>(
            r#"
            SELECT s.employee_id, e.department, e.position, s.base_salary, s.details
            FROM salary_records s
            JOIN employees e ON e.id = s.employee_id
            WHERE s.month = ?
            ORDER BY s.employee_id
            "#,
        )
        .bind(month)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows)
    }
}
