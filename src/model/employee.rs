use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::{HrError, HrResult};
use crate::model::JsonMap;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "name": "Zhang Wei",
        "employee_number": "E-001",
        "id_card": "11010519491231002X",
        "department": "Finance",
        "position": "Accountant",
        "entry_date": "2023-03-15",
        "leave_date": null,
        "insurance_group_id": 1,
        "custom_fields": { "base_salary": 9000 },
        "created_at": "2023-03-01T09:00:00",
        "updated_at": "2023-03-01T09:00:00"
    })
)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub employee_number: Option<String>,
    pub id_card: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    #[schema(value_type = Option<String>, format = "date")]
    pub entry_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = "date")]
    pub leave_date: Option<NaiveDate>,
    pub insurance_group_id: Option<i64>,
    #[schema(value_type = Object)]
    pub custom_fields: Json<JsonMap>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}

/// Validated column values for insert/update.
#[derive(Debug, Clone, Default)]
pub struct EmployeeFields {
    pub name: String,
    pub employee_number: Option<String>,
    pub id_card: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    pub entry_date: Option<NaiveDate>,
    pub leave_date: Option<NaiveDate>,
    pub insurance_group_id: Option<i64>,
    pub custom_fields: JsonMap,
}

impl From<Employee> for EmployeeFields {
    fn from(e: Employee) -> Self {
        Self {
            name: e.name,
            employee_number: e.employee_number,
            id_card: e.id_card,
            department: e.department,
            position: e.position,
            entry_date: e.entry_date,
            leave_date: e.leave_date,
            insurance_group_id: e.insurance_group_id,
            custom_fields: e.custom_fields.0,
        }
    }
}

/// Short identity block attached to computed results.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmployeeBrief {
    pub id: i64,
    pub name: String,
    pub employee_number: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
}

impl From<&Employee> for EmployeeBrief {
    fn from(e: &Employee) -> Self {
        Self {
            id: e.id,
            name: e.name.clone(),
            employee_number: e.employee_number.clone(),
            department: e.department.clone(),
            position: e.position.clone(),
        }
    }
}

impl Employee {
    pub async fn find(conn: &mut SqliteConnection, id: i64) -> HrResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(employee)
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> HrResult<Employee> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| HrError::employee_not_found(id))
    }

    pub async fn list(conn: &mut SqliteConnection) -> HrResult<Vec<Employee>> {
        let employees = sqlx::query_as::<_, Employee>("SELECT * FROM employees ORDER BY name, id")
            .fetch_all(&mut *conn)
            .await?;
        Ok(employees)
    }

    /// Matches the employee number first, then the ID card.
    pub async fn find_by_identifier(
        conn: &mut SqliteConnection,
        identifier: &str,
    ) -> HrResult<Option<Employee>> {
        let employee = sqlx::query_as::<_, Employee>(
            r#"
            SELECT * FROM employees
            WHERE employee_number = ?1 OR id_card = ?1
            ORDER BY (employee_number = ?1) DESC, id
            LIMIT 1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(employee)
    }

    pub async fn insert(conn: &mut SqliteConnection, fields: &EmployeeFields) -> HrResult<i64> {
        let ts = now();
        let result = sqlx::query(
            r#"
            INSERT INTO employees
            (name, employee_number, id_card, department, position, entry_date, leave_date,
             insurance_group_id, custom_fields, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fields.name)
        .bind(&fields.employee_number)
        .bind(&fields.id_card)
        .bind(&fields.department)
        .bind(&fields.position)
        .bind(fields.entry_date)
        .bind(fields.leave_date)
        .bind(fields.insurance_group_id)
        .bind(Json(&fields.custom_fields))
        .bind(ts)
        .bind(ts)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        fields: &EmployeeFields,
    ) -> HrResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE employees SET
                name = ?, employee_number = ?, id_card = ?, department = ?, position = ?,
                entry_date = ?, leave_date = ?, insurance_group_id = ?, custom_fields = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&fields.name)
        .bind(&fields.employee_number)
        .bind(&fields.id_card)
        .bind(&fields.department)
        .bind(&fields.position)
        .bind(fields.entry_date)
        .bind(fields.leave_date)
        .bind(fields.insurance_group_id)
        .bind(Json(&fields.custom_fields))
        .bind(now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_position(
        conn: &mut SqliteConnection,
        id: i64,
        position: &str,
    ) -> HrResult<()> {
        sqlx::query("UPDATE employees SET position = ?, updated_at = ? WHERE id = ?")
            .bind(position)
            .bind(now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<bool> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Numeric `base_salary` from the custom-field bag, if present.
    pub fn custom_base_salary(&self) -> Option<f64> {
        self.custom_fields
            .get("base_salary")
            .and_then(crate::utils::validator::coerce_number)
    }
}
