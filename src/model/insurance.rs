use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, SqliteConnection};
use utoipa::ToSchema;

use crate::db::now;
use crate::error::{HrError, HrResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct InsuranceItem {
    pub id: i64,
    #[schema(example = "Pension")]
    pub name: String,
    #[schema(example = 0.08)]
    pub personal_rate: f64,
    #[schema(example = 0.16)]
    pub company_rate: f64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InsuranceItemInput {
    #[schema(example = "Pension")]
    pub name: String,
    #[schema(example = 0.08)]
    pub personal_rate: f64,
    #[schema(example = 0.16)]
    pub company_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct InsuranceGroup {
    pub id: i64,
    #[schema(example = "Standard")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = 5000.0)]
    pub base_amount: f64,
    /// Ordered insurance item ids.
    #[schema(value_type = Vec<i64>, example = json!([1, 2, 3]))]
    pub items: Json<Vec<i64>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: NaiveDateTime,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct InsuranceGroupInput {
    #[schema(example = "Standard")]
    pub name: String,
    pub description: Option<String>,
    #[schema(example = 5000.0)]
    pub base_amount: f64,
    #[serde(default)]
    #[schema(example = json!([1, 2, 3]))]
    pub items: Vec<i64>,
}

impl InsuranceItem {
    pub async fn list(conn: &mut SqliteConnection) -> HrResult<Vec<InsuranceItem>> {
        let items = sqlx::query_as::<_, InsuranceItem>("SELECT * FROM insurance_items ORDER BY name, id")
            .fetch_all(&mut *conn)
            .await?;
        Ok(items)
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> HrResult<Option<InsuranceItem>> {
        let item = sqlx::query_as::<_, InsuranceItem>("SELECT * FROM insurance_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(item)
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> HrResult<InsuranceItem> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| HrError::NotFound(format!("insurance item {id}")))
    }

    pub async fn insert(conn: &mut SqliteConnection, input: &InsuranceItemInput) -> HrResult<i64> {
        let ts = now();
        let result = sqlx::query(
            r#"
            INSERT INTO insurance_items (name, personal_rate, company_rate, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.name.trim())
        .bind(input.personal_rate)
        .bind(input.company_rate)
        .bind(ts)
        .bind(ts)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        input: &InsuranceItemInput,
    ) -> HrResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE insurance_items
            SET name = ?, personal_rate = ?, company_rate = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(input.name.trim())
        .bind(input.personal_rate)
        .bind(input.company_rate)
        .bind(now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<bool> {
        let result = sqlx::query("DELETE FROM insurance_items WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ids from `ids` with no matching item row.
    pub async fn missing_ids(conn: &mut SqliteConnection, ids: &[i64]) -> HrResult<Vec<i64>> {
        let mut missing = Vec::new();
        for id in ids {
            let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM insurance_items WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
            if exists.is_none() {
                missing.push(*id);
            }
        }
        Ok(missing)
    }
}

impl InsuranceGroup {
    pub async fn list(conn: &mut SqliteConnection) -> HrResult<Vec<InsuranceGroup>> {
        let groups = sqlx::query_as::<_, InsuranceGroup>("SELECT * FROM insurance_groups ORDER BY name, id")
            .fetch_all(&mut *conn)
            .await?;
        Ok(groups)
    }

    pub async fn find(conn: &mut SqliteConnection, id: i64) -> HrResult<Option<InsuranceGroup>> {
        let group = sqlx::query_as::<_, InsuranceGroup>("SELECT * FROM insurance_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(group)
    }

    pub async fn get(conn: &mut SqliteConnection, id: i64) -> HrResult<InsuranceGroup> {
        Self::find(conn, id)
            .await?
            .ok_or_else(|| HrError::NotFound(format!("insurance group {id}")))
    }

    /// The group with the lowest id, used for employees without an assignment.
    pub async fn default_group(conn: &mut SqliteConnection) -> HrResult<Option<InsuranceGroup>> {
        let group = sqlx::query_as::<_, InsuranceGroup>(
            "SELECT * FROM insurance_groups ORDER BY id LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?;
        Ok(group)
    }

    pub async fn insert(conn: &mut SqliteConnection, input: &InsuranceGroupInput) -> HrResult<i64> {
        let ts = now();
        let result = sqlx::query(
            r#"
            INSERT INTO insurance_groups (name, description, base_amount, items, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(input.base_amount)
        .bind(Json(&input.items))
        .bind(ts)
        .bind(ts)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        id: i64,
        input: &InsuranceGroupInput,
    ) -> HrResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE insurance_groups
            SET name = ?, description = ?, base_amount = ?, items = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(input.base_amount)
        .bind(Json(&input.items))
        .bind(now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_items(conn: &mut SqliteConnection, id: i64, items: &[i64]) -> HrResult<()> {
        sqlx::query("UPDATE insurance_groups SET items = ?, updated_at = ? WHERE id = ?")
            .bind(Json(items))
            .bind(now())
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<bool> {
        let result = sqlx::query("DELETE FROM insurance_groups WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
