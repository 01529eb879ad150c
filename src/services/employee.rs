use serde::Deserialize;
use serde_json::Value;
use sqlx::{Connection, SqliteConnection};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::db::ConnectionPool;
use crate::error::{HrError, HrResult};
use crate::model::JsonMap;
use crate::model::employee::{Employee, EmployeeFields};
use crate::model::insurance::InsuranceGroup;
use crate::model::position_change::{NewPositionChange, PositionChange};
use crate::utils::date_parser::{Month, parse_date};
use crate::utils::db_utils::{ColumnKind, build_update_sql, execute_update};
use crate::utils::employee_cache::EmployeeCache;
use crate::utils::validator::{require, validate_employee_identity, validate_non_negative};

/// Create body, and patch body for updates (absent fields stay unchanged).
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct EmployeeInput {
    #[schema(example = "Zhang Wei")]
    pub name: Option<String>,
    #[schema(example = "E-001")]
    pub employee_number: Option<String>,
    #[schema(example = "11010519491231002X")]
    pub id_card: Option<String>,
    pub department: Option<String>,
    pub position: Option<String>,
    #[schema(example = "2023-03-15")]
    pub entry_date: Option<String>,
    pub leave_date: Option<String>,
    pub insurance_group_id: Option<i64>,
    #[schema(value_type = Object)]
    pub custom_fields: Option<JsonMap>,
}

const POSITION_CHANGE_COLUMNS: &[(&str, ColumnKind)] = &[
    ("old_position", ColumnKind::NullableText),
    ("new_position", ColumnKind::Text),
    ("old_salary", ColumnKind::Real),
    ("new_salary", ColumnKind::Real),
    ("effective_date", ColumnKind::Date),
];

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_date(field: &str, raw: &str) -> HrResult<Option<chrono::NaiveDate>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_date(raw)
        .map(Some)
        .ok_or_else(|| HrError::validation(field, format!("invalid date: {raw}")))
}

/// Overlays the provided input fields onto `fields`.
fn apply_input(fields: &mut EmployeeFields, input: EmployeeInput) -> HrResult<()> {
    if let Some(name) = input.name {
        fields.name = name.trim().to_string();
    }
    if input.employee_number.is_some() {
        fields.employee_number = non_blank(input.employee_number);
    }
    if input.id_card.is_some() {
        fields.id_card = non_blank(input.id_card);
    }
    if input.department.is_some() {
        fields.department = non_blank(input.department);
    }
    if input.position.is_some() {
        fields.position = non_blank(input.position);
    }
    if let Some(raw) = input.entry_date {
        fields.entry_date = parse_optional_date("entry_date", &raw)?;
    }
    if let Some(raw) = input.leave_date {
        fields.leave_date = parse_optional_date("leave_date", &raw)?;
    }
    if input.insurance_group_id.is_some() {
        fields.insurance_group_id = input.insurance_group_id;
    }
    if let Some(custom) = input.custom_fields {
        fields.custom_fields = custom;
    }
    validate_employee_identity(
        Some(fields.name.as_str()),
        fields.employee_number.as_deref(),
        fields.id_card.as_deref(),
    )
}

async fn check_group(conn: &mut SqliteConnection, group_id: Option<i64>) -> HrResult<()> {
    if let Some(id) = group_id {
        if InsuranceGroup::find(conn, id).await?.is_none() {
            return Err(HrError::validation(
                "insurance_group_id",
                format!("insurance group {id} does not exist"),
            ));
        }
    }
    Ok(())
}

pub async fn list_employees(pool: &ConnectionPool) -> HrResult<Vec<Employee>> {
    with_connection!(pool, |conn| Employee::list(&mut conn))
}

pub async fn get_employee(pool: &ConnectionPool, id: i64) -> HrResult<Employee> {
    with_connection!(pool, |conn| Employee::get(&mut conn, id))
}

async fn create(conn: &mut SqliteConnection, input: EmployeeInput) -> HrResult<Employee> {
    let mut fields = EmployeeFields::default();
    apply_input(&mut fields, input)?;
    check_group(conn, fields.insurance_group_id).await?;
    let id = Employee::insert(conn, &fields).await?;
    Employee::get(conn, id).await
}

#[instrument(skip_all)]
pub async fn create_employee(
    pool: &ConnectionPool,
    cache: &EmployeeCache,
    input: EmployeeInput,
) -> HrResult<Employee> {
    let employee = with_connection!(pool, |conn| create(&mut conn, input))?;
    cache.remember(&employee).await;
    info!(employee_id = employee.id, name = %employee.name, "Employee created");
    Ok(employee)
}

async fn update(
    conn: &mut SqliteConnection,
    id: i64,
    input: EmployeeInput,
) -> HrResult<(Employee, Employee)> {
    let before = Employee::get(conn, id).await?;
    let mut fields = EmployeeFields::from(before.clone());
    apply_input(&mut fields, input)?;
    check_group(conn, fields.insurance_group_id).await?;
    Employee::update(conn, id, &fields).await?;
    let after = Employee::get(conn, id).await?;
    Ok((before, after))
}

#[instrument(skip(pool, cache, input))]
pub async fn update_employee(
    pool: &ConnectionPool,
    cache: &EmployeeCache,
    id: i64,
    input: EmployeeInput,
) -> HrResult<Employee> {
    let (before, after) = with_connection!(pool, |conn| update(&mut conn, id, input))?;
    cache.forget(&before).await;
    cache.remember(&after).await;
    info!(employee_id = id, "Employee updated");
    Ok(after)
}

async fn delete(conn: &mut SqliteConnection, id: i64) -> HrResult<Employee> {
    let employee = Employee::get(conn, id).await?;
    Employee::delete(conn, id).await?;
    Ok(employee)
}

#[instrument(skip(pool, cache))]
pub async fn delete_employee(pool: &ConnectionPool, cache: &EmployeeCache, id: i64) -> HrResult<()> {
    let employee = with_connection!(pool, |conn| delete(&mut conn, id))?;
    cache.forget(&employee).await;
    info!(employee_id = id, "Employee deleted");
    Ok(())
}

async fn record_position_change(
    conn: &mut SqliteConnection,
    data: NewPositionChange,
) -> HrResult<PositionChange> {
    require("new_position", Some(data.new_position.as_str()))?;
    validate_non_negative("new_salary", data.new_salary)?;
    let old_salary = data.old_salary.unwrap_or(0.0);
    validate_non_negative("old_salary", old_salary)?;
    let effective_date = parse_date(&data.effective_date).ok_or_else(|| {
        HrError::validation("effective_date", format!("invalid date: {}", data.effective_date))
    })?;

    let employee = Employee::get(conn, data.employee_id).await?;
    let old_position = non_blank(data.old_position).or(employee.position);
    let new_position = data.new_position.trim();

    let mut tx = conn.begin().await?;
    let id = PositionChange::insert(
        &mut tx,
        employee.id,
        old_position.as_deref(),
        new_position,
        old_salary,
        data.new_salary,
        effective_date,
    )
    .await?;
    Employee::update_position(&mut tx, employee.id, new_position).await?;
    tx.commit().await?;

    PositionChange::get(conn, id).await
}

#[instrument(skip(pool, data), fields(employee_id = data.employee_id))]
pub async fn add_position_change(
    pool: &ConnectionPool,
    data: NewPositionChange,
) -> HrResult<PositionChange> {
    let change = with_connection!(pool, |conn| record_position_change(&mut conn, data))?;
    info!(
        change_id = change.id,
        new_position = %change.new_position,
        effective_date = %change.effective_date,
        "Position change recorded"
    );
    Ok(change)
}

pub async fn get_position_changes(
    pool: &ConnectionPool,
    employee_id: Option<i64>,
    month: Option<Month>,
) -> HrResult<Vec<PositionChange>> {
    with_connection!(pool, |conn| PositionChange::filtered(&mut conn, employee_id, month))
}

async fn patch_position_change(
    conn: &mut SqliteConnection,
    id: i64,
    patch: &Value,
) -> HrResult<PositionChange> {
    PositionChange::get(conn, id).await?;
    let update = build_update_sql("position_changes", patch, POSITION_CHANGE_COLUMNS, "id", id)?;
    for field in ["old_salary", "new_salary"] {
        if let Some(value) = patch.get(field).and_then(crate::utils::validator::coerce_number) {
            validate_non_negative(field, value)?;
        }
    }
    if let Some(position) = patch.get("new_position") {
        require("new_position", position.as_str())?;
    }
    execute_update(conn, update).await?;
    PositionChange::get(conn, id).await
}

#[instrument(skip(pool, patch))]
pub async fn update_position_change(
    pool: &ConnectionPool,
    id: i64,
    patch: &Value,
) -> HrResult<PositionChange> {
    with_connection!(pool, |conn| patch_position_change(&mut conn, id, patch))
}

async fn remove_position_change(conn: &mut SqliteConnection, id: i64) -> HrResult<()> {
    if !PositionChange::delete(conn, id).await? {
        return Err(HrError::NotFound(format!("position change {id}")));
    }
    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_position_change(pool: &ConnectionPool, id: i64) -> HrResult<()> {
    with_connection!(pool, |conn| remove_position_change(&mut conn, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use serde_json::json;

    fn input(name: &str, number: &str) -> EmployeeInput {
        EmployeeInput {
            name: Some(name.to_string()),
            employee_number: Some(number.to_string()),
            position: Some("Clerk".to_string()),
            entry_date: Some("2023/01/05".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_validates_and_caches() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();

        let employee = create_employee(&pool, &cache, input("Li Na", "E1")).await.unwrap();
        assert_eq!(employee.entry_date.unwrap().to_string(), "2023-01-05");
        assert_eq!(cache.lookup("E1").await, Some(employee.id));

        let missing_identity = EmployeeInput {
            name: Some("Nobody".into()),
            ..Default::default()
        };
        assert!(matches!(
            create_employee(&pool, &cache, missing_identity).await,
            Err(HrError::Validation { .. })
        ));

        let mut bad_date = input("Bad Date", "E2");
        bad_date.entry_date = Some("someday".into());
        assert!(create_employee(&pool, &cache, bad_date).await.is_err());

        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn update_and_delete_refresh_the_cache() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();
        let employee = create_employee(&pool, &cache, input("Li Na", "E1")).await.unwrap();

        let patch = EmployeeInput {
            employee_number: Some("E9".into()),
            department: Some("Sales".into()),
            ..Default::default()
        };
        let updated = update_employee(&pool, &cache, employee.id, patch).await.unwrap();
        assert_eq!(updated.department.as_deref(), Some("Sales"));
        assert_eq!(updated.name, "Li Na");
        assert_eq!(cache.lookup("E1").await, None);
        assert_eq!(cache.lookup("E9").await, Some(employee.id));

        delete_employee(&pool, &cache, employee.id).await.unwrap();
        assert_eq!(cache.lookup("E9").await, None);
        assert!(matches!(
            get_employee(&pool, employee.id).await,
            Err(HrError::NotFound(_))
        ));
        assert!(matches!(
            update_employee(&pool, &cache, employee.id, EmployeeInput::default()).await,
            Err(HrError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn position_change_updates_employee() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();
        let employee = create_employee(&pool, &cache, input("Li Na", "E1")).await.unwrap();

        let change = add_position_change(
            &pool,
            NewPositionChange {
                employee_id: employee.id,
                old_position: None,
                new_position: "Manager".into(),
                old_salary: None,
                new_salary: 12000.0,
                effective_date: "2023-03-16".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(change.old_position.as_deref(), Some("Clerk"));
        assert_eq!(change.old_salary, 0.0);
        assert_eq!(
            get_employee(&pool, employee.id).await.unwrap().position.as_deref(),
            Some("Manager")
        );

        let march: Month = "2023-03".parse().unwrap();
        assert_eq!(get_position_changes(&pool, Some(employee.id), Some(march)).await.unwrap().len(), 1);
        let april: Month = "2023-04".parse().unwrap();
        assert!(get_position_changes(&pool, None, Some(april)).await.unwrap().is_empty());

        let patched = update_position_change(&pool, change.id, &json!({ "new_salary": 13000 }))
            .await
            .unwrap();
        assert_eq!(patched.new_salary, 13000.0);
        assert!(update_position_change(&pool, change.id, &json!({ "new_salary": -1 })).await.is_err());
        for patch in [json!({ "new_salary": null }), json!({ "effective_date": null })] {
            assert!(matches!(
                update_position_change(&pool, change.id, &patch).await,
                Err(HrError::Validation { .. })
            ));
        }
        let cleared = update_position_change(&pool, change.id, &json!({ "old_position": null }))
            .await
            .unwrap();
        assert_eq!(cleared.old_position, None);

        delete_position_change(&pool, change.id).await.unwrap();
        assert!(matches!(
            delete_position_change(&pool, change.id).await,
            Err(HrError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn position_change_for_missing_employee() {
        let (_dir, pool) = test_pool().await;
        let result = add_position_change(
            &pool,
            NewPositionChange {
                employee_id: 404,
                old_position: None,
                new_position: "Manager".into(),
                old_salary: None,
                new_salary: 1.0,
                effective_date: "2023-03-16".into(),
            },
        )
        .await;
        assert!(matches!(result, Err(HrError::NotFound(_))));
    }
}
