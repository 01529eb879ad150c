use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use sqlx::{Connection, SqliteConnection};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::db::ConnectionPool;
use crate::error::{HrError, HrResult};
use crate::model::employee::{Employee, EmployeeBrief};
use crate::model::insurance::{InsuranceGroup, InsuranceGroupInput, InsuranceItem, InsuranceItemInput};
use crate::utils::date_parser::Month;
use crate::utils::validator::{require, validate_non_negative, validate_rate};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct InsuranceItemAmount {
    pub id: i64,
    pub name: String,
    pub personal_rate: f64,
    pub company_rate: f64,
    pub personal_amount: f64,
    pub company_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct InsuranceResult {
    pub group_id: Option<i64>,
    pub personal_total: f64,
    pub company_total: f64,
    pub items: Vec<InsuranceItemAmount>,
    pub base_amount: f64,
    pub is_partial_month: bool,
    pub work_days: i64,
    pub total_days: i64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmployeeInsurance {
    pub employee: EmployeeBrief,
    #[serde(flatten)]
    pub insurance: InsuranceResult,
}

/// Days worked in `month` given entry and leave dates, and whether either
/// date falls inside the month.
pub fn employment_days(month: Month, entry: Option<NaiveDate>, leave: Option<NaiveDate>) -> (bool, i64) {
    let total_days = i64::from(month.days());
    let entry_in_month = entry.filter(|d| month.contains(*d));
    let leave_in_month = leave.filter(|d| month.contains(*d));

    let first = entry_in_month.map_or(1, |d| i64::from(d.day()));
    let last = leave_in_month.map_or(total_days, |d| i64::from(d.day()));
    let partial = entry_in_month.is_some() || leave_in_month.is_some();

    (partial, (last - first + 1).max(0))
}

/// Applies `base × rate × ratio` to every item.
pub fn contributions(base_amount: f64, ratio: f64, items: &[InsuranceItem]) -> Vec<InsuranceItemAmount> {
    items
        .iter()
        .map(|item| InsuranceItemAmount {
            id: item.id,
            name: item.name.clone(),
            personal_rate: item.personal_rate,
            company_rate: item.company_rate,
            personal_amount: base_amount * item.personal_rate * ratio,
            company_amount: base_amount * item.company_rate * ratio,
        })
        .collect()
}

/// The employee's own group, else the default group (lowest id).
async fn resolve_group(
    conn: &mut SqliteConnection,
    employee: &Employee,
) -> HrResult<Option<InsuranceGroup>> {
    if let Some(group_id) = employee.insurance_group_id {
        if let Some(group) = InsuranceGroup::find(conn, group_id).await? {
            return Ok(Some(group));
        }
    }
    let fallback = InsuranceGroup::default_group(conn).await?;
    match &fallback {
        Some(group) => warn!(
            employee_id = employee.id,
            group_id = group.id,
            "Employee has no insurance group, using the default group"
        ),
        None => warn!(employee_id = employee.id, "No insurance group configured"),
    }
    Ok(fallback)
}

pub async fn employee_insurance(
    conn: &mut SqliteConnection,
    employee: &Employee,
    month: Month,
) -> HrResult<InsuranceResult> {
    let total_days = i64::from(month.days());
    let (is_partial_month, work_days) =
        employment_days(month, employee.entry_date, employee.leave_date);
    let ratio = if is_partial_month {
        work_days as f64 / total_days as f64
    } else {
        1.0
    };

    let Some(group) = resolve_group(conn, employee).await? else {
        return Ok(InsuranceResult {
            group_id: None,
            personal_total: 0.0,
            company_total: 0.0,
            items: Vec::new(),
            base_amount: 0.0,
            is_partial_month,
            work_days,
            total_days,
            ratio,
        });
    };

    let mut items = Vec::with_capacity(group.items.len());
    for item_id in group.items.iter() {
        match InsuranceItem::find(conn, *item_id).await? {
            Some(item) => items.push(item),
            None => warn!(group_id = group.id, item_id, "Insurance group references a missing item"),
        }
    }

    let items = contributions(group.base_amount, ratio, &items);
    Ok(InsuranceResult {
        group_id: Some(group.id),
        personal_total: items.iter().map(|i| i.personal_amount).sum(),
        company_total: items.iter().map(|i| i.company_amount).sum(),
        items,
        base_amount: group.base_amount,
        is_partial_month,
        work_days,
        total_days,
        ratio,
    })
}

pub async fn calculate_employee_insurance(
    pool: &ConnectionPool,
    employee_id: i64,
    month: Month,
) -> HrResult<InsuranceResult> {
    with_connection!(pool, |conn| insurance_for(&mut conn, employee_id, month))
}

async fn insurance_for(
    conn: &mut SqliteConnection,
    employee_id: i64,
    month: Month,
) -> HrResult<InsuranceResult> {
    let employee = Employee::get(conn, employee_id).await?;
    employee_insurance(conn, &employee, month).await
}

async fn batch(
    conn: &mut SqliteConnection,
    month: Month,
    employee_id: Option<i64>,
) -> HrResult<Vec<EmployeeInsurance>> {
    let employees = match employee_id {
        Some(id) => vec![Employee::get(conn, id).await?],
        None => Employee::list(conn).await?,
    };
    let mut results = Vec::with_capacity(employees.len());
    for employee in &employees {
        let insurance = employee_insurance(conn, employee, month).await?;
        results.push(EmployeeInsurance {
            employee: employee.into(),
            insurance,
        });
    }
    Ok(results)
}

#[instrument(skip(pool), fields(month = %month))]
pub async fn calculate_social_security(
    pool: &ConnectionPool,
    month: Month,
    employee_id: Option<i64>,
) -> HrResult<Vec<EmployeeInsurance>> {
    let results = with_connection!(pool, |conn| batch(&mut conn, month, employee_id))?;
    info!(employees = results.len(), "Social security calculated");
    Ok(results)
}

fn validate_item(input: &InsuranceItemInput) -> HrResult<()> {
    require("name", Some(input.name.as_str()))?;
    validate_rate("personal_rate", input.personal_rate)?;
    validate_rate("company_rate", input.company_rate)
}

async fn validate_group(conn: &mut SqliteConnection, input: &mut InsuranceGroupInput) -> HrResult<()> {
    require("name", Some(input.name.as_str()))?;
    validate_non_negative("base_amount", input.base_amount)?;

    let mut seen = std::collections::HashSet::new();
    input.items.retain(|id| seen.insert(*id));

    let missing = InsuranceItem::missing_ids(conn, &input.items).await?;
    if !missing.is_empty() {
        return Err(HrError::validation(
            "items",
            format!("unknown insurance items: {missing:?}"),
        ));
    }
    Ok(())
}

pub async fn list_items(pool: &ConnectionPool) -> HrResult<Vec<InsuranceItem>> {
    with_connection!(pool, |conn| InsuranceItem::list(&mut conn))
}

pub async fn create_item(pool: &ConnectionPool, input: InsuranceItemInput) -> HrResult<InsuranceItem> {
    validate_item(&input)?;
    let item = with_connection!(pool, |conn| insert_item(&mut conn, &input))?;
    info!(item_id = item.id, name = %item.name, "Insurance item created");
    Ok(item)
}

pub async fn update_item(
    pool: &ConnectionPool,
    id: i64,
    input: InsuranceItemInput,
) -> HrResult<InsuranceItem> {
    validate_item(&input)?;
    with_connection!(pool, |conn| write_item(&mut conn, id, &input))
}

async fn insert_item(conn: &mut SqliteConnection, input: &InsuranceItemInput) -> HrResult<InsuranceItem> {
    let id = InsuranceItem::insert(conn, input).await?;
    InsuranceItem::get(conn, id).await
}

async fn write_item(
    conn: &mut SqliteConnection,
    id: i64,
    input: &InsuranceItemInput,
) -> HrResult<InsuranceItem> {
    if !InsuranceItem::update(conn, id, input).await? {
        return Err(HrError::NotFound(format!("insurance item {id}")));
    }
    InsuranceItem::get(conn, id).await
}

/// Deletes the item and strips its id from every group.
async fn remove_item(conn: &mut SqliteConnection, id: i64) -> HrResult<usize> {
    let mut tx = conn.begin().await?;
    if !InsuranceItem::delete(&mut tx, id).await? {
        return Err(HrError::NotFound(format!("insurance item {id}")));
    }
    let mut touched = 0;
    for group in InsuranceGroup::list(&mut tx).await? {
        if group.items.contains(&id) {
            let remaining: Vec<i64> = group.items.iter().copied().filter(|i| *i != id).collect();
            InsuranceGroup::set_items(&mut tx, group.id, &remaining).await?;
            touched += 1;
        }
    }
    tx.commit().await?;
    Ok(touched)
}

#[instrument(skip(pool))]
pub async fn delete_item(pool: &ConnectionPool, id: i64) -> HrResult<()> {
    let touched = with_connection!(pool, |conn| remove_item(&mut conn, id))?;
    info!(item_id = id, groups_updated = touched, "Insurance item deleted");
    Ok(())
}

pub async fn list_groups(pool: &ConnectionPool) -> HrResult<Vec<InsuranceGroup>> {
    with_connection!(pool, |conn| InsuranceGroup::list(&mut conn))
}

async fn insert_group(
    conn: &mut SqliteConnection,
    mut input: InsuranceGroupInput,
) -> HrResult<InsuranceGroup> {
    validate_group(conn, &mut input).await?;
    let id = InsuranceGroup::insert(conn, &input).await?;
    InsuranceGroup::get(conn, id).await
}

async fn write_group(
    conn: &mut SqliteConnection,
    id: i64,
    mut input: InsuranceGroupInput,
) -> HrResult<InsuranceGroup> {
    validate_group(conn, &mut input).await?;
    if !InsuranceGroup::update(conn, id, &input).await? {
        return Err(HrError::NotFound(format!("insurance group {id}")));
    }
    InsuranceGroup::get(conn, id).await
}

async fn remove_group(conn: &mut SqliteConnection, id: i64) -> HrResult<()> {
    if !InsuranceGroup::delete(conn, id).await? {
        return Err(HrError::NotFound(format!("insurance group {id}")));
    }
    Ok(())
}

pub async fn create_group(pool: &ConnectionPool, input: InsuranceGroupInput) -> HrResult<InsuranceGroup> {
    let group = with_connection!(pool, |conn| insert_group(&mut conn, input))?;
    info!(group_id = group.id, name = %group.name, "Insurance group created");
    Ok(group)
}

pub async fn update_group(
    pool: &ConnectionPool,
    id: i64,
    input: InsuranceGroupInput,
) -> HrResult<InsuranceGroup> {
    with_connection!(pool, |conn| write_group(&mut conn, id, input))
}

pub async fn delete_group(pool: &ConnectionPool, id: i64) -> HrResult<()> {
    with_connection!(pool, |conn| remove_group(&mut conn, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::model::employee::EmployeeFields;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn item(name: &str, personal: f64, company: f64) -> InsuranceItemInput {
        InsuranceItemInput {
            name: name.into(),
            personal_rate: personal,
            company_rate: company,
        }
    }

    #[test]
    fn work_days_for_partial_months() {
        let jan: Month = "2023-01".parse().unwrap();
        assert_eq!(employment_days(jan, None, None), (false, 31));
        assert_eq!(employment_days(jan, Some(d(2022, 5, 1)), None), (false, 31));
        assert_eq!(employment_days(jan, Some(d(2023, 1, 10)), None), (true, 22));
        assert_eq!(employment_days(jan, None, Some(d(2023, 1, 20))), (true, 20));
        assert_eq!(employment_days(jan, Some(d(2023, 1, 10)), Some(d(2023, 1, 20))), (true, 11));
        assert_eq!(employment_days(jan, Some(d(2023, 1, 1)), Some(d(2023, 1, 20))), (true, 20));
    }

    #[test]
    fn full_month_contribution_is_exact() {
        let items = [InsuranceItem {
            id: 1,
            name: "Pension".into(),
            personal_rate: 0.08,
            company_rate: 0.16,
            created_at: crate::db::now(),
            updated_at: crate::db::now(),
        }];
        let amounts = contributions(7321.5, 1.0, &items);
        assert_eq!(amounts[0].personal_amount, 7321.5 * 0.08);
        assert_eq!(amounts[0].company_amount, 7321.5 * 0.16);
    }

    #[tokio::test]
    async fn rates_outside_unit_interval_are_rejected() {
        let (_dir, pool) = test_pool().await;
        assert!(matches!(
            create_item(&pool, item("Bad", 1.2, 0.1)).await,
            Err(HrError::Validation { .. })
        ));
        assert!(create_item(&pool, item("", 0.1, 0.1)).await.is_err());
    }

    #[tokio::test]
    async fn unassigned_employee_uses_default_group_prorated() {
        let (_dir, pool) = test_pool().await;
        let pension = create_item(&pool, item("Pension", 0.08, 0.16)).await.unwrap();
        let medical = create_item(&pool, item("Medical", 0.02, 0.1)).await.unwrap();
        create_group(
            &pool,
            InsuranceGroupInput {
                name: "Standard".into(),
                description: None,
                base_amount: 5000.0,
                items: vec![pension.id, medical.id, pension.id],
            },
        )
        .await
        .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let employee_id = Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: "Zhao Lei".into(),
                employee_number: Some("E7".into()),
                entry_date: Some(d(2023, 1, 10)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;

        let month: Month = "2023-01".parse().unwrap();
        let result = calculate_employee_insurance(&pool, employee_id, month).await.unwrap();
        assert!(result.is_partial_month);
        assert_eq!(result.work_days, 22);
        assert_eq!(result.items.len(), 2);
        let ratio = 22.0 / 31.0;
        assert!((result.personal_total - 5000.0 * 0.10 * ratio).abs() < 1e-9);
        assert!((result.company_total - 5000.0 * 0.26 * ratio).abs() < 1e-9);

        let feb: Month = "2023-02".parse().unwrap();
        let batch = calculate_social_security(&pool, feb, None).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].insurance.ratio, 1.0);
        assert_eq!(batch[0].employee.id, employee_id);

        assert!(matches!(
            calculate_social_security(&pool, feb, Some(999)).await,
            Err(HrError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn group_items_must_exist_and_deleted_items_are_unlinked() {
        let (_dir, pool) = test_pool().await;
        let pension = create_item(&pool, item("Pension", 0.08, 0.16)).await.unwrap();
        let unknown = create_group(
            &pool,
            InsuranceGroupInput {
                name: "Broken".into(),
                description: None,
                base_amount: 1000.0,
                items: vec![pension.id, 42],
            },
        )
        .await;
        assert!(matches!(unknown, Err(HrError::Validation { .. })));

        let group = create_group(
            &pool,
            InsuranceGroupInput {
                name: "Basic".into(),
                description: Some("pension only".into()),
                base_amount: 1000.0,
                items: vec![pension.id],
            },
        )
        .await
        .unwrap();

        delete_item(&pool, pension.id).await.unwrap();
        let groups = list_groups(&pool).await.unwrap();
        assert_eq!(groups[0].id, group.id);
        assert!(groups[0].items.is_empty());
        assert!(matches!(delete_item(&pool, pension.id).await, Err(HrError::NotFound(_))));
    }
}
