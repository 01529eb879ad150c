use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::ConnectionPool;
use crate::error::HrResult;
use crate::model::employee::{Employee, EmployeeBrief};
use crate::model::salary_record::{SalaryRecord, SalaryRecordValues};
use crate::services::attendance::{AttendanceSummary, attendance_summary};
use crate::services::insurance::{InsuranceResult, employee_insurance};
use crate::services::position::{
    RecordedSalaryBase, SalaryBaseSource, SalarySegment, salary_segments, weighted_salary,
};
use crate::utils::date_parser::Month;

pub const TAX_THRESHOLD: f64 = 5000.0;

/// Days per month and minutes per day used for attendance deductions,
/// independent of the actual calendar.
pub const DEDUCTION_DAYS_PER_MONTH: f64 = 30.0;
pub const DEDUCTION_MINUTES_PER_DAY: f64 = 480.0;

/// (upper bound of the taxable amount above the threshold, rate, quick deduction)
const TAX_BRACKETS: &[(f64, f64, f64)] = &[
    (3_000.0, 0.03, 0.0),
    (12_000.0, 0.10, 210.0),
    (25_000.0, 0.20, 1_410.0),
    (35_000.0, 0.25, 2_660.0),
    (55_000.0, 0.30, 4_410.0),
    (80_000.0, 0.35, 7_160.0),
    (f64::INFINITY, 0.45, 15_160.0),
];

/// Progressive individual income tax on the monthly taxable income.
pub fn calculate_tax(taxable_income: f64) -> f64 {
    if taxable_income <= TAX_THRESHOLD {
        return 0.0;
    }
    let amount = taxable_income - TAX_THRESHOLD;
    TAX_BRACKETS
        .iter()
        .find(|(upper, _, _)| amount <= *upper)
        .map_or(0.0, |(_, rate, quick)| amount * rate - quick)
}

pub fn attendance_deduction(base_salary: f64, summary: &AttendanceSummary) -> f64 {
    let daily = base_salary / DEDUCTION_DAYS_PER_MONTH;
    let per_minute = daily / DEDUCTION_MINUTES_PER_DAY;
    daily * summary.absence_days
        + per_minute * summary.total_late_minutes
        + per_minute * summary.total_early_leave_minutes
}

/// Persisted breakdown of one salary computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalaryDetails {
    pub base_salary: f64,
    pub attendance_deduction: f64,
    pub social_security_personal: f64,
    pub social_security_company: f64,
    pub tax: f64,
    pub actual_salary: f64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalaryResult {
    pub employee: EmployeeBrief,
    pub record_id: i64,
    pub base_salary: f64,
    pub attendance_deduction: f64,
    pub social_security: InsuranceResult,
    pub tax: f64,
    pub actual_salary: f64,
    pub attendance_summary: AttendanceSummary,
    pub position_salary_ratios: Vec<SalarySegment>,
    pub details: SalaryDetails,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalaryFailure {
    pub employee_id: i64,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SalaryRun {
    /// Correlates the run with its log lines.
    pub run_id: String,
    #[schema(value_type = String, example = "2023-01")]
    pub month: String,
    pub results: Vec<SalaryResult>,
    pub failures: Vec<SalaryFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct CostGroup {
    pub name: Option<String>,
    pub count: usize,
    pub salary_cost: f64,
    pub insurance_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct SalaryCostAnalysis {
    pub total_cost: f64,
    pub salary_cost: f64,
    pub insurance_cost: f64,
    pub department_costs: Vec<CostGroup>,
    pub position_costs: Vec<CostGroup>,
}

type PeriodKey = (i64, Month);

/// Computes and stores monthly salaries. Writes for one (employee, month)
/// are serialised in-process.
pub struct SalaryService {
    pool: Arc<ConnectionPool>,
    base: Arc<dyn SalaryBaseSource>,
    locks: Mutex<HashMap<PeriodKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SalaryService {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self::with_base_source(pool, Arc::new(RecordedSalaryBase))
    }

    pub fn with_base_source(pool: Arc<ConnectionPool>, base: Arc<dyn SalaryBaseSource>) -> Self {
        Self {
            pool,
            base,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_period(&self, key: PeriodKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks.entry(key).or_default().clone()
        };
        lock.lock_owned().await
    }

    async fn compute(
        &self,
        conn: &mut SqliteConnection,
        employee: &Employee,
        month: Month,
    ) -> HrResult<SalaryResult> {
        let segments = salary_segments(conn, employee, month, self.base.as_ref()).await?;
        let base_salary = weighted_salary(&segments);
        let summary = attendance_summary(conn, employee.id, month).await?;
        let deduction = attendance_deduction(base_salary, &summary);
        let social_security = employee_insurance(conn, employee, month).await?;

        let tax = calculate_tax(base_salary - social_security.personal_total - deduction);
        let actual_salary = base_salary - social_security.personal_total - deduction - tax;

        let details = SalaryDetails {
            base_salary,
            attendance_deduction: deduction,
            social_security_personal: social_security.personal_total,
            social_security_company: social_security.company_total,
            tax,
            actual_salary,
        };
        let details_json = serde_json::to_value(&details)?;
        let month_text = month.to_string();
        let record_id = SalaryRecord::upsert(
            conn,
            &SalaryRecordValues {
                employee_id: employee.id,
                month: &month_text,
                base_salary,
                actual_salary,
                deductions: deduction,
                insurance: social_security.personal_total,
                tax,
                details: &details_json,
            },
        )
        .await?;

        Ok(SalaryResult {
            employee: employee.into(),
            record_id,
            base_salary,
            attendance_deduction: deduction,
            social_security,
            tax,
            actual_salary,
            attendance_summary: summary,
            position_salary_ratios: segments,
            details,
        })
    }

    async fn calculate_one(&self, employee: &Employee, month: Month) -> HrResult<SalaryResult> {
        let _guard = self.lock_period((employee.id, month)).await;
        let mut conn = self.pool.acquire().await?;
        let outcome = self.compute(&mut conn, employee, month).await;
        self.pool.release(conn).await;
        outcome
    }

    async fn employees(&self, employee_id: Option<i64>) -> HrResult<Vec<Employee>> {
        let pool = &self.pool;
        match employee_id {
            Some(id) => Ok(vec![with_connection!(pool, |conn| Employee::get(&mut conn, id))?]),
            None => with_connection!(pool, |conn| Employee::list(&mut conn)),
        }
    }

    /// Computes and stores salaries for `month`. Each employee is computed
    /// independently; failures are collected next to the successful results.
    #[instrument(skip(self), fields(month = %month))]
    pub async fn calculate_salary(&self, month: Month, employee_id: Option<i64>) -> HrResult<SalaryRun> {
        let employees = self.employees(employee_id).await?;
        let mut run = SalaryRun {
            run_id: Uuid::new_v4().to_string(),
            month: month.to_string(),
            results: Vec::with_capacity(employees.len()),
            failures: Vec::new(),
        };

        for employee in &employees {
            match self.calculate_one(employee, month).await {
                Ok(result) => run.results.push(result),
                Err(e) => {
                    error!(run_id = %run.run_id, employee_id = employee.id, error = %e, "Salary calculation failed");
                    run.failures.push(SalaryFailure {
                        employee_id: employee.id,
                        name: employee.name.clone(),
                        error: e.user_message(),
                    });
                }
            }
        }

        info!(
            run_id = %run.run_id,
            calculated = run.results.len(),
            failed = run.failures.len(),
            "Salary run finished"
        );
        Ok(run)
    }
}

pub async fn get_salary_history(
    pool: &ConnectionPool,
    month: Option<Month>,
    employee_id: Option<i64>,
) -> HrResult<Vec<SalaryRecord>> {
    let month = month.map(|m| m.to_string());
    with_connection!(pool, |conn| SalaryRecord::history(&mut conn, month.as_deref(), employee_id))
}

fn add_cost(groups: &mut BTreeMap<Option<String>, CostGroup>, key: Option<String>, salary: f64, insurance: f64) {
    let group = groups.entry(key.clone()).or_insert_with(|| CostGroup {
        name: key,
        ..Default::default()
    });
    group.count += 1;
    group.salary_cost += salary;
    group.insurance_cost += insurance;
    group.total_cost += salary + insurance;
}

/// Salary cost is the base salary; insurance cost is the company share.
pub async fn analyze_salary_cost(pool: &ConnectionPool, month: Month) -> HrResult<SalaryCostAnalysis> {
    let month = month.to_string();
    let rows = with_connection!(pool, |conn| SalaryRecord::cost_rows(&mut conn, &month))?;

    let mut analysis = SalaryCostAnalysis::default();
    let mut departments = BTreeMap::new();
    let mut positions = BTreeMap::new();

    for row in rows {
        let insurance = row
            .details
            .get("social_security_company")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        analysis.salary_cost += row.base_salary;
        analysis.insurance_cost += insurance;
        add_cost(&mut departments, row.department, row.base_salary, insurance);
        add_cost(&mut positions, row.position, row.base_salary, insurance);
    }

    analysis.total_cost = analysis.salary_cost + analysis.insurance_cost;
    analysis.department_costs = departments.into_values().collect();
    analysis.position_costs = positions.into_values().collect();
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use crate::error::HrError;
    use crate::model::attendance::{AttendanceRecord, NewAttendance};
    use crate::model::employee::EmployeeFields;
    use crate::model::insurance::{InsuranceGroup, InsuranceGroupInput, InsuranceItem, InsuranceItemInput};
    use crate::model::position_change::PositionChange;
    use crate::services::position::SalaryBaseFuture;
    use chrono::NaiveDate;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    async fn seed_employee(pool: &ConnectionPool, number: &str, base_salary: f64) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        let mut custom = crate::model::JsonMap::new();
        custom.insert("base_salary".into(), json!(base_salary));
        let id = Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: format!("Employee {number}"),
                employee_number: Some(number.into()),
                department: Some("Finance".into()),
                position: Some("Clerk".into()),
                custom_fields: custom,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;
        id
    }

    #[test]
    fn tax_brackets() {
        assert_eq!(calculate_tax(5000.0), 0.0);
        assert_eq!(calculate_tax(-200.0), 0.0);
        assert!((calculate_tax(8000.0) - 90.0).abs() < 1e-9);
        assert!((calculate_tax(20000.0) - 1290.0).abs() < 1e-9);
        assert!((calculate_tax(5000.0 + 30_000.0) - (30_000.0 * 0.25 - 2_660.0)).abs() < 1e-9);
        assert!((calculate_tax(5000.0 + 100_000.0) - (100_000.0 * 0.45 - 15_160.0)).abs() < 1e-9);
    }

    #[test]
    fn deduction_uses_fixed_divisors() {
        let summary = AttendanceSummary {
            absence_days: 1.0,
            total_late_minutes: 48.0,
            total_early_leave_minutes: 24.0,
            ..Default::default()
        };
        // daily = 300, per minute = 0.625
        let deduction = attendance_deduction(9000.0, &summary);
        assert!((deduction - (300.0 + 30.0 + 15.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn full_pipeline_with_mid_month_change() {
        let (_dir, pool) = test_pool().await;
        let employee_id = seed_employee(&pool, "S1", 6000.0).await;

        let mut conn = pool.acquire().await.unwrap();
        let pension = InsuranceItem::insert(
            &mut conn,
            &InsuranceItemInput {
                name: "Pension".into(),
                personal_rate: 0.1,
                company_rate: 0.2,
            },
        )
        .await
        .unwrap();
        InsuranceGroup::insert(
            &mut conn,
            &InsuranceGroupInput {
                name: "Standard".into(),
                description: None,
                base_amount: 5000.0,
                items: vec![pension],
            },
        )
        .await
        .unwrap();
        PositionChange::insert(&mut conn, employee_id, Some("Clerk"), "Lead", 6200.0, 12400.0, d(2023, 1, 16))
            .await
            .unwrap();
        AttendanceRecord::insert(
            &mut conn,
            &NewAttendance {
                employee_id,
                date: d(2023, 1, 3),
                status: Some("absent".into()),
                work_hours: 0.0,
                late_minutes: 0.0,
                early_leave_minutes: 0.0,
                overtime_hours: 0.0,
                absence_days: 1.0,
                custom_data: Default::default(),
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;

        let service = SalaryService::new(pool.clone());
        let month: Month = "2023-01".parse().unwrap();
        let run = service.calculate_salary(month, Some(employee_id)).await.unwrap();
        assert!(run.failures.is_empty());
        let result = &run.results[0];

        let base = 6200.0 * 15.0 / 31.0 + 12400.0 * 16.0 / 31.0;
        assert!((result.base_salary - base).abs() < 1e-6);
        assert_eq!(result.position_salary_ratios.len(), 2);
        assert_eq!(result.social_security.personal_total, 500.0);
        assert_eq!(result.social_security.company_total, 1000.0);
        let deduction = base / 30.0;
        assert!((result.attendance_deduction - deduction).abs() < 1e-6);
        let tax = calculate_tax(base - 500.0 - deduction);
        assert!((result.tax - tax).abs() < 1e-6);
        assert!((result.actual_salary - (base - 500.0 - deduction - tax)).abs() < 1e-6);

        let history = get_salary_history(&pool, Some(month), Some(employee_id)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, result.record_id);
        assert_eq!(history[0].details["social_security_company"], json!(1000.0));
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn recalculation_updates_the_same_record() {
        let (_dir, pool) = test_pool().await;
        let employee_id = seed_employee(&pool, "S1", 8000.0).await;
        let service = Arc::new(SalaryService::new(pool.clone()));
        let month: Month = "2023-03".parse().unwrap();

        let (a, b) = tokio::join!(
            service.calculate_salary(month, Some(employee_id)),
            service.calculate_salary(month, Some(employee_id)),
        );
        let first = a.unwrap().results[0].record_id;
        assert_eq!(b.unwrap().results[0].record_id, first);

        let again = service.calculate_salary(month, None).await.unwrap();
        assert_eq!(again.results[0].record_id, first);
        assert_eq!(again.results[0].base_salary, 8000.0);

        let records = get_salary_history(&pool, None, None).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    struct FailingFor(i64);

    impl SalaryBaseSource for FailingFor {
        fn base_salary<'a>(
            &'a self,
            _conn: &'a mut SqliteConnection,
            employee: &'a Employee,
            _month: Month,
        ) -> SalaryBaseFuture<'a> {
            let failing = employee.id == self.0;
            Box::pin(async move {
                if failing {
                    Err(HrError::Internal("salary grade lookup failed".into()))
                } else {
                    Ok(5000.0)
                }
            })
        }
    }

    #[tokio::test]
    async fn batch_continues_past_failures() {
        let (_dir, pool) = test_pool().await;
        let broken = seed_employee(&pool, "S1", 0.0).await;
        seed_employee(&pool, "S2", 0.0).await;
        let service = SalaryService::with_base_source(pool.clone(), Arc::new(FailingFor(broken)));
        let month: Month = "2023-03".parse().unwrap();

        let run = service.calculate_salary(month, None).await.unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].employee_id, broken);
        assert_eq!(run.results[0].base_salary, 5000.0);

        assert!(matches!(
            service.calculate_salary(month, Some(4040)).await,
            Err(HrError::NotFound(_))
        ));
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn cost_analysis_groups_by_department_and_position() {
        let (_dir, pool) = test_pool().await;
        seed_employee(&pool, "S1", 6000.0).await;
        seed_employee(&pool, "S2", 4000.0).await;
        let service = SalaryService::new(pool.clone());
        let month: Month = "2023-03".parse().unwrap();
        service.calculate_salary(month, None).await.unwrap();

        let analysis = analyze_salary_cost(&pool, month).await.unwrap();
        assert_eq!(analysis.salary_cost, 10000.0);
        assert_eq!(analysis.insurance_cost, 0.0);
        assert_eq!(analysis.department_costs.len(), 1);
        assert_eq!(analysis.department_costs[0].name.as_deref(), Some("Finance"));
        assert_eq!(analysis.department_costs[0].count, 2);
        assert_eq!(analysis.position_costs[0].total_cost, 10000.0);

        let empty = analyze_salary_cost(&pool, "2020-01".parse().unwrap()).await.unwrap();
        assert_eq!(empty, SalaryCostAnalysis::default());
    }
}
