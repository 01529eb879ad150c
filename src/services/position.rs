//! Splits a month into salary segments around position changes.

use chrono::NaiveDate;
use futures::future::BoxFuture;
use serde::Serialize;
use sqlx::SqliteConnection;
use utoipa::ToSchema;

use crate::error::HrResult;
use crate::model::employee::Employee;
use crate::model::position_change::PositionChange;
use crate::utils::date_parser::Month;

/// One stretch of the month at a fixed position and salary.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SalarySegment {
    pub position: Option<String>,
    pub salary: f64,
    pub days: i64,
    pub ratio: f64,
    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,
    /// Exclusive.
    #[schema(value_type = String, format = "date")]
    pub end_date: NaiveDate,
}

/// Builds the segment list from the changes effective inside `month`,
/// sorted by effective date.
///
/// With no changes the whole month is a single segment at `current_position`
/// and `base_salary`.
pub fn prorate(
    month: Month,
    current_position: Option<&str>,
    base_salary: f64,
    changes: &[PositionChange],
) -> Vec<SalarySegment> {
    let start = month.first_day();
    let end = month.end_exclusive();
    let total_days = f64::from(month.days());

    let in_month: Vec<&PositionChange> = changes
        .iter()
        .filter(|c| c.effective_date >= start && c.effective_date < end)
        .collect();

    let Some(first) = in_month.first() else {
        return vec![SalarySegment {
            position: current_position.map(str::to_string),
            salary: base_salary,
            days: i64::from(month.days()),
            ratio: 1.0,
            start_date: start,
            end_date: end,
        }];
    };

    let mut segments = Vec::with_capacity(in_month.len() + 1);
    let mut boundary = start;
    let mut position = first.old_position.clone();
    let mut salary = first.old_salary;

    let mut close = |from: NaiveDate, to: NaiveDate, position: Option<String>, salary: f64| {
        let days = (to - from).num_days();
        if days > 0 {
            segments.push(SalarySegment {
                position,
                salary,
                days,
                ratio: days as f64 / total_days,
                start_date: from,
                end_date: to,
            });
        }
    };

    for change in in_month {
        close(boundary, change.effective_date, position, salary);
        boundary = change.effective_date;
        position = Some(change.new_position.clone());
        salary = change.new_salary;
    }
    close(boundary, end, position, salary);

    segments
}

pub type SalaryBaseFuture<'a> = BoxFuture<'a, HrResult<f64>>;

/// Salary base for months where the employee has no position change.
pub trait SalaryBaseSource: Send + Sync {
    fn base_salary<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        employee: &'a Employee,
        month: Month,
    ) -> SalaryBaseFuture<'a>;
}

/// Latest position change before the month, then `custom_fields.base_salary`, then 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedSalaryBase;

impl SalaryBaseSource for RecordedSalaryBase {
    fn base_salary<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        employee: &'a Employee,
        month: Month,
    ) -> SalaryBaseFuture<'a> {
        Box::pin(async move {
            if let Some(change) =
                PositionChange::latest_before(conn, employee.id, month.first_day()).await?
            {
                return Ok(change.new_salary);
            }
            Ok(employee.custom_base_salary().unwrap_or(0.0))
        })
    }
}

/// Segments for one employee and month, read from the database.
pub async fn salary_segments(
    conn: &mut SqliteConnection,
    employee: &Employee,
    month: Month,
    base: &dyn SalaryBaseSource,
) -> HrResult<Vec<SalarySegment>> {
    let changes =
        PositionChange::for_employee_between(conn, employee.id, month.first_day(), month.end_exclusive())
            .await?;
    let base_salary = if changes.is_empty() {
        base.base_salary(conn, employee, month).await?
    } else {
        0.0
    };
    Ok(prorate(month, employee.position.as_deref(), base_salary, &changes))
}

/// `Σ salary × ratio` over the segments.
pub fn weighted_salary(segments: &[SalarySegment]) -> f64 {
    segments.iter().map(|s| s.salary * s.ratio).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now;

    fn change(date: (i32, u32, u32), old: (&str, f64), new: (&str, f64)) -> PositionChange {
        PositionChange {
            id: 0,
            employee_id: 1,
            old_position: Some(old.0.to_string()),
            new_position: new.0.to_string(),
            old_salary: old.1,
            new_salary: new.1,
            effective_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            created_at: now(),
        }
    }

    fn ratio_sum(segments: &[SalarySegment]) -> f64 {
        segments.iter().map(|s| s.ratio).sum()
    }

    #[test]
    fn no_changes_is_one_full_segment() {
        let month: Month = "2023-02".parse().unwrap();
        let segments = prorate(month, Some("Clerk"), 6000.0, &[]);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].ratio, 1.0);
        assert_eq!(segments[0].days, 28);
        assert_eq!(segments[0].position.as_deref(), Some("Clerk"));
        assert_eq!(weighted_salary(&segments), 6000.0);
    }

    #[test]
    fn mid_month_change_splits_by_days() {
        let month: Month = "2023-01".parse().unwrap();
        let changes = [change((2023, 1, 16), ("Clerk", 6000.0), ("Lead", 9300.0))];
        let segments = prorate(month, Some("Lead"), 0.0, &changes);

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].days, 15);
        assert_eq!(segments[0].position.as_deref(), Some("Clerk"));
        assert_eq!(segments[1].days, 16);
        assert_eq!(segments[1].salary, 9300.0);
        assert!((ratio_sum(&segments) - 1.0).abs() < 1e-6);

        let expected = 6000.0 * 15.0 / 31.0 + 9300.0 * 16.0 / 31.0;
        assert!((weighted_salary(&segments) - expected).abs() < 1e-9);
    }

    #[test]
    fn change_on_first_day_drops_empty_segment() {
        let month: Month = "2023-04".parse().unwrap();
        let changes = [
            change((2023, 4, 1), ("Clerk", 6000.0), ("Lead", 8000.0)),
            change((2023, 4, 11), ("Lead", 8000.0), ("Manager", 10000.0)),
            change((2023, 4, 21), ("Manager", 10000.0), ("Director", 15000.0)),
        ];
        let segments = prorate(month, None, 0.0, &changes);

        let days: Vec<i64> = segments.iter().map(|s| s.days).collect();
        assert_eq!(days, vec![10, 10, 10]);
        assert_eq!(segments[0].position.as_deref(), Some("Lead"));
        assert!((ratio_sum(&segments) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn changes_outside_the_month_are_ignored() {
        let month: Month = "2023-05".parse().unwrap();
        let changes = [change((2023, 6, 1), ("Clerk", 6000.0), ("Lead", 8000.0))];
        let segments = prorate(month, Some("Clerk"), 6000.0, &changes);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].ratio, 1.0);
    }
}
