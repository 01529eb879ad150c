use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::db::ConnectionPool;
use crate::error::{HrError, HrResult};
use crate::model::JsonMap;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, NewAttendance};
use crate::model::employee::Employee;
use crate::utils::date_parser::{Month, parse_date_value};
use crate::utils::employee_cache::EmployeeCache;
use crate::utils::validator::{coerce_number, validate_mapping};

const REQUIRED_FIELDS: &[&str] = &["employee_id", "date"];
const NUMERIC_FIELDS: &[&str] = &[
    "work_hours",
    "late_minutes",
    "early_leave_minutes",
    "overtime_hours",
    "absence_days",
];
/// Row cap for the unfiltered attendance listing.
const LATEST_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ImportReport {
    pub imported_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttendanceData {
    pub items: Vec<AttendanceRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AttendanceSummary {
    pub total_days: usize,
    pub normal_days: usize,
    pub late_count: usize,
    pub early_leave_count: usize,
    pub absence_days: f64,
    pub total_late_minutes: f64,
    pub total_early_leave_minutes: f64,
    pub total_overtime_hours: f64,
    /// Sum per custom key, or an occurrence count when any value is non-numeric.
    pub custom_summary: BTreeMap<String, f64>,
}

#[derive(Default)]
struct CustomTally {
    sum: f64,
    occurrences: usize,
    numeric: bool,
}

/// Reduces one employee's monthly rows into a summary.
pub fn summarize(records: &[AttendanceRecord]) -> AttendanceSummary {
    let mut summary = AttendanceSummary {
        total_days: records.len(),
        ..Default::default()
    };
    let mut custom: BTreeMap<&str, CustomTally> = BTreeMap::new();

    for record in records {
        if AttendanceStatus::is_normal(record.status.as_deref()) {
            summary.normal_days += 1;
        }
        if record.late_minutes > 0.0 {
            summary.late_count += 1;
            summary.total_late_minutes += record.late_minutes;
        }
        if record.early_leave_minutes > 0.0 {
            summary.early_leave_count += 1;
            summary.total_early_leave_minutes += record.early_leave_minutes;
        }
        if record.absence_days > 0.0 {
            summary.absence_days += record.absence_days;
        }
        if record.overtime_hours > 0.0 {
            summary.total_overtime_hours += record.overtime_hours;
        }

        for (key, value) in record.custom_data.iter() {
            let tally = custom.entry(key.as_str()).or_insert(CustomTally {
                numeric: true,
                ..Default::default()
            });
            tally.occurrences += 1;
            match coerce_number(value) {
                Some(n) => tally.sum += n,
                None => tally.numeric = false,
            }
        }
    }

    summary.custom_summary = custom
        .into_iter()
        .map(|(key, tally)| {
            let value = if tally.numeric {
                tally.sum
            } else {
                tally.occurrences as f64
            };
            (key.to_string(), value)
        })
        .collect();
    summary
}

/// Header row names the columns; every cell is kept as text.
pub fn rows_from_csv(text: &str) -> HrResult<Vec<JsonMap>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| HrError::Parse(format!("unreadable CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| HrError::Parse(format!("CSV row {}: {e}", index + 1)))?;
        let row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), Value::String(v.to_string())))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// Text form of a cell; integral floats lose their `.0`.
fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    cell_text(value).is_none()
}

fn cell<'r>(row: &'r JsonMap, mapping: &HashMap<String, String>, field: &str) -> Option<&'r Value> {
    mapping
        .get(field)
        .filter(|column| !column.trim().is_empty())
        .and_then(|column| row.get(column))
}

async fn resolve_employee(
    conn: &mut SqliteConnection,
    cache: &EmployeeCache,
    identifier: &str,
) -> HrResult<Option<i64>> {
    if let Some(id) = cache.lookup(identifier).await {
        return Ok(Some(id));
    }
    let employee = Employee::find_by_identifier(conn, identifier).await?;
    if let Some(employee) = &employee {
        cache.remember(employee).await;
    }
    Ok(employee.map(|e| e.id))
}

async fn parse_row(
    conn: &mut SqliteConnection,
    cache: &EmployeeCache,
    row: &JsonMap,
    mapping: &HashMap<String, String>,
) -> HrResult<NewAttendance> {
    let identifier = cell(row, mapping, "employee_id")
        .and_then(cell_text)
        .ok_or_else(|| HrError::validation("employee_id", "employee identifier is empty"))?;
    let employee_id = resolve_employee(conn, cache, &identifier)
        .await?
        .ok_or_else(|| HrError::NotFound(format!("employee '{identifier}'")))?;

    let raw_date = cell(row, mapping, "date").cloned().unwrap_or(Value::Null);
    let date = parse_date_value(&raw_date)
        .ok_or_else(|| HrError::Parse(format!("unrecognised date: {raw_date}")))?;

    let mut numbers = [0.0; 5];
    for (slot, field) in numbers.iter_mut().zip(NUMERIC_FIELDS) {
        let Some(value) = cell(row, mapping, field).filter(|v| !is_blank(v)) else {
            continue;
        };
        let n = coerce_number(value)
            .ok_or_else(|| HrError::Parse(format!("{field} is not a number: {value}")))?;
        if n < 0.0 {
            return Err(HrError::validation(*field, format!("must not be negative, got {n}")));
        }
        *slot = n;
    }
    let [work_hours, late_minutes, early_leave_minutes, overtime_hours, absence_days] = numbers;

    let status = cell(row, mapping, "status")
        .and_then(cell_text)
        .map(|s| AttendanceStatus::normalize(&s));

    let custom_data = mapping
        .iter()
        .filter(|(key, _)| {
            let key = key.as_str();
            !REQUIRED_FIELDS.contains(&key) && !NUMERIC_FIELDS.contains(&key) && key != "status"
        })
        .filter_map(|(key, column)| row.get(column).map(|v| (key.clone(), v.clone())))
        .collect();

    Ok(NewAttendance {
        employee_id,
        date,
        status,
        work_hours,
        late_minutes,
        early_leave_minutes,
        overtime_hours,
        absence_days,
        custom_data,
    })
}

async fn import_rows(
    conn: &mut SqliteConnection,
    cache: &EmployeeCache,
    rows: &[JsonMap],
    mapping: &HashMap<String, String>,
) -> HrResult<ImportReport> {
    let mut report = ImportReport::default();
    for (index, row) in rows.iter().enumerate() {
        let outcome = match parse_row(conn, cache, row, mapping).await {
            Ok(record) => AttendanceRecord::insert(conn, &record).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => report.imported_count += 1,
            Err(e) => report.errors.push(format!("row {}: {}", index + 1, e.user_message())),
        }
    }
    Ok(report)
}

/// Imports spreadsheet rows. `mapping` maps field names to source column
/// names and must name `employee_id` and `date`. Bad rows are reported and
/// skipped.
#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn import_attendance(
    pool: &ConnectionPool,
    cache: &EmployeeCache,
    rows: &[JsonMap],
    mapping: &HashMap<String, String>,
) -> HrResult<ImportReport> {
    validate_mapping(mapping, REQUIRED_FIELDS)?;
    let report = with_connection!(pool, |conn| import_rows(&mut conn, cache, rows, mapping))?;
    if report.errors.is_empty() {
        info!(imported = report.imported_count, "Attendance import finished");
    } else {
        warn!(
            imported = report.imported_count,
            failed = report.errors.len(),
            "Attendance import finished with errors"
        );
    }
    Ok(report)
}

async fn load_data(conn: &mut SqliteConnection, month: Option<Month>) -> HrResult<AttendanceData> {
    let items = match month {
        Some(month) => AttendanceRecord::in_month(conn, month).await?,
        None => AttendanceRecord::latest(conn, LATEST_LIMIT).await?,
    };
    Ok(AttendanceData {
        total: items.len(),
        items,
    })
}

/// Rows for `month`, or the latest rows when no month is given.
pub async fn get_attendance_data(pool: &ConnectionPool, month: Option<Month>) -> HrResult<AttendanceData> {
    with_connection!(pool, |conn| load_data(&mut conn, month))
}

pub async fn get_employee_attendance(
    pool: &ConnectionPool,
    employee_id: i64,
    month: Month,
) -> HrResult<Vec<AttendanceRecord>> {
    with_connection!(pool, |conn| AttendanceRecord::for_employee_in_month(&mut conn, employee_id, month))
}

pub async fn attendance_summary(
    conn: &mut SqliteConnection,
    employee_id: i64,
    month: Month,
) -> HrResult<AttendanceSummary> {
    let records = AttendanceRecord::for_employee_in_month(conn, employee_id, month).await?;
    Ok(summarize(&records))
}

pub async fn calculate_attendance_summary(
    pool: &ConnectionPool,
    employee_id: i64,
    month: Month,
) -> HrResult<AttendanceSummary> {
    with_connection!(pool, |conn| attendance_summary(&mut conn, employee_id, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::now;
    use crate::db::test_support::test_pool;
    use crate::model::employee::EmployeeFields;
    use chrono::NaiveDate;
    use serde_json::json;
    use sqlx::types::Json;

    fn record(status: &str, late: f64, absence: f64, custom: Value) -> AttendanceRecord {
        AttendanceRecord {
            id: 0,
            employee_id: 1,
            date: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            status: Some(status.to_string()),
            work_hours: 8.0,
            late_minutes: late,
            early_leave_minutes: 0.0,
            overtime_hours: 0.0,
            absence_days: absence,
            custom_data: Json(custom.as_object().cloned().unwrap_or_default()),
            created_at: now(),
        }
    }

    fn mapping(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn row(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    async fn seed_employee(pool: &ConnectionPool, number: &str) -> i64 {
        let mut conn = pool.acquire().await.unwrap();
        let id = Employee::insert(
            &mut conn,
            &EmployeeFields {
                name: "Chen Jie".into(),
                employee_number: Some(number.into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        pool.release(conn).await;
        id
    }

    #[test]
    fn summary_counts_and_sums() {
        let records = [
            record("normal", 0.0, 0.0, json!({ "meal_allowance": 15, "remark": "ok" })),
            record("正常", 12.0, 0.0, json!({ "meal_allowance": "15.5" })),
            record("absent", 0.0, 0.5, json!({ "remark": 3 })),
        ];
        let summary = summarize(&records);

        assert_eq!(summary.total_days, 3);
        assert_eq!(summary.normal_days, 2);
        assert_eq!(summary.late_count, 1);
        assert_eq!(summary.total_late_minutes, 12.0);
        assert_eq!(summary.absence_days, 0.5);
        assert_eq!(summary.custom_summary["meal_allowance"], 30.5);
        // "ok" is not numeric, so every occurrence is counted instead.
        assert_eq!(summary.custom_summary["remark"], 2.0);
    }

    #[test]
    fn csv_rows_keep_headers() {
        let rows = rows_from_csv("工号,日期,状态\nE1, 2023-01-03 ,正常\nE2,44929,缺勤\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["日期"], json!("2023-01-03"));
        assert_eq!(rows[1]["工号"], json!("E2"));
    }

    #[test]
    fn integral_cells_drop_fraction() {
        assert_eq!(cell_text(&json!(1001.0)).as_deref(), Some("1001"));
        assert_eq!(cell_text(&json!(1001)).as_deref(), Some("1001"));
        assert_eq!(cell_text(&json!("  ")), None);
    }

    #[tokio::test]
    async fn import_then_summarise_month() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();
        let employee_id = seed_employee(&pool, "X1").await;

        let rows = vec![
            row(json!({ "工号": "X1", "日期": "2023-01-03", "状态": "normal", "缺勤天数": 0 })),
            row(json!({ "工号": "X1", "日期": "2023/01/04", "状态": "absent", "缺勤天数": 1 })),
        ];
        let mapping = mapping(&[
            ("employee_id", "工号"),
            ("date", "日期"),
            ("status", "状态"),
            ("absence_days", "缺勤天数"),
        ]);
        let report = import_attendance(&pool, &cache, &rows, &mapping).await.unwrap();
        assert_eq!(report.imported_count, 2);
        assert!(report.errors.is_empty());

        let month: Month = "2023-01".parse().unwrap();
        let data = get_attendance_data(&pool, Some(month)).await.unwrap();
        assert_eq!(data.total, 2);

        let summary = calculate_attendance_summary(&pool, employee_id, month).await.unwrap();
        assert_eq!(summary.normal_days, 1);
        assert_eq!(summary.absence_days, 1.0);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn bad_rows_are_reported_not_fatal() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();
        seed_employee(&pool, "X1").await;

        let rows = vec![
            row(json!({ "id": "X1", "day": "2023-01-03", "shift": "night" })),
            row(json!({ "id": "NOPE", "day": "2023-01-03" })),
            row(json!({ "id": "X1", "day": "not a date" })),
            row(json!({ "id": "X1", "day": "2023-01-05", "late": "-5" })),
        ];
        let mapping = mapping(&[
            ("employee_id", "id"),
            ("date", "day"),
            ("late_minutes", "late"),
            ("shift", "shift"),
        ]);
        let report = import_attendance(&pool, &cache, &rows, &mapping).await.unwrap();
        assert_eq!(report.imported_count, 1);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].starts_with("row 2"));

        let data = get_attendance_data(&pool, None).await.unwrap();
        assert_eq!(data.items[0].custom_data.get("shift"), Some(&json!("night")));
    }

    #[tokio::test]
    async fn mapping_must_name_required_columns() {
        let (_dir, pool) = test_pool().await;
        let cache = EmployeeCache::default();
        let result = import_attendance(&pool, &cache, &[], &mapping(&[("employee_id", "id")])).await;
        assert!(matches!(result, Err(HrError::Validation { .. })));
    }
}
