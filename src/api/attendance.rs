use actix_web::{HttpResponse, web};
use serde::Deserialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::api::{PeriodQuery, success};
use crate::error::HrError;
use crate::lifecycle::AppState;
use crate::model::JsonMap;
use crate::services::attendance::{self as service, rows_from_csv};

/// Rows come either as JSON objects or as CSV text with a header row.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportRequest {
    #[schema(value_type = Option<Vec<Object>>, example = json!([
        {"工号": "E-001", "日期": "2023-01-05", "状态": "正常", "迟到分钟": 0}
    ]))]
    pub rows: Option<Vec<JsonMap>>,
    #[schema(example = "工号,日期,状态\nE-001,2023-01-05,正常")]
    pub csv: Option<String>,
    /// Field name → source column name; `employee_id` and `date` are required.
    #[schema(example = json!({"employee_id": "工号", "date": "日期", "status": "状态", "late_minutes": "迟到分钟"}))]
    pub mapping: HashMap<String, String>,
}

/// List attendance rows
///
/// With `employee_id` and `month` the rows of that employee; otherwise every
/// row of `month`, or the latest 1000 rows.
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Attendance rows", body = Object),
        (status = 400, description = "Malformed month", body = Object)
    ),
    tag = "Attendance"
)]
pub async fn list_attendance(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let month = query.month()?;
    if let (Some(employee_id), Some(month)) = (query.employee_id, month) {
        let records = service::get_employee_attendance(&state.pool, employee_id, month).await?;
        return Ok(success(records));
    }
    let data = service::get_attendance_data(&state.pool, month).await?;
    Ok(success(data))
}

/// Import attendance rows
#[utoipa::path(
    post,
    path = "/api/attendance/import",
    request_body = ImportRequest,
    responses(
        (status = 200, description = "Rows imported; failed rows listed in errors", body = Object, example = json!({
            "success": true,
            "data": {"imported_count": 1, "errors": ["row 2: unknown employee 'E-999'"]}
        })),
        (status = 400, description = "Mapping incomplete or no rows supplied", body = Object)
    ),
    tag = "Attendance"
)]
pub async fn import_attendance(
    state: web::Data<AppState>,
    payload: web::Json<ImportRequest>,
) -> Result<HttpResponse, HrError> {
    let request = payload.into_inner();
    let rows = match (request.rows, request.csv) {
        (Some(rows), _) => rows,
        (None, Some(text)) => rows_from_csv(&text)?,
        (None, None) => return Err(HrError::validation("rows", "either rows or csv is required")),
    };
    let report = service::import_attendance(&state.pool, &state.cache, &rows, &request.mapping).await?;
    Ok(success(report))
}

/// Monthly attendance summary of one employee
#[utoipa::path(
    get,
    path = "/api/attendance/summary",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Summary", body = Object, example = json!({
            "success": true,
            "data": {"total_days": 2, "normal_days": 1, "late_count": 0, "early_leave_count": 0,
                     "absence_days": 1.0, "total_late_minutes": 0.0, "total_early_leave_minutes": 0.0,
                     "total_overtime_hours": 0.0, "custom_summary": {}}
        })),
        (status = 400, description = "employee_id or month missing", body = Object)
    ),
    tag = "Attendance"
)]
pub async fn attendance_summary(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let month = query.required_month()?;
    let employee_id = query
        .employee_id
        .ok_or_else(|| HrError::validation("employee_id", "employee_id is required"))?;
    let summary = service::calculate_attendance_summary(&state.pool, employee_id, month).await?;
    Ok(success(summary))
}
