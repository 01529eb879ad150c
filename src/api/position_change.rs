use actix_web::{HttpResponse, web};
use serde_json::Value;

use crate::api::{PeriodQuery, success, success_message};
use crate::error::HrError;
use crate::lifecycle::AppState;
use crate::model::position_change::NewPositionChange;
use crate::services::employee as service;

/// List position changes, newest first
#[utoipa::path(
    get,
    path = "/api/position-changes",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Matching position changes", body = Object),
        (status = 400, description = "Malformed month", body = Object)
    ),
    tag = "Position"
)]
pub async fn list_position_changes(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let changes = service::get_position_changes(&state.pool, query.employee_id, query.month()?).await?;
    Ok(success(changes))
}

/// Record a position change and move the employee to the new position
#[utoipa::path(
    post,
    path = "/api/position-changes",
    request_body = NewPositionChange,
    responses(
        (status = 200, description = "Position change recorded", body = Object, example = json!({
            "success": true,
            "data": {"id": 3, "employee_id": 1, "old_position": "Clerk", "new_position": "Lead",
                     "old_salary": 6000.0, "new_salary": 9300.0, "effective_date": "2023-01-16"}
        })),
        (status = 400, description = "Validation failed", body = Object),
        (status = 404, description = "Employee not found", body = Object)
    ),
    tag = "Position"
)]
pub async fn add_position_change(
    state: web::Data<AppState>,
    payload: web::Json<NewPositionChange>,
) -> Result<HttpResponse, HrError> {
    let change = service::add_position_change(&state.pool, payload.into_inner()).await?;
    Ok(success(change))
}

/// Patch a position change
#[utoipa::path(
    put,
    path = "/api/position-changes/{id}",
    params(("id" = i64, Path, description = "Position change id")),
    request_body(content = Object, example = json!({"new_salary": 9500.0, "effective_date": "2023-01-20"})),
    responses(
        (status = 200, description = "Position change updated", body = Object),
        (status = 400, description = "Unknown or invalid field", body = Object),
        (status = 404, description = "Position change not found", body = Object)
    ),
    tag = "Position"
)]
pub async fn update_position_change(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<Value>,
) -> Result<HttpResponse, HrError> {
    let change = service::update_position_change(&state.pool, path.into_inner(), &payload).await?;
    Ok(success(change))
}

#[utoipa::path(
    delete,
    path = "/api/position-changes/{id}",
    params(("id" = i64, Path, description = "Position change id")),
    responses(
        (status = 200, description = "Position change deleted", body = Object),
        (status = 404, description = "Position change not found", body = Object)
    ),
    tag = "Position"
)]
pub async fn delete_position_change(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    service::delete_position_change(&state.pool, path.into_inner()).await?;
    Ok(success_message("Position change deleted"))
}
