use actix_web::{HttpResponse, web};

use crate::api::{success, success_message};
use crate::error::HrError;
use crate::lifecycle::AppState;
use crate::services::employee::{self as service, EmployeeInput};

/// List employees
#[utoipa::path(
    get,
    path = "/api/employees",
    responses(
        (status = 200, description = "All employees ordered by id", body = Object, example = json!({
            "success": true,
            "data": [{"id": 1, "name": "Zhang Wei", "employee_number": "E-001"}]
        }))
    ),
    tag = "Employee"
)]
pub async fn list_employees(state: web::Data<AppState>) -> Result<HttpResponse, HrError> {
    let employees = service::list_employees(&state.pool).await?;
    Ok(success(employees))
}

/// Get employee by id
#[utoipa::path(
    get,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee id")),
    responses(
        (status = 200, description = "Employee found", body = Object),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "success": false,
            "error": "employee 42 not found"
        }))
    ),
    tag = "Employee"
)]
pub async fn get_employee(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    let employee = service::get_employee(&state.pool, path.into_inner()).await?;
    Ok(success(employee))
}

/// Create employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = EmployeeInput,
    responses(
        (status = 200, description = "Employee created", body = Object),
        (status = 400, description = "Validation failed", body = Object, example = json!({
            "success": false,
            "error": "employee_number: employee number or ID card is required"
        }))
    ),
    tag = "Employee"
)]
pub async fn create_employee(
    state: web::Data<AppState>,
    payload: web::Json<EmployeeInput>,
) -> Result<HttpResponse, HrError> {
    let employee = service::create_employee(&state.pool, &state.cache, payload.into_inner()).await?;
    Ok(success(employee))
}

/// Update employee; absent fields keep their value
#[utoipa::path(
    put,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee id")),
    request_body = EmployeeInput,
    responses(
        (status = 200, description = "Employee updated", body = Object),
        (status = 404, description = "Employee not found", body = Object)
    ),
    tag = "Employee"
)]
pub async fn update_employee(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<EmployeeInput>,
) -> Result<HttpResponse, HrError> {
    let employee =
        service::update_employee(&state.pool, &state.cache, path.into_inner(), payload.into_inner()).await?;
    Ok(success(employee))
}

/// Delete employee with their attendance, position changes and salary records
#[utoipa::path(
    delete,
    path = "/api/employees/{id}",
    params(("id" = i64, Path, description = "Employee id")),
    responses(
        (status = 200, description = "Employee deleted", body = Object, example = json!({
            "success": true,
            "message": "Employee deleted"
        })),
        (status = 404, description = "Employee not found", body = Object)
    ),
    tag = "Employee"
)]
pub async fn delete_employee(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    service::delete_employee(&state.pool, &state.cache, path.into_inner()).await?;
    Ok(success_message("Employee deleted"))
}
