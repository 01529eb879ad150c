use actix_web::{HttpResponse, web};

use crate::api::{PeriodQuery, success, success_message};
use crate::error::HrError;
use crate::lifecycle::AppState;
use crate::model::insurance::{InsuranceGroupInput, InsuranceItemInput};
use crate::services::insurance as service;

#[utoipa::path(
    get,
    path = "/api/insurance/items",
    responses((status = 200, description = "Insurance items", body = Object)),
    tag = "Insurance"
)]
pub async fn list_items(state: web::Data<AppState>) -> Result<HttpResponse, HrError> {
    Ok(success(service::list_items(&state.pool).await?))
}

/// Create insurance item; rates are fractions in [0, 1]
#[utoipa::path(
    post,
    path = "/api/insurance/items",
    request_body = InsuranceItemInput,
    responses(
        (status = 200, description = "Item created", body = Object),
        (status = 400, description = "Validation failed", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn create_item(
    state: web::Data<AppState>,
    payload: web::Json<InsuranceItemInput>,
) -> Result<HttpResponse, HrError> {
    Ok(success(service::create_item(&state.pool, payload.into_inner()).await?))
}

#[utoipa::path(
    put,
    path = "/api/insurance/items/{id}",
    params(("id" = i64, Path, description = "Insurance item id")),
    request_body = InsuranceItemInput,
    responses(
        (status = 200, description = "Item updated", body = Object),
        (status = 404, description = "Item not found", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn update_item(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<InsuranceItemInput>,
) -> Result<HttpResponse, HrError> {
    let item = service::update_item(&state.pool, path.into_inner(), payload.into_inner()).await?;
    Ok(success(item))
}

/// Delete insurance item and drop it from every group
#[utoipa::path(
    delete,
    path = "/api/insurance/items/{id}",
    params(("id" = i64, Path, description = "Insurance item id")),
    responses(
        (status = 200, description = "Item deleted", body = Object),
        (status = 404, description = "Item not found", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn delete_item(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    service::delete_item(&state.pool, path.into_inner()).await?;
    Ok(success_message("Insurance item deleted"))
}

#[utoipa::path(
    get,
    path = "/api/insurance/groups",
    responses((status = 200, description = "Insurance groups", body = Object)),
    tag = "Insurance"
)]
pub async fn list_groups(state: web::Data<AppState>) -> Result<HttpResponse, HrError> {
    Ok(success(service::list_groups(&state.pool).await?))
}

#[utoipa::path(
    post,
    path = "/api/insurance/groups",
    request_body = InsuranceGroupInput,
    responses(
        (status = 200, description = "Group created", body = Object),
        (status = 400, description = "Validation failed or unknown item id", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn create_group(
    state: web::Data<AppState>,
    payload: web::Json<InsuranceGroupInput>,
) -> Result<HttpResponse, HrError> {
    Ok(success(service::create_group(&state.pool, payload.into_inner()).await?))
}

#[utoipa::path(
    put,
    path = "/api/insurance/groups/{id}",
    params(("id" = i64, Path, description = "Insurance group id")),
    request_body = InsuranceGroupInput,
    responses(
        (status = 200, description = "Group updated", body = Object),
        (status = 404, description = "Group not found", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn update_group(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<InsuranceGroupInput>,
) -> Result<HttpResponse, HrError> {
    let group = service::update_group(&state.pool, path.into_inner(), payload.into_inner()).await?;
    Ok(success(group))
}

#[utoipa::path(
    delete,
    path = "/api/insurance/groups/{id}",
    params(("id" = i64, Path, description = "Insurance group id")),
    responses(
        (status = 200, description = "Group deleted", body = Object),
        (status = 404, description = "Group not found", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn delete_group(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    service::delete_group(&state.pool, path.into_inner()).await?;
    Ok(success_message("Insurance group deleted"))
}

/// Social security contributions for a month
///
/// One employee when `employee_id` is given, otherwise everyone.
#[utoipa::path(
    get,
    path = "/api/insurance/calculate",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Per-employee contributions", body = Object, example = json!({
            "success": true,
            "data": [{"employee": {"id": 1, "name": "Zhang Wei"}, "group_id": 1,
                      "personal_total": 400.0, "company_total": 800.0, "items": [],
                      "base_amount": 5000.0, "is_partial_month": false,
                      "work_days": 31, "total_days": 31, "ratio": 1.0}]
        })),
        (status = 400, description = "month missing or malformed", body = Object),
        (status = 404, description = "Employee not found", body = Object)
    ),
    tag = "Insurance"
)]
pub async fn calculate(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let month = query.required_month()?;
    let results = service::calculate_social_security(&state.pool, month, query.employee_id).await?;
    Ok(success(results))
}
