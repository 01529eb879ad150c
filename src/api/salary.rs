use actix_web::{HttpResponse, web};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::{PeriodQuery, success};
use crate::error::HrError;
use crate::lifecycle::AppState;
use crate::services::salary::{analyze_salary_cost, get_salary_history};
use crate::utils::date_parser::Month;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CalculateSalaryRequest {
    #[schema(example = "2023-01")]
    pub month: String,
    /// Only this employee; everyone when absent.
    pub employee_id: Option<i64>,
}

/// Calculate and store salaries for a month
#[utoipa::path(
    post,
    path = "/api/salary/calculate",
    request_body = CalculateSalaryRequest,
    responses(
        (status = 200, description = "Per-employee results and failures", body = Object, example = json!({
            "success": true,
            "data": {"run_id": "3f0c...", "month": "2023-01", "results": [{"record_id": 1, "actual_salary": 7980.4}],
                     "failures": [{"employee_id": 7, "name": "Li Na", "error": "Operation failed: ..."}]}
        })),
        (status = 400, description = "Malformed month", body = Object),
        (status = 404, description = "Employee not found", body = Object)
    ),
    tag = "Salary"
)]
pub async fn calculate_salary(
    state: web::Data<AppState>,
    payload: web::Json<CalculateSalaryRequest>,
) -> Result<HttpResponse, HrError> {
    let month: Month = payload.month.parse()?;
    let run = state.salary.calculate_salary(month, payload.employee_id).await?;
    Ok(success(run))
}

/// Stored salary records, newest month first
#[utoipa::path(
    get,
    path = "/api/salary/records",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Salary records", body = Object),
        (status = 400, description = "Malformed month", body = Object)
    ),
    tag = "Salary"
)]
pub async fn salary_records(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let records = get_salary_history(&state.pool, query.month()?, query.employee_id).await?;
    Ok(success(records))
}

/// Labour cost of a month by department and position
#[utoipa::path(
    get,
    path = "/api/salary/analysis",
    params(PeriodQuery),
    responses(
        (status = 200, description = "Cost breakdown", body = Object, example = json!({
            "success": true,
            "data": {"total_cost": 13000.0, "salary_cost": 10000.0, "insurance_cost": 3000.0,
                     "department_costs": [{"name": "Finance", "count": 1, "salary_cost": 10000.0,
                                           "insurance_cost": 3000.0, "total_cost": 13000.0}],
                     "position_costs": []}
        })),
        (status = 400, description = "month missing or malformed", body = Object)
    ),
    tag = "Salary"
)]
pub async fn salary_analysis(
    state: web::Data<AppState>,
    query: web::Query<PeriodQuery>,
) -> Result<HttpResponse, HrError> {
    let analysis = analyze_salary_cost(&state.pool, query.required_month()?).await?;
    Ok(success(analysis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::test_support::test_config;
    use crate::services::employee::{EmployeeInput, create_employee};
    use actix_web::{App, test};
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn calculate_then_read_records() {
        let (_dir, config) = test_config();
        let state = web::Data::new(AppState::init(config).await.unwrap());
        let mut custom = crate::model::JsonMap::new();
        custom.insert("base_salary".into(), json!(8000.0));
        create_employee(
            &state.pool,
            &state.cache,
            EmployeeInput {
                name: Some("Zhao Min".into()),
                employee_number: Some("E-100".into()),
                custom_fields: Some(custom),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/salary/calculate", web::post().to(calculate_salary))
                .route("/salary/records", web::get().to(salary_records)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/salary/calculate")
            .set_json(json!({"month": "2023-01"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data"]["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["results"][0]["base_salary"], json!(8000.0));

        let req = test::TestRequest::get().uri("/salary/records?month=2023-01").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn malformed_month_is_a_bad_request() {
        let (_dir, config) = test_config();
        let state = web::Data::new(AppState::init(config).await.unwrap());
        let app = test::init_service(
            App::new()
                .app_data(state)
                .route("/salary/calculate", web::post().to(calculate_salary)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/salary/calculate")
            .set_json(json!({"month": "2023/13"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], json!(false));
    }
}
