pub mod attendance;
pub mod backup;
pub mod employee;
pub mod insurance;
pub mod position_change;
pub mod salary;
pub mod system;

use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::IntoParams;

use crate::error::HrResult;
use crate::utils::date_parser::Month;

/// `{ "success": true, "data": ... }`
pub fn success<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "data": data,
    }))
}

pub fn success_message(message: &str) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "message": message,
    }))
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PeriodQuery {
    /// Month as YYYY-MM
    #[param(example = "2023-01")]
    pub month: Option<String>,
    pub employee_id: Option<i64>,
}

impl PeriodQuery {
    pub fn month(&self) -> HrResult<Option<Month>> {
        self.month
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(str::parse)
            .transpose()
    }

    pub fn required_month(&self) -> HrResult<Month> {
        self.month()?
            .ok_or_else(|| crate::error::HrError::validation("month", "month is required"))
    }
}
