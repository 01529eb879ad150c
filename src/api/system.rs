use actix_web::{HttpResponse, web};

use crate::api::success;
use crate::lifecycle::AppState;

/// Pool statistics, running background tasks and the latest resource sample
#[utoipa::path(
    get,
    path = "/api/system/status",
    responses(
        (status = 200, description = "System status", body = Object, example = json!({
            "success": true,
            "data": {"started_at": "2023-01-31 09:00:00", "uptime_secs": 3600,
                     "pool": {"max_size": 10, "size": 2, "idle": 2, "active": 0, "total_created": 2},
                     "background_tasks": ["auto-backup", "leak-watchdog", "resource-monitor"],
                     "resources": null}
        }))
    ),
    tag = "System"
)]
pub async fn system_status(state: web::Data<AppState>) -> HttpResponse {
    success(state.status())
}
