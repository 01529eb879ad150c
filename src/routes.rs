use crate::{
    api::{attendance, backup, employee, insurance, position_change, salary, system},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::web;

type LimiterConfig = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Per-IP limiter settings, built once and shared by every worker.
#[derive(Clone)]
pub struct RateLimits {
    protected: LimiterConfig,
    import: LimiterConfig,
}

fn build_limiter(requests_per_min: u32) -> LimiterConfig {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / u64::from(requests_per_min)).max(1);
    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_else(|| {
            tracing::warn!(requests_per_min, "Invalid rate limit, using the default limiter");
            GovernorConfig::default()
        })
}

impl RateLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            protected: build_limiter(config.rate_protected_per_min),
            import: build_limiter(config.rate_import_per_min),
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limits: &RateLimits) {
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(Governor::new(&limits.protected))
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::get().to(employee::list_employees))
                            .route(web::post().to(employee::create_employee)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::put().to(employee::update_employee))
                            .route(web::delete().to(employee::delete_employee)),
                    ),
            )
            .service(
                web::scope("/position-changes")
                    .service(
                        web::resource("")
                            .route(web::get().to(position_change::list_position_changes))
                            .route(web::post().to(position_change::add_position_change)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::put().to(position_change::update_position_change))
                            .route(web::delete().to(position_change::delete_position_change)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    // imports are heavy; separate, tighter limit
                    .service(
                        web::resource("/import")
                            .wrap(Governor::new(&limits.import))
                            .route(web::post().to(attendance::import_attendance)),
                    )
                    .service(
                        web::resource("/summary").route(web::get().to(attendance::attendance_summary)),
                    ),
            )
            .service(
                web::scope("/insurance")
                    .service(
                        web::resource("/items")
                            .route(web::get().to(insurance::list_items))
                            .route(web::post().to(insurance::create_item)),
                    )
                    .service(
                        web::resource("/items/{id}")
                            .route(web::put().to(insurance::update_item))
                            .route(web::delete().to(insurance::delete_item)),
                    )
                    .service(
                        web::resource("/groups")
                            .route(web::get().to(insurance::list_groups))
                            .route(web::post().to(insurance::create_group)),
                    )
                    .service(
                        web::resource("/groups/{id}")
                            .route(web::put().to(insurance::update_group))
                            .route(web::delete().to(insurance::delete_group)),
                    )
                    .service(web::resource("/calculate").route(web::get().to(insurance::calculate))),
            )
            .service(
                web::scope("/salary")
                    .service(web::resource("/calculate").route(web::post().to(salary::calculate_salary)))
                    .service(web::resource("/records").route(web::get().to(salary::salary_records)))
                    .service(web::resource("/analysis").route(web::get().to(salary::salary_analysis))),
            )
            .service(
                web::scope("/backups")
                    .service(
                        web::resource("")
                            .route(web::get().to(backup::list_backups))
                            .route(web::post().to(backup::create_backup)),
                    )
                    .service(web::resource("/{id}").route(web::delete().to(backup::delete_backup)))
                    .service(
                        web::resource("/{id}/restore").route(web::post().to(backup::restore_backup)),
                    ),
            )
            .service(web::resource("/system/status").route(web::get().to(system::system_status))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::AppState;
    use crate::lifecycle::test_support::test_config;
    use actix_web::{App, test, test::TestRequest};
    use serde_json::{Value, json};

    #[actix_web::test]
    async fn employee_and_attendance_flow() {
        let (_dir, config) = test_config();
        let limits = RateLimits::from_config(&config);
        let state = web::Data::new(AppState::init(config.clone()).await.unwrap());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(|cfg| configure(cfg, &config, &limits)),
        )
        .await;
        let peer = "127.0.0.1:40000".parse().unwrap();

        let req = TestRequest::post()
            .uri("/api/employees")
            .peer_addr(peer)
            .set_json(json!({"name": "Chen Jie", "employee_number": "E-7"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], json!(true));
        let id = body["data"]["id"].as_i64().unwrap();

        let req = TestRequest::post()
            .uri("/api/attendance/import")
            .peer_addr(peer)
            .set_json(json!({
                "csv": "工号,日期,状态\nE-7,2023-01-05,正常\nE-7,2023-01-06,旷工\nE-404,2023-01-06,正常",
                "mapping": {"employee_id": "工号", "date": "日期", "status": "状态"}
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["imported_count"], json!(2));
        assert_eq!(body["data"]["errors"].as_array().unwrap().len(), 1);

        let req = TestRequest::get()
            .uri(&format!("/api/attendance/summary?employee_id={id}&month=2023-01"))
            .peer_addr(peer)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total_days"], json!(2));
        assert_eq!(body["data"]["normal_days"], json!(1));

        let req = TestRequest::get().uri("/api/employees/9999").peer_addr(peer).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

        let req = TestRequest::get().uri("/api/system/status").peer_addr(peer).to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["pool"]["max_size"], json!(10));
    }
}
