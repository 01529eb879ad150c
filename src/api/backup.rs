use actix_web::{HttpResponse, web};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::{success, success_message};
use crate::error::HrError;
use crate::lifecycle::AppState;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateBackupRequest {
    /// Manual backups carry a description and are never trimmed.
    #[schema(example = "Before January payroll")]
    pub description: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/backups",
    responses((status = 200, description = "Backups, newest first", body = Object)),
    tag = "Backup"
)]
pub async fn list_backups(state: web::Data<AppState>) -> Result<HttpResponse, HrError> {
    Ok(success(state.backups.list_backups().await?))
}

/// Snapshot the database now
#[utoipa::path(
    post,
    path = "/api/backups",
    request_body = CreateBackupRequest,
    responses(
        (status = 200, description = "Backup created", body = Object, example = json!({
            "success": true,
            "data": {"id": 4, "filename": "backup_20230131_180000_123.db",
                     "description": "Before January payroll", "created_at": "2023-01-31T18:00:00"}
        }))
    ),
    tag = "Backup"
)]
pub async fn create_backup(
    state: web::Data<AppState>,
    payload: Option<web::Json<CreateBackupRequest>>,
) -> Result<HttpResponse, HrError> {
    let request = payload.map(web::Json::into_inner).unwrap_or_default();
    let backup = state.backups.create_backup(request.description.as_deref()).await?;
    Ok(success(backup))
}

#[utoipa::path(
    delete,
    path = "/api/backups/{id}",
    params(("id" = i64, Path, description = "Backup id")),
    responses(
        (status = 200, description = "Backup deleted", body = Object),
        (status = 404, description = "Backup not found", body = Object)
    ),
    tag = "Backup"
)]
pub async fn delete_backup(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    state.backups.delete_backup(path.into_inner()).await?;
    Ok(success_message("Backup deleted"))
}

/// Replace the live database with a backup
///
/// A safety snapshot of the current database is taken first and returned.
#[utoipa::path(
    post,
    path = "/api/backups/{id}/restore",
    params(("id" = i64, Path, description = "Backup id")),
    responses(
        (status = 200, description = "Database restored; data is the safety snapshot", body = Object),
        (status = 404, description = "Backup or its file not found", body = Object)
    ),
    tag = "Backup"
)]
pub async fn restore_backup(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, HrError> {
    let safety = state.backups.restore_backup(path.into_inner()).await?;
    state.cache.invalidate_all();
    Ok(success(safety))
}
