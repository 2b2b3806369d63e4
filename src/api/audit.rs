use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::errors::AppError;
use crate::model::audit_log::{AUDIT_COLUMNS, AuditLog, AuditLogEntry};
use crate::models::Page;
use crate::utils::db_utils::{Filters, bind_query_as, bind_query_scalar};

const MAX_PAGE_SIZE: u64 = 200;

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(rename_all = "camelCase")]
pub struct AuditQuery {
    pub user_id: Option<u64>,
    /// leave | leave_balance | user | financial_year
    pub entity_type: Option<String>,
    /// create | update | cancel | approve | reject | rollover
    pub action: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

fn audit_filters(query: &AuditQuery) -> Filters {
    let non_blank = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let mut filters = Filters::new();
    filters
        .eq_opt("user_id", query.user_id)
        .eq_opt("entity_type", non_blank(&query.entity_type))
        .eq_opt("action", non_blank(&query.action));
    filters
}

#[utoipa::path(
    get,
    path = "/api/audit/logs",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit trail, newest first", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Audit"
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AuditQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;
    let page = Page::parse(query.page, query.limit, MAX_PAGE_SIZE)?;
    let pool = pool.get_ref();

    let filters = audit_filters(&query);
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs{where_clause}");
    let total: i64 = bind_query_scalar(sqlx::query_scalar(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_logs{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let logs = bind_query_as(sqlx::query_as::<_, AuditLog>(&sql), filters.values())
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    let logs: Vec<AuditLogEntry> = logs.into_iter().map(AuditLogEntry::from).collect();
    Ok(HttpResponse::Ok().json(json!({
        "logs": logs,
        "pagination": page.pagination(total),
    })))
}

#[utoipa::path(
    get,
    path = "/api/audit/logs/{id}",
    params(("id" = u64, Path, description = "Audit log id")),
    responses(
        (status = 200, description = "Audit entry with parsed snapshots", body = Object),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Audit log not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Audit"
)]
pub async fn get_audit_log(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let log = sqlx::query_as::<_, AuditLog>(&format!("SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE id = ?"))
        .bind(path.into_inner())
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(|| AppError::not_found("Audit Log Not Found", "Audit log not found"))?;

    Ok(HttpResponse::Ok().json(json!({ "log": AuditLogEntry::from(log) })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::db_utils::SqlValue;

    #[test]
    fn blank_filters_are_ignored() {
        let query = AuditQuery {
            user_id: Some(3),
            entity_type: Some("  ".into()),
            action: Some("approve".into()),
            page: None,
            limit: None,
        };
        let filters = audit_filters(&query);
        assert_eq!(filters.where_clause(), " WHERE user_id = ? AND action = ?");
        assert_eq!(filters.values()[1], SqlValue::String("approve".into()));
    }
}
