use actix_web::{HttpResponse, http::header, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::errors::AppError;
use crate::model::notification::{NOTIFICATION_COLUMNS, Notification, NotificationCategory, NotificationKind};
use crate::model::role::Role;
use crate::models::Page;
use crate::utils::db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar};
use crate::utils::realtime::NotificationHub;

const MAX_PAGE_SIZE: u64 = 50;
const MAX_AUDIT_PAGE_SIZE: u64 = 200;
const DEFAULT_AUDIT_PAGE_SIZE: u64 = 50;

fn notification_not_found() -> AppError {
    AppError::not_found("Notification Not Found", "Notification not found")
}

/// Rows addressed to the caller, plus rows targeted at the caller's role.
fn visible_to(filters: &mut Filters, auth: &AuthUser) {
    filters.raw(
        "(user_id = ? OR LOWER(recipient_role) = ?)",
        vec![SqlValue::U64(auth.user_id), SqlValue::String(auth.role.to_string())],
    );
}

fn parse_kind(raw: Option<&str>) -> Result<Option<NotificationKind>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| AppError::field("type", "Type must be info, success, warning or error"))
        })
        .transpose()
}

fn parse_category(raw: Option<&str>) -> Result<Option<NotificationCategory>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| AppError::field("category", "Unknown notification category")))
        .transpose()
}

async fn fetch_notification(pool: &MySqlPool, id: u64) -> Result<Option<Notification>, sqlx::Error> {
    sqlx::query_as::<_, Notification>(&format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

async fn fetch_page(
    pool: &MySqlPool,
    filters: &Filters,
    page: Page,
) -> Result<(Vec<Notification>, crate::models::Pagination), AppError> {
    let where_clause = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM notifications{where_clause}");
    let total: i64 = bind_query_scalar(sqlx::query_scalar(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications{where_clause} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
    );
    let rows = bind_query_as(sqlx::query_as::<_, Notification>(&sql), filters.values())
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok((rows, page.pagination(total)))
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(rename_all = "camelCase")]
pub struct NotificationQuery {
    pub is_read: Option<bool>,
    /// info | success | warning | error
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// leave_request | leave_approval | leave_rejection | system | reminder
    pub category: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/* =========================
Caller's notifications
========================= */
#[utoipa::path(
    get,
    path = "/api/notifications",
    params(NotificationQuery),
    responses(
        (status = 200, description = "Own and role-targeted notifications, newest first", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn list_notifications(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<NotificationQuery>,
) -> Result<HttpResponse, AppError> {
    let page = Page::parse(query.page, query.limit, MAX_PAGE_SIZE)?;
    let kind = parse_kind(query.kind.as_deref())?;
    let category = parse_category(query.category.as_deref())?;

    let mut filters = Filters::new();
    visible_to(&mut filters, &auth);
    filters
        .eq_opt("is_read", query.is_read)
        .eq_opt("notification_type", kind.map(|k| k.to_string()))
        .eq_opt("category", category.map(|c| c.to_string()));

    let (notifications, pagination) = fetch_page(pool.get_ref(), &filters, page).await?;
    Ok(HttpResponse::Ok().json(json!({
        "notifications": notifications,
        "pagination": pagination,
    })))
}

/// Counts only rows the caller can mark read; role-wide rows never clear.
fn unread_filters(auth: &AuthUser) -> Filters {
    let mut filters = Filters::new();
    filters.eq("user_id", auth.user_id).eq("is_read", false);
    filters
}

#[utoipa::path(
    get,
    path = "/api/notifications/unread/count",
    responses(
        (status = 200, description = "Unread notifications addressed to the caller", body = Object, example = json!({ "unreadCount": 3 })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn unread_count(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let filters = unread_filters(&auth);

    let sql = format!("SELECT COUNT(*) FROM notifications{}", filters.where_clause());
    let count: i64 = bind_query_scalar(sqlx::query_scalar(&sql), filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "unreadCount": count })))
}

/* =========================
Realtime stream
========================= */
#[utoipa::path(
    get,
    path = "/api/notifications/stream",
    responses(
        (status = 200, description = "Server-sent events named newNotification", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn notification_stream(auth: AuthUser, hub: web::Data<NotificationHub>) -> HttpResponse {
    info!(user_id = auth.user_id, subscribers = hub.subscriber_count(), "Realtime client connected");

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .insert_header(("X-Accel-Buffering", "no"))
        .streaming(hub.stream_for(auth.user_id))
}

/* =========================
Single notification
========================= */
#[utoipa::path(
    get,
    path = "/api/notifications/{id}",
    params(("id" = u64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification", body = Object),
        (status = 403, description = "Neither addressed to the caller nor to the caller's role"),
        (status = 404, description = "Notification not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn get_notification(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let notification = fetch_notification(pool.get_ref(), path.into_inner())
        .await?
        .ok_or_else(notification_not_found)?;

    if !notification.visible_to(auth.user_id, auth.role) {
        return Err(AppError::forbidden("You can only view your own notifications"));
    }

    Ok(HttpResponse::Ok().json(json!({ "notification": notification })))
}

#[utoipa::path(
    put,
    path = "/api/notifications/{id}/read",
    params(("id" = u64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked as read", body = Object),
        (status = 403, description = "Not the recipient"),
        (status = 404, description = "Notification not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn mark_read(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let pool = pool.get_ref();

    let notification = fetch_notification(pool, id).await?.ok_or_else(notification_not_found)?;
    if notification.user_id != auth.user_id {
        return Err(AppError::forbidden("You can only mark your own notifications as read"));
    }

    sqlx::query("UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, NOW()) WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    let notification = fetch_notification(pool, id).await?.ok_or_else(notification_not_found)?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Notification marked as read",
        "notification": notification,
    })))
}

#[utoipa::path(
    put,
    path = "/api/notifications/read-all",
    responses(
        (status = 200, description = "Every unread notification of the caller marked read", body = Object, example = json!({
            "message": "All notifications marked as read",
            "updatedCount": 4
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn mark_all_read(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let result = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = NOW() WHERE user_id = ? AND is_read = FALSE",
    )
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "All notifications marked as read",
        "updatedCount": result.rows_affected(),
    })))
}

#[utoipa::path(
    delete,
    path = "/api/notifications/{id}",
    params(("id" = u64, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification deleted", body = Object),
        (status = 403, description = "Not the recipient"),
        (status = 404, description = "Notification not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn delete_notification(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let pool = pool.get_ref();

    let notification = fetch_notification(pool, id).await?.ok_or_else(notification_not_found)?;
    if notification.user_id != auth.user_id {
        return Err(AppError::forbidden("You can only delete your own notifications"));
    }

    sqlx::query("DELETE FROM notifications WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Notification deleted successfully" })))
}

/* =========================
Admin audit view
========================= */
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(rename_all = "camelCase")]
pub struct NotificationAuditQuery {
    pub user_id: Option<u64>,
    /// employee | manager | hr | admin
    pub recipient_role: Option<String>,
    pub category: Option<String>,
    pub page: Option<u64>,
    /// 1-200, default 50
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/notifications/audit/all",
    params(NotificationAuditQuery),
    responses(
        (status = 200, description = "Every notification matching the filters", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 403, description = "Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Notification"
)]
pub async fn audit_notifications(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<NotificationAuditQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_admin()?;

    let page = Page::parse(
        query.page,
        Some(query.limit.unwrap_or(DEFAULT_AUDIT_PAGE_SIZE)),
        MAX_AUDIT_PAGE_SIZE,
    )?;
    let category = parse_category(query.category.as_deref())?;
    let recipient_role = query
        .recipient_role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| r.parse::<Role>().map_err(|_| AppError::field("recipientRole", "Unknown role")))
        .transpose()?;

    let mut filters = Filters::new();
    filters
        .eq_opt("user_id", query.user_id)
        .eq_opt("category", category.map(|c| c.to_string()));
    if let Some(role) = recipient_role {
        filters.raw("LOWER(recipient_role) = ?", vec![SqlValue::String(role.to_string())]);
    }

    let (notifications, pagination) = fetch_page(pool.get_ref(), &filters, page).await?;
    Ok(HttpResponse::Ok().json(json!({
        "notifications": notifications,
        "pagination": pagination,
    })))
}
