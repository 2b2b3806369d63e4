use std::collections::HashMap;

use actix_multipart::Multipart;
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::{Duration, NaiveDate, Utc};
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError};

use crate::api::user::load_active_user;
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::errors::{AppError, FieldError};
use crate::model::leave_balance::LeaveBalance;
use crate::model::leave::{
    HalfDayType, LEAVE_COLUMNS, LEAVE_DETAIL_SELECT, Leave, LeaveDetailRow, LeaveStatus, LeaveView,
};
use crate::model::notification::NotificationCategory;
use crate::models::{Page, Pagination};
use crate::utils::audit_logger::{AuditEntry, AuditLogger};
use crate::utils::db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar};
use crate::utils::financial_year::{consume_balance, ensure_balance, financial_year_for};
use crate::utils::leave_rules::{HOURS_PER_DAY, can_review, can_view, count_days, ranges_overlap, validate_range};
use crate::utils::leave_type_cache::{find_leave_type, leave_types};
use crate::utils::notifications::{
    create_leave_submission_notifications, send_leave_decision_notification, send_reminder_notification,
};
use crate::utils::realtime::NotificationHub;
use crate::utils::uploads::{Attachment, check_attachment, remove_attachments, save_attachments};

const MAX_PAGE_SIZE: u64 = 50;

/* =========================
Submission form
========================= */

/// Free-text part of the submission form.
#[derive(Debug, Validate)]
struct LeaveText {
    #[validate(length(min = 10, max = 500, message = "Reason must be between 10 and 500 characters"))]
    reason: String,
    #[validate(length(min = 5, max = 100, message = "Emergency contact must be between 5 and 100 characters"))]
    emergency_contact: Option<String>,
    #[validate(length(max = 1000, message = "Handover notes cannot exceed 1000 characters"))]
    handover_notes: Option<String>,
}

/// A leave submission after every field has been parsed and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveForm {
    pub leave_type_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub is_half_day: bool,
    pub half_day_type: Option<HalfDayType>,
    pub emergency_contact: Option<String>,
    pub handover_notes: Option<String>,
    pub number_of_hours: Option<f64>,
}

fn non_empty(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

impl LeaveForm {
    /// Parses the text parts of the multipart form, reporting every bad field at once.
    pub fn parse(fields: &HashMap<String, String>) -> Result<Self, AppError> {
        let mut errors = Vec::new();

        let leave_type_id = non_empty(fields, "leaveTypeId")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|id| *id > 0);
        if leave_type_id.is_none() {
            errors.push(FieldError::new("leaveTypeId", "Valid leave type is required"));
        }

        let mut date = |key: &str, message: &str| {
            let parsed = non_empty(fields, key).and_then(|v| parse_date(&v));
            if parsed.is_none() {
                errors.push(FieldError::new(key, message));
            }
            parsed
        };
        let start_date = date("startDate", "Valid start date is required");
        let end_date = date("endDate", "Valid end date is required");

        let is_half_day = match non_empty(fields, "isHalfDay") {
            None => false,
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                errors.push(FieldError::new("isHalfDay", "isHalfDay must be a boolean"));
                false
            }),
        };

        let half_day_type = match non_empty(fields, "halfDayType") {
            None => None,
            Some(raw) => match raw.parse::<HalfDayType>() {
                Ok(t) => Some(t),
                Err(_) => {
                    errors.push(FieldError::new("halfDayType", "Half day type must be morning or afternoon"));
                    None
                }
            },
        };

        let number_of_hours = match non_empty(fields, "numberOfHours") {
            None => None,
            Some(raw) => match raw.parse::<f64>() {
                Ok(h) if h.is_finite() && h >= 0.0 => Some(h),
                _ => {
                    errors.push(FieldError::new("numberOfHours", "Number of hours must be a non-negative number"));
                    None
                }
            },
        };

        let text = LeaveText {
            reason: fields.get("reason").map(|r| r.trim().to_string()).unwrap_or_default(),
            emergency_contact: non_empty(fields, "emergencyContact"),
            handover_notes: non_empty(fields, "handoverNotes"),
        };
        if let Err(e) = text.validate() {
            if let AppError::Validation(details) = AppError::from(e) {
                errors.extend(details);
            }
        }

        match (leave_type_id, start_date, end_date) {
            (Some(leave_type_id), Some(start_date), Some(end_date)) if errors.is_empty() => Ok(LeaveForm {
                leave_type_id,
                start_date,
                end_date,
                reason: text.reason,
                is_half_day,
                half_day_type,
                emergency_contact: text.emergency_contact,
                handover_notes: text.handover_notes,
                number_of_hours,
            }),
            _ => {
                errors.sort_by(|a, b| a.field.cmp(&b.field));
                Err(AppError::Validation(errors))
            }
        }
    }
}

/// Accepts plain dates and ISO-8601 timestamps, keeping only the date.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| raw.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Drains the multipart stream into text fields and checked attachments.
async fn read_leave_form(
    mut payload: Multipart,
    config: &Config,
) -> Result<(HashMap<String, String>, Vec<Attachment>), AppError> {
    let mut fields = HashMap::new();
    let mut attachments = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();
        let file_name = field
            .content_disposition()
            .get_filename()
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > config.max_file_size {
                return Err(AppError::bad_request(
                    "File Too Large",
                    format!("Each attachment must be at most {} bytes", config.max_file_size),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        match file_name {
            Some(file_name) if name == "attachment" => {
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                if attachments.len() >= config.max_attachments {
                    return Err(AppError::bad_request(
                        "Too Many Files",
                        format!("At most {} attachments are allowed", config.max_attachments),
                    ));
                }
                attachments.push(check_attachment(&file_name, bytes, config.max_file_size)?);
            }
            Some(_) => {
                return Err(AppError::bad_request("Invalid Upload", format!("Unexpected file field '{name}'")));
            }
            None => {
                let value = String::from_utf8(bytes).map_err(|_| AppError::field(&name, "Field must be valid text"))?;
                fields.insert(name, value);
            }
        }
    }

    Ok((fields, attachments))
}

/* =========================
Queries
========================= */

const LEAVE_COUNT_FROM: &str = r#"
    SELECT COUNT(*)
    FROM leaves l
    JOIN leave_types lt ON lt.id = l.leave_type_id
    JOIN users u ON u.id = l.user_id
    LEFT JOIN users a ON a.id = l.approved_by
"#;

async fn fetch_leave_page(
    pool: &MySqlPool,
    filters: &Filters,
    order_by: &str,
    page: Page,
) -> Result<(Vec<LeaveView>, Pagination), AppError> {
    let where_clause = filters.where_clause();

    let count_sql = format!("{LEAVE_COUNT_FROM}{where_clause}");
    let total: i64 = bind_query_scalar(sqlx::query_scalar(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let sql = format!("{LEAVE_DETAIL_SELECT}{where_clause} ORDER BY {order_by} LIMIT ? OFFSET ?");
    let rows = bind_query_as(sqlx::query_as::<_, LeaveDetailRow>(&sql), filters.values())
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    let leaves = rows.into_iter().map(LeaveDetailRow::into_view).collect();
    Ok((leaves, page.pagination(total)))
}

async fn fetch_leave(pool: &MySqlPool, leave_id: u64) -> Result<Option<Leave>, sqlx::Error> {
    sqlx::query_as::<_, Leave>(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ?"))
        .bind(leave_id)
        .fetch_optional(pool)
        .await
}

fn leave_not_found() -> AppError {
    AppError::not_found("Leave Not Found", "Leave application not found")
}

fn parse_status(raw: Option<&str>) -> Result<Option<LeaveStatus>, AppError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<LeaveStatus>()
                .map_err(|_| AppError::field("status", "Status must be pending, approved, rejected or cancelled"))
        })
        .transpose()
}

/* =========================
Leave types
========================= */
#[utoipa::path(
    get,
    path = "/api/leaves/types",
    responses(
        (status = 200, description = "Every leave type", body = [crate::model::leave_type::LeaveType]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn list_leave_types(pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let types = leave_types(pool.get_ref()).await.map_err(|e| {
        error!(error = %e, "Error fetching leave types");
        AppError::internal("Leave Type Retrieval Failed", "Error fetching leave types")
    })?;
    Ok(HttpResponse::Ok().json(types.as_slice()))
}

/* =========================
Submit leave
========================= */
#[utoipa::path(
    post,
    path = "/api/leaves",
    request_body(
        content = Object,
        content_type = "multipart/form-data",
        description = "leaveTypeId, startDate, endDate, reason, isHalfDay, halfDayType, \
            emergencyContact, handoverNotes, numberOfHours and up to five `attachment` files"
    ),
    responses(
        (status = 201, description = "Leave submitted", body = Object, example = json!({
            "message": "Leave application submitted successfully",
            "leave": { "id": 12, "status": "pending", "numberOfDays": 3.0 }
        })),
        (status = 400, description = "Validation, date, balance or overlap error"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Duplicate submission")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
#[instrument(name = "leave_submit", skip_all, fields(user_id = auth.user_id))]
pub async fn submit_leave(
    req: HttpRequest,
    auth: AuthUser,
    payload: Multipart,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    hub: web::Data<NotificationHub>,
) -> Result<HttpResponse, AppError> {
    let pool = pool.get_ref();
    let (fields, attachments) = read_leave_form(payload, &config).await?;
    let form = LeaveForm::parse(&fields)?;

    match find_leave_type(pool, form.leave_type_id).await? {
        Some(t) if t.is_active => {}
        _ => return Err(AppError::field("leaveTypeId", "Valid leave type is required")),
    }

    let today = Utc::now().date_naive();
    validate_range(form.start_date, form.end_date, today)?;

    let number_of_days = count_days(form.start_date, form.end_date, form.is_half_day);
    let number_of_hours = form.number_of_hours.unwrap_or(number_of_days * HOURS_PER_DAY);
    let submitter = load_active_user(pool, auth.user_id).await?;

    let year = financial_year_for(form.start_date, config.fy_start_month);
    let balance = {
        let mut conn = pool.acquire().await?;
        ensure_balance(&mut conn, auth.user_id, form.leave_type_id, year).await?
    };

    let blocking: Vec<(NaiveDate, NaiveDate)> = sqlx::query_as(
        r#"
        SELECT start_date, end_date
        FROM leaves
        WHERE user_id = ? AND status IN ('pending', 'approved') AND end_date >= ?
        "#,
    )
    .bind(auth.user_id)
    .bind(form.start_date)
    .fetch_all(pool)
    .await?;

    let recent_duplicate = sqlx::query_as::<_, Leave>(&format!(
        r#"
        SELECT {LEAVE_COLUMNS} FROM leaves
        WHERE user_id = ? AND leave_type_id = ? AND start_date = ? AND end_date = ?
          AND number_of_days = ? AND status = 'pending'
          AND created_at >= NOW() - INTERVAL ? MINUTE
        LIMIT 1
        "#
    ))
    .bind(auth.user_id)
    .bind(form.leave_type_id)
    .bind(form.start_date)
    .bind(form.end_date)
    .bind(number_of_days)
    .bind(config.duplicate_window_minutes)
    .fetch_optional(pool)
    .await
    .unwrap_or_else(|e| {
        // the unique key on pending requests still catches duplicates
        error!(error = %e, "Error checking for duplicate leave submissions");
        None
    });

    if let Err(e) = check_submission(
        balance.as_ref(),
        number_of_days,
        (form.start_date, form.end_date),
        &blocking,
        recent_duplicate.as_ref(),
    ) {
        info!(year, number_of_days, reason = %e, "Leave submission refused");
        return Err(e);
    }

    let stored_paths = save_attachments(&config.upload_path, &attachments).await?;

    let days_and_hours = (number_of_days, number_of_hours);
    let leave = match insert_leave(pool, auth.user_id, &form, days_and_hours, stored_paths.first()).await {
        Ok(leave) => leave,
        Err(e) => {
            remove_attachments(&stored_paths).await;
            return Err(e);
        }
    };

    info!(leave_id = leave.id, number_of_days, "Leave created");

    let reason_excerpt: String = form.reason.chars().take(100).collect();
    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "leave",
            entity_id: leave.id,
            action: "create",
            old_values: None,
            new_values: Some(json!({
                "leaveTypeId": form.leave_type_id,
                "startDate": form.start_date,
                "endDate": form.end_date,
                "numberOfDays": number_of_days,
                "reason": reason_excerpt,
            })),
        },
        &req,
    )
    .await;

    match create_leave_submission_notifications(pool, &hub, &leave, &submitter).await {
        Ok(created) => {
            if form.start_date <= today + Duration::days(1) {
                remind_reviewers(pool, &hub, &leave, &submitter.full_name(), &created).await;
            }
        }
        Err(e) => error!(error = %e, leave_id = leave.id, "Failed to create leave submission notifications"),
    }

    Ok(HttpResponse::Created().json(json!({
        "message": "Leave application submitted successfully",
        "leave": leave,
    })))
}

const PENDING_TWIN_SQL: &str = r#"
    WHERE user_id = ? AND leave_type_id = ? AND start_date = ? AND end_date = ?
      AND number_of_days = ? AND status = 'pending'
    LIMIT 1
"#;

/// SQLSTATE InnoDB reports when it picks a deadlock victim.
const DEADLOCK_SQLSTATE: &str = "40001";

/// An insert that hit the pending unique key, or deadlocked against an
/// identical insert, lost the race to another submission.
fn lost_insert_race(unique_violation: bool, sqlstate: Option<&str>) -> bool {
    unique_violation || sqlstate == Some(DEADLOCK_SQLSTATE)
}

async fn find_pending_twin<'e, E>(
    executor: E,
    user_id: u64,
    form: &LeaveForm,
    number_of_days: f64,
) -> Result<Option<Leave>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query_as::<_, Leave>(&format!("SELECT {LEAVE_COLUMNS} FROM leaves {PENDING_TWIN_SQL}"))
        .bind(user_id)
        .bind(form.leave_type_id)
        .bind(form.start_date)
        .bind(form.end_date)
        .bind(number_of_days)
        .fetch_optional(executor)
        .await
}

/// Find-or-create keyed on the pending request; a concurrent identical
/// submission surfaces as a 409 with the stored record.
///
/// The lookup is a plain consistent read. A locking read here would take gap
/// locks that two identical inserts then deadlock on.
async fn insert_leave(
    pool: &MySqlPool,
    user_id: u64,
    form: &LeaveForm,
    (number_of_days, number_of_hours): (f64, f64),
    attachment_path: Option<&String>,
) -> Result<Leave, AppError> {
    let mut tx = pool.begin().await?;

    if let Some(existing) = find_pending_twin(&mut *tx, user_id, form, number_of_days).await? {
        tx.rollback().await?;
        return Err(duplicate_of(existing));
    }

    let inserted = sqlx::query(
        r#"
        INSERT INTO leaves
            (user_id, leave_type_id, start_date, end_date, number_of_days, number_of_hours,
             reason, is_half_day, half_day_type, emergency_contact, handover_notes, attachment_path)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(form.leave_type_id)
    .bind(form.start_date)
    .bind(form.end_date)
    .bind(number_of_days)
    .bind(number_of_hours)
    .bind(&form.reason)
    .bind(form.is_half_day)
    .bind(form.half_day_type.map(|t| t.to_string()))
    .bind(form.emergency_contact.as_deref())
    .bind(form.handover_notes.as_deref())
    .bind(attachment_path.map(String::as_str))
    .execute(&mut *tx)
    .await;

    let inserted = match inserted {
        Ok(result) => result,
        Err(sqlx::Error::Database(db)) if lost_insert_race(db.is_unique_violation(), db.code().as_deref()) => {
            // rolls back on drop; a deadlock victim is already rolled back server-side
            drop(tx);
            warn!(user_id, code = ?db.code(), "Duplicate leave submission prevented");
            return match find_pending_twin(pool, user_id, form, number_of_days).await? {
                Some(existing) => Err(duplicate_of(existing)),
                None if db.is_unique_violation() => Err(AppError::conflict(
                    "Duplicate Submission",
                    "A similar leave request already exists. Please check your leave history.",
                    None,
                )),
                None => Err(sqlx::Error::Database(db).into()),
            };
        }
        Err(e) => return Err(e.into()),
    };

    let leave = sqlx::query_as::<_, Leave>(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ?"))
        .bind(inserted.last_insert_id())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(leave)
}

fn duplicate_of(existing: Leave) -> AppError {
    AppError::conflict(
        "Duplicate Submission",
        "A similar leave request already exists. Please check your leave history.",
        Some(json!(existing)),
    )
}

/* =========================
Submission and review rules
========================= */

fn has_remaining(balance: Option<&LeaveBalance>, number_of_days: f64) -> bool {
    balance.is_some_and(|b| b.remaining_days >= number_of_days)
}

/// Balance, then overlap with pending or approved leaves, then a recent
/// identical pending request.
fn check_submission(
    balance: Option<&LeaveBalance>,
    number_of_days: f64,
    (start, end): (NaiveDate, NaiveDate),
    blocking: &[(NaiveDate, NaiveDate)],
    recent: Option<&Leave>,
) -> Result<(), AppError> {
    if !has_remaining(balance, number_of_days) {
        return Err(AppError::bad_request(
            "Insufficient Leave Balance",
            "You do not have enough leave days remaining",
        ));
    }

    if blocking.iter().any(|(s, e)| ranges_overlap(start, end, *s, *e)) {
        return Err(AppError::bad_request(
            "Overlapping Leave",
            "You have an overlapping leave request for these dates",
        ));
    }

    if let Some(existing) = recent {
        return Err(AppError::conflict(
            "Duplicate Submission",
            "A similar leave request was submitted recently. Please check your leave history.",
            Some(json!(existing)),
        ));
    }

    Ok(())
}

/// Only pending leaves move on, and managers only review their direct reports.
fn check_review(
    leave: &Leave,
    next: LeaveStatus,
    auth: &AuthUser,
    requester_manager_id: Option<u64>,
) -> Result<(), AppError> {
    if !leave.status().is_some_and(|s| s.can_transition_to(next)) {
        return Err(AppError::bad_request(
            "Invalid Action",
            "Only pending leave applications can be approved or rejected",
        ));
    }

    if !can_review(auth.user_id, auth.role, requester_manager_id) {
        return Err(AppError::forbidden(
            "You can only approve leave applications from your team members",
        ));
    }

    Ok(())
}

/// The balance an approval draws from, if it covers the whole leave.
fn approval_balance(balance: Option<LeaveBalance>, number_of_days: f64) -> Result<LeaveBalance, AppError> {
    match balance {
        Some(b) if b.remaining_days >= number_of_days => Ok(b),
        _ => Err(AppError::bad_request(
            "Insufficient Leave Balance",
            "The employee does not have enough leave days remaining",
        )),
    }
}

/// Short-notice requests get an extra nudge to whoever has to review them.
async fn remind_reviewers(
    pool: &MySqlPool,
    hub: &NotificationHub,
    leave: &Leave,
    submitter_name: &str,
    created: &[crate::model::notification::Notification],
) {
    let category = NotificationCategory::LeaveRequest.to_string();
    let message = format!(
        "{submitter_name}'s leave starting {} is awaiting your review.",
        leave.start_date
    );
    for reviewer in created.iter().filter(|n| n.category == category) {
        if let Err(e) = send_reminder_notification(pool, hub, reviewer.user_id, "Leave Starting Soon", &message).await {
            error!(error = %e, leave_id = leave.id, "Failed to send review reminder");
        }
    }
}

/* =========================
Own leaves
========================= */
#[utoipa::path(
    get,
    path = "/api/leaves",
    responses(
        (status = 200, description = "The caller's leaves, newest first", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn list_own_leaves(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let rows = sqlx::query_as::<_, LeaveDetailRow>(&format!(
        "{LEAVE_DETAIL_SELECT} WHERE l.user_id = ? ORDER BY l.created_at DESC"
    ))
    .bind(auth.user_id)
    .fetch_all(pool.get_ref())
    .await?;

    let leaves: Vec<LeaveView> = rows.into_iter().map(LeaveDetailRow::into_view).collect();
    Ok(HttpResponse::Ok().json(leaves))
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct MyLeavesQuery {
    /// pending | approved | rejected | cancelled
    pub status: Option<String>,
    /// Calendar year of the start date (2020-2030)
    pub year: Option<i32>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/leaves/my-leaves",
    params(MyLeavesQuery),
    responses(
        (status = 200, description = "Paginated leaves of the caller", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn my_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<MyLeavesQuery>,
) -> Result<HttpResponse, AppError> {
    let page = Page::parse(query.page, query.limit, MAX_PAGE_SIZE)?;
    let status = parse_status(query.status.as_deref())?;

    let mut filters = Filters::new();
    filters
        .eq("l.user_id", auth.user_id)
        .eq_opt("l.status", status.map(|s| s.to_string()));

    if let Some(year) = query.year {
        let bounds = (2020..=2030)
            .contains(&year)
            .then(|| NaiveDate::from_ymd_opt(year, 1, 1).zip(NaiveDate::from_ymd_opt(year, 12, 31)))
            .flatten()
            .ok_or_else(|| AppError::field("year", "Year must be between 2020 and 2030"))?;
        filters.raw(
            "l.start_date BETWEEN ? AND ?",
            vec![SqlValue::Date(bounds.0), SqlValue::Date(bounds.1)],
        );
    }

    let (leaves, pagination) = fetch_leave_page(pool.get_ref(), &filters, "l.created_at DESC", page).await?;
    Ok(HttpResponse::Ok().json(json!({ "leaves": leaves, "pagination": pagination })))
}

/* =========================
Single leave
========================= */
#[utoipa::path(
    get,
    path = "/api/leaves/{id}",
    params(("id" = u64, Path, description = "Leave id")),
    responses(
        (status = 200, description = "Leave with type, requester and approver", body = Object),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Not the owner, an approver or the approver of record"),
        (status = 404, description = "Leave not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn get_leave(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let leave_id = path.into_inner();

    let row = sqlx::query_as::<_, LeaveDetailRow>(&format!("{LEAVE_DETAIL_SELECT} WHERE l.id = ?"))
        .bind(leave_id)
        .fetch_optional(pool.get_ref())
        .await?
        .ok_or_else(leave_not_found)?;

    if !can_view(auth.user_id, auth.role, row.leave.user_id, row.leave.approved_by) {
        return Err(AppError::forbidden(
            "You do not have permission to view this leave application",
        ));
    }

    Ok(HttpResponse::Ok().json(json!({ "leave": row.into_view() })))
}

#[utoipa::path(
    put,
    path = "/api/leaves/{id}/cancel",
    params(("id" = u64, Path, description = "Leave id")),
    responses(
        (status = 200, description = "Leave cancelled", body = Object),
        (status = 400, description = "Leave is no longer pending"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Leave not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn cancel_leave(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    let leave_id = path.into_inner();
    let pool = pool.get_ref();

    let leave = fetch_leave(pool, leave_id).await?.ok_or_else(leave_not_found)?;

    if leave.user_id != auth.user_id {
        return Err(AppError::forbidden("You can only cancel your own leave applications"));
    }

    let cannot_cancel = || AppError::bad_request("Cannot Cancel", "Only pending leave applications can be cancelled");

    if !leave
        .status()
        .is_some_and(|s| s.can_transition_to(LeaveStatus::Cancelled))
    {
        return Err(cannot_cancel());
    }

    let updated = sqlx::query("UPDATE leaves SET status = 'cancelled' WHERE id = ? AND status = 'pending'")
        .bind(leave_id)
        .execute(pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(cannot_cancel());
    }

    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "leave",
            entity_id: leave_id,
            action: "cancel",
            old_values: Some(json!({ "status": "pending" })),
            new_values: Some(json!({ "status": "cancelled" })),
        },
        &req,
    )
    .await;

    let leave = fetch_leave(pool, leave_id).await?.ok_or_else(leave_not_found)?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Leave application cancelled successfully",
        "leave": leave,
    })))
}

/* =========================
Approver views
========================= */
#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[serde(rename_all = "camelCase")]
#[into_params(rename_all = "camelCase")]
pub struct AllLeavesQuery {
    pub status: Option<String>,
    pub user_id: Option<u64>,
    pub department: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/leaves/pending/approvals",
    params(crate::models::PageQuery),
    responses(
        (status = 200, description = "Pending leaves, oldest first", body = Object),
        (status = 403, description = "Manager/HR access required")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn pending_approvals(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<crate::models::PageQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_approver()?;
    let page = Page::parse(query.page, query.limit, MAX_PAGE_SIZE)?;

    let mut filters = Filters::new();
    filters.eq("l.status", LeaveStatus::Pending.to_string());
    if auth.is_manager() {
        filters.eq("u.manager_id", auth.user_id);
    }

    let (leaves, pagination) = fetch_leave_page(pool.get_ref(), &filters, "l.created_at ASC", page).await?;
    Ok(HttpResponse::Ok().json(json!({ "leaves": leaves, "pagination": pagination })))
}

#[utoipa::path(
    get,
    path = "/api/leaves/all",
    params(AllLeavesQuery),
    responses(
        (status = 200, description = "Leaves across the organisation (managers: their team)", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 403, description = "Manager/HR access required")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
pub async fn all_leaves(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AllLeavesQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_approver()?;
    let page = Page::parse(query.page, query.limit, MAX_PAGE_SIZE)?;
    let status = parse_status(query.status.as_deref())?;

    let mut filters = Filters::new();
    filters
        .eq_opt("l.status", status.map(|s| s.to_string()))
        .eq_opt("l.user_id", query.user_id)
        .eq_opt("u.department", query.department.clone().filter(|d| !d.trim().is_empty()));
    if auth.is_manager() {
        filters.eq("u.manager_id", auth.user_id);
    }

    let (leaves, pagination) = fetch_leave_page(pool.get_ref(), &filters, "l.created_at DESC", page).await?;
    Ok(HttpResponse::Ok().json(json!({ "leaves": leaves, "pagination": pagination })))
}

/* =========================
Approve / reject
========================= */
fn validate_action(action: &str) -> Result<(), ValidationError> {
    match action {
        "approve" | "reject" => Ok(()),
        _ => {
            let mut err = ValidationError::new("action");
            err.message = Some("Action must be either approve or reject".into());
            Err(err)
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReviewLeaveReq {
    #[validate(custom = "validate_action")]
    #[schema(example = "approve")]
    pub action: String,
    #[validate(length(min = 5, max = 500, message = "Rejection reason must be between 5 and 500 characters"))]
    pub rejection_reason: Option<String>,
    pub manager_notes: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/leaves/{id}/approve",
    params(("id" = u64, Path, description = "Leave id")),
    request_body = ReviewLeaveReq,
    responses(
        (status = 200, description = "Leave approved or rejected", body = Object, example = json!({
            "message": "Leave application approved successfully",
            "leave": { "id": 12, "status": "approved" }
        })),
        (status = 400, description = "Validation error, leave not pending or balance exhausted"),
        (status = 403, description = "Not allowed to review this leave"),
        (status = 404, description = "Leave not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave"
)]
#[instrument(name = "leave_review", skip_all, fields(reviewer_id = auth.user_id, leave_id = *path))]
pub async fn review_leave(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    hub: web::Data<NotificationHub>,
    path: web::Path<u64>,
    payload: web::Json<ReviewLeaveReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_approver()?;
    payload.validate()?;

    let leave_id = path.into_inner();
    let approve = payload.action == "approve";
    let next = if approve { LeaveStatus::Approved } else { LeaveStatus::Rejected };
    let pool = pool.get_ref();
    let manager_notes = payload.manager_notes.as_deref().filter(|n| !n.trim().is_empty());

    let mut tx = pool.begin().await?;

    let leave = sqlx::query_as::<_, Leave>(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ? FOR UPDATE"))
        .bind(leave_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(leave_not_found)?;

    let requester_manager_id = sqlx::query_scalar::<_, Option<u64>>("SELECT manager_id FROM users WHERE id = ?")
        .bind(leave.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .flatten();

    check_review(&leave, next, &auth, requester_manager_id)?;

    if approve {
        let year = financial_year_for(leave.start_date, config.fy_start_month);
        let balance = ensure_balance(&mut tx, leave.user_id, leave.leave_type_id, year).await?;
        let balance = approval_balance(balance, leave.number_of_days).inspect_err(|_| {
            info!(year, "Approval would overdraw the leave balance");
        })?;
        consume_balance(&mut tx, balance.id, leave.number_of_days).await?;

        sqlx::query(
            r#"
            UPDATE leaves
            SET status = 'approved', approved_by = ?, approved_at = NOW(),
                manager_notes = COALESCE(?, manager_notes)
            WHERE id = ?
            "#,
        )
        .bind(auth.user_id)
        .bind(manager_notes)
        .bind(leave_id)
        .execute(&mut *tx)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE leaves
            SET status = 'rejected', approved_by = ?, approved_at = NOW(),
                rejection_reason = ?, manager_notes = COALESCE(?, manager_notes)
            WHERE id = ?
            "#,
        )
        .bind(auth.user_id)
        .bind(payload.rejection_reason.as_deref())
        .bind(manager_notes)
        .bind(leave_id)
        .execute(&mut *tx)
        .await?;
    }

    let leave_type_name: String = sqlx::query_scalar("SELECT name FROM leave_types WHERE id = ?")
        .bind(leave.leave_type_id)
        .fetch_one(&mut *tx)
        .await?;

    let updated = sqlx::query_as::<_, Leave>(&format!("SELECT {LEAVE_COLUMNS} FROM leaves WHERE id = ?"))
        .bind(leave_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    info!(status = %next, "Leave reviewed");

    let mut new_values = json!({
        "status": next,
        "approvedBy": auth.user_id,
        "approvedAt": updated.approved_at,
    });
    if !approve {
        new_values["rejectionReason"] = json!(payload.rejection_reason);
    }
    if let Some(notes) = manager_notes {
        new_values["managerNotes"] = json!(notes);
    }

    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "leave",
            entity_id: leave_id,
            action: &payload.action,
            old_values: Some(json!({ "status": "pending" })),
            new_values: Some(new_values),
        },
        &req,
    )
    .await;

    if let Err(e) = send_leave_decision_notification(pool, &hub, &updated, &leave_type_name, approve).await {
        error!(error = %e, "Failed to notify employee of leave decision");
    }

    let verb = if approve { "approved" } else { "rejected" };
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Leave application {verb} successfully"),
        "leave": updated,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use actix_web::{ResponseError, http::StatusCode};

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn valid() -> Vec<(&'static str, &'static str)> {
        vec![
            ("leaveTypeId", "2"),
            ("startDate", "2026-11-02"),
            ("endDate", "2026-11-04"),
            ("reason", "Visiting family for the holidays"),
        ]
    }

    fn details(err: AppError) -> Vec<FieldError> {
        match err {
            AppError::Validation(details) => details,
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn parses_a_complete_form() {
        let mut pairs = valid();
        pairs.extend([
            ("isHalfDay", "true"),
            ("halfDayType", "morning"),
            ("emergencyContact", "+1 555 0100"),
            ("handoverNotes", "Alex covers on-call"),
            ("numberOfHours", "4"),
        ]);
        let form = LeaveForm::parse(&fields(&pairs)).unwrap();

        assert_eq!(form.leave_type_id, 2);
        assert_eq!(form.start_date, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap());
        assert!(form.is_half_day);
        assert_eq!(form.half_day_type, Some(HalfDayType::Morning));
        assert_eq!(form.emergency_contact.as_deref(), Some("+1 555 0100"));
        assert_eq!(form.number_of_hours, Some(4.0));
    }

    #[test]
    fn optional_fields_default_when_missing_or_blank() {
        let mut pairs = valid();
        pairs.push(("halfDayType", ""));
        pairs.push(("emergencyContact", "  "));
        let form = LeaveForm::parse(&fields(&pairs)).unwrap();

        assert!(!form.is_half_day);
        assert_eq!(form.half_day_type, None);
        assert_eq!(form.emergency_contact, None);
        assert_eq!(form.number_of_hours, None);
    }

    #[test]
    fn accepts_iso_timestamps_for_dates() {
        let mut pairs = valid();
        pairs[1] = ("startDate", "2026-11-02T00:00:00.000Z");
        let form = LeaveForm::parse(&fields(&pairs)).unwrap();
        assert_eq!(form.start_date, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap());
    }

    #[test]
    fn reports_every_bad_field() {
        let err = LeaveForm::parse(&fields(&[
            ("leaveTypeId", "abc"),
            ("startDate", "02/11/2026"),
            ("reason", "short"),
            ("halfDayType", "evening"),
        ]))
        .unwrap_err();

        let fields: Vec<String> = details(err).into_iter().map(|d| d.field).collect();
        assert_eq!(
            fields,
            vec!["endDate", "halfDayType", "leaveTypeId", "reason", "startDate"]
        );
    }

    #[test]
    fn text_length_limits_apply() {
        let mut form = fields(&valid());
        form.insert("handoverNotes".into(), "n".repeat(1001));
        form.insert("emergencyContact".into(), "911".into());

        let details = details(LeaveForm::parse(&form).unwrap_err());
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].field, "emergencyContact");
        assert_eq!(details[1].field, "handoverNotes");
    }

    #[test]
    fn negative_hours_are_rejected() {
        let mut pairs = valid();
        pairs.push(("numberOfHours", "-2"));
        let details = details(LeaveForm::parse(&fields(&pairs)).unwrap_err());
        assert_eq!(details[0].field, "numberOfHours");
    }

    #[test]
    fn review_action_must_be_known() {
        let req = ReviewLeaveReq {
            action: "escalate".into(),
            rejection_reason: None,
            manager_notes: None,
        };
        let details = details(req.validate().unwrap_err().into());
        assert_eq!(details[0].field, "action");
        assert_eq!(details[0].message, "Action must be either approve or reject");
    }

    #[test]
    fn short_rejection_reasons_are_rejected() {
        let req = ReviewLeaveReq {
            action: "reject".into(),
            rejection_reason: Some("no".into()),
            manager_notes: None,
        };
        let details = details(req.validate().unwrap_err().into());
        assert_eq!(details[0].field, "rejectionReason");
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 11, d).unwrap()
    }

    fn balance(remaining_days: f64) -> LeaveBalance {
        LeaveBalance {
            id: 3,
            user_id: 7,
            leave_type_id: 1,
            year: 2026,
            total_days: 20.0,
            used_days: 20.0 - remaining_days,
            remaining_days,
            carried_over_days: 0.0,
            max_carry_over: 5.0,
            notes: None,
            is_active: true,
        }
    }

    fn leave(status: LeaveStatus) -> Leave {
        Leave {
            id: 41,
            user_id: 7,
            leave_type_id: 1,
            start_date: day(10),
            end_date: day(12),
            number_of_days: 3.0,
            number_of_hours: 24.0,
            reason: "Visiting family for the holidays".into(),
            is_half_day: false,
            half_day_type: None,
            emergency_contact: None,
            handover_notes: None,
            attachment_path: None,
            status: status.to_string(),
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            manager_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn reviewer(user_id: u64, role: Role) -> AuthUser {
        AuthUser {
            user_id,
            email: "reviewer@company.com".into(),
            role,
        }
    }

    fn refusal(err: AppError) -> (StatusCode, String) {
        (err.status_code(), err.to_string())
    }

    #[test]
    fn submission_needs_enough_remaining_days() {
        let err = check_submission(Some(&balance(2.0)), 3.0, (day(10), day(12)), &[], None).unwrap_err();
        let (status, text) = refusal(err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.starts_with("Insufficient Leave Balance"));

        // no balance row for the type counts as nothing left
        let err = check_submission(None, 1.0, (day(10), day(10)), &[], None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        assert!(check_submission(Some(&balance(3.0)), 3.0, (day(10), day(12)), &[], None).is_ok());
    }

    #[test]
    fn submission_overlapping_a_live_leave_is_refused() {
        let taken = [(day(1), day(3)), (day(12), day(14))];
        let err = check_submission(Some(&balance(10.0)), 3.0, (day(10), day(12)), &taken, None).unwrap_err();
        let (status, text) = refusal(err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.starts_with("Overlapping Leave"));

        assert!(check_submission(Some(&balance(10.0)), 3.0, (day(5), day(7)), &taken, None).is_ok());
    }

    #[test]
    fn recent_identical_submission_conflicts_with_the_stored_one() {
        let existing = leave(LeaveStatus::Pending);
        let err = check_submission(Some(&balance(10.0)), 3.0, (day(10), day(12)), &[], Some(&existing)).unwrap_err();

        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        match err {
            AppError::Conflict { title, existing: Some(body), .. } => {
                assert_eq!(title, "Duplicate Submission");
                assert_eq!(body["id"], 41);
            }
            other => panic!("expected a conflict, got {other}"),
        }
    }

    #[test]
    fn balance_is_checked_before_overlap_and_duplicates() {
        let existing = leave(LeaveStatus::Pending);
        let taken = [(day(10), day(12))];
        let err = check_submission(Some(&balance(0.0)), 3.0, (day(10), day(12)), &taken, Some(&existing)).unwrap_err();
        assert!(err.to_string().starts_with("Insufficient Leave Balance"));
    }

    #[test]
    fn only_pending_leaves_can_be_reviewed() {
        let hr = reviewer(2, Role::Hr);
        for status in [LeaveStatus::Approved, LeaveStatus::Rejected, LeaveStatus::Cancelled] {
            let err = check_review(&leave(status), LeaveStatus::Approved, &hr, None).unwrap_err();
            let (code, text) = refusal(err);
            assert_eq!(code, StatusCode::BAD_REQUEST, "{status}");
            assert!(text.starts_with("Invalid Action"));
        }
        assert!(check_review(&leave(LeaveStatus::Pending), LeaveStatus::Rejected, &hr, None).is_ok());
    }

    #[test]
    fn managers_review_only_their_direct_reports() {
        let pending = leave(LeaveStatus::Pending);
        let manager = reviewer(5, Role::Manager);

        assert!(check_review(&pending, LeaveStatus::Approved, &manager, Some(5)).is_ok());

        let err = check_review(&pending, LeaveStatus::Approved, &manager, Some(9)).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        let err = check_review(&pending, LeaveStatus::Approved, &manager, None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        assert!(check_review(&pending, LeaveStatus::Approved, &reviewer(2, Role::Admin), Some(9)).is_ok());
    }

    #[test]
    fn approval_cannot_overdraw_the_balance() {
        let err = approval_balance(Some(balance(2.5)), 3.0).unwrap_err();
        let (status, text) = refusal(err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(text.starts_with("Insufficient Leave Balance"));
        assert!(approval_balance(None, 0.5).is_err());

        assert_eq!(approval_balance(Some(balance(3.0)), 3.0).unwrap().id, 3);
    }

    #[test]
    fn duplicate_key_and_deadlock_both_mean_a_lost_insert_race() {
        assert!(lost_insert_race(true, Some("23000")));
        assert!(lost_insert_race(false, Some("40001")));
        assert!(!lost_insert_race(false, Some("HY000")));
        assert!(!lost_insert_race(false, None));
    }

    #[test]
    fn pending_twin_lookup_takes_no_locks() {
        assert!(!PENDING_TWIN_SQL.to_ascii_uppercase().contains("FOR UPDATE"));
        assert!(PENDING_TWIN_SQL.contains("status = 'pending'"));
    }

    #[test]
    fn unknown_status_filters_are_rejected() {
        assert_eq!(parse_status(Some("approved")).unwrap(), Some(LeaveStatus::Approved));
        assert_eq!(parse_status(None).unwrap(), None);
        assert!(parse_status(Some("archived")).is_err());
    }
}
