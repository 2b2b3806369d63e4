use std::collections::HashMap;

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::errors::AppError;
use crate::model::leave_balance::{BALANCE_COLUMNS, BALANCE_WITH_TYPE_SELECT, BalanceView, BalanceWithTypeRow, LeaveBalance};
use crate::model::leave_type::{ANNUAL_MAX_CARRY_OVER, LeaveType};
use crate::model::notification::NotificationKind;
use crate::model::user::{USER_COLUMNS, User, UserProfile};
use crate::utils::audit_logger::{AuditEntry, AuditLogger};
use crate::utils::financial_year::{
    current_financial_year, financial_year_bounds, initialize_employee_balances, remaining, rollover,
};
use crate::utils::leave_type_cache::leave_types;
use crate::utils::notifications::send_system_notification;
use crate::utils::realtime::NotificationHub;

async fn balances_for(pool: &MySqlPool, user_id: u64, year: i32) -> Result<Vec<BalanceView>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BalanceWithTypeRow>(&format!(
        "{BALANCE_WITH_TYPE_SELECT} WHERE b.user_id = ? AND b.year = ? AND b.is_active = TRUE ORDER BY lt.name"
    ))
    .bind(user_id)
    .bind(year)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(BalanceView::from).collect())
}

/// Current-year balances, created on first access.
async fn balances_initializing(pool: &MySqlPool, user_id: u64, year: i32) -> Result<Vec<BalanceView>, sqlx::Error> {
    let balances = balances_for(pool, user_id, year).await?;
    if !balances.is_empty() {
        return Ok(balances);
    }

    info!(user_id, year, "No leave balances for the financial year, initializing");
    initialize_employee_balances(pool, user_id, year).await?;
    balances_for(pool, user_id, year).await
}

fn employee_not_found() -> AppError {
    AppError::not_found("Employee Not Found", "Employee not found")
}

/* =========================
Employee view
========================= */
#[utoipa::path(
    get,
    path = "/api/leave-balances/my-balances",
    responses(
        (status = 200, description = "The caller's balances for the current financial year", body = Object),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn my_balances(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let year = current_financial_year(config.fy_start_month);
    let balances = balances_initializing(pool.get_ref(), auth.user_id, year).await?;

    Ok(HttpResponse::Ok().json(json!({
        "financialYear": year,
        "balances": balances,
    })))
}

/* =========================
Admin views
========================= */
#[derive(Debug, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinancialYearInfo {
    #[schema(example = 2026)]
    pub current_year: i32,
    #[schema(value_type = String, example = "2026-04-01")]
    pub start_date: chrono::NaiveDate,
    #[schema(value_type = String, example = "2027-03-31")]
    pub end_date: chrono::NaiveDate,
}

fn financial_year_info(year: i32, start_month: u32) -> Result<FinancialYearInfo, AppError> {
    let (start_date, end_date) = financial_year_bounds(year, start_month)
        .ok_or_else(|| AppError::internal("Internal Server Error", "Financial year out of range"))?;
    Ok(FinancialYearInfo {
        current_year: year,
        start_date,
        end_date,
    })
}

#[utoipa::path(
    get,
    path = "/api/admin/financial-year-info",
    responses(
        (status = 200, description = "Current financial year and its bounds", body = FinancialYearInfo),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn get_financial_year_info(auth: AuthUser, config: web::Data<Config>) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    let year = current_financial_year(config.fy_start_month);
    Ok(HttpResponse::Ok().json(financial_year_info(year, config.fy_start_month)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeBalances {
    #[serde(flatten)]
    pub employee: UserProfile,
    pub balances: Vec<BalanceView>,
}

/// Attaches balance rows to their owners, keeping the user order.
fn group_balances(users: Vec<User>, balances: Vec<BalanceWithTypeRow>) -> Vec<EmployeeBalances> {
    let mut by_user: HashMap<u64, Vec<BalanceView>> = HashMap::new();
    for row in balances {
        by_user.entry(row.balance.user_id).or_default().push(BalanceView::from(row));
    }

    users
        .iter()
        .map(|user| EmployeeBalances {
            employee: user.profile(),
            balances: by_user.remove(&user.id).unwrap_or_default(),
        })
        .collect()
}

#[utoipa::path(
    get,
    path = "/api/admin/employees/leave-balances",
    responses(
        (status = 200, description = "Active employees with their current-year balances", body = Object),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn employees_with_balances(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    let pool = pool.get_ref();
    let year = current_financial_year(config.fy_start_month);

    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE is_active = TRUE ORDER BY first_name, last_name"
    ))
    .fetch_all(pool)
    .await?;

    let balances = sqlx::query_as::<_, BalanceWithTypeRow>(&format!(
        "{BALANCE_WITH_TYPE_SELECT} WHERE b.year = ? AND b.is_active = TRUE ORDER BY lt.name"
    ))
    .bind(year)
    .fetch_all(pool)
    .await?;

    Ok(HttpResponse::Ok().json(group_balances(users, balances)))
}

#[utoipa::path(
    get,
    path = "/api/admin/employees/{userId}/leave-balance",
    params(("userId" = u64, Path, description = "Employee id")),
    responses(
        (status = 200, description = "Employee and current-year balances", body = Object),
        (status = 403, description = "HR/Admin only"),
        (status = 404, description = "Employee not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn employee_balance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    let user_id = path.into_inner();
    let pool = pool.get_ref();

    let employee = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(employee_not_found)?;

    let year = current_financial_year(config.fy_start_month);
    let balances = balances_initializing(pool, user_id, year).await?;

    Ok(HttpResponse::Ok().json(json!({
        "employee": employee.profile(),
        "financialYear": year,
        "balances": balances,
    })))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBalanceReq {
    #[schema(example = 14)]
    pub balance_id: u64,
    #[validate(range(min = 0.0, max = 366.0, message = "Total days must be between 0 and 366"))]
    #[schema(example = 20.0)]
    pub total_days: f64,
    #[validate(range(min = 0.0, max = 366.0, message = "Used days must be between 0 and 366"))]
    #[schema(example = 4.5)]
    pub used_days: f64,
    #[validate(range(min = 0.0, max = 366.0, message = "Carried over days must be between 0 and 366"))]
    #[schema(example = 2.0)]
    pub carried_over_days: f64,
    #[validate(range(min = 0.0, max = 366.0, message = "Max carry over must be between 0 and 366"))]
    #[schema(example = 5.0)]
    pub max_carry_over: f64,
    #[validate(length(max = 500, message = "Notes cannot exceed 500 characters"))]
    pub notes: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/admin/employees/{userId}/leave-balance",
    params(("userId" = u64, Path, description = "Employee id")),
    request_body = UpdateBalanceReq,
    responses(
        (status = 200, description = "Balance updated, remaining days recomputed", body = Object),
        (status = 400, description = "Validation error"),
        (status = 403, description = "HR/Admin only"),
        (status = 404, description = "Balance not found for this employee")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn update_employee_balance(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    hub: web::Data<NotificationHub>,
    path: web::Path<u64>,
    payload: web::Json<UpdateBalanceReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    payload.validate()?;

    let user_id = path.into_inner();
    let pool = pool.get_ref();
    let notes = payload.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let mut tx = pool.begin().await?;

    let previous = sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE id = ? AND user_id = ? FOR UPDATE"
    ))
    .bind(payload.balance_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("Balance Not Found", "Leave balance not found for this employee"))?;

    let remaining_days = remaining(payload.total_days, payload.used_days, payload.carried_over_days);

    sqlx::query(
        r#"
        UPDATE leave_balances
        SET total_days = ?, used_days = ?, carried_over_days = ?, max_carry_over = ?,
            remaining_days = ?, notes = ?
        WHERE id = ?
        "#,
    )
    .bind(payload.total_days)
    .bind(payload.used_days)
    .bind(payload.carried_over_days)
    .bind(payload.max_carry_over)
    .bind(remaining_days)
    .bind(notes)
    .bind(previous.id)
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query_as::<_, LeaveBalance>(&format!(
        "SELECT {BALANCE_COLUMNS} FROM leave_balances WHERE id = ?"
    ))
    .bind(previous.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(balance_id = previous.id, user_id, updated_by = auth.user_id, "Leave balance updated");

    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "leave_balance",
            entity_id: previous.id,
            action: "update",
            old_values: serde_json::to_value(&previous).ok(),
            new_values: serde_json::to_value(&updated).ok(),
        },
        &req,
    )
    .await;

    let message = format!(
        "Your leave balance for FY {}-{} was updated. Remaining: {} days.",
        updated.year,
        updated.year + 1,
        updated.remaining_days
    );
    if let Err(e) = send_system_notification(
        pool,
        &hub,
        user_id,
        "Leave Balance Updated",
        &message,
        NotificationKind::Info,
    )
    .await
    {
        warn!(error = %e, user_id, "Failed to notify employee about balance change");
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Leave balance updated successfully",
        "balance": updated,
    })))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolloverReq {
    #[validate(range(min = 2020, max = 2030, message = "New year must be between 2020 and 2030"))]
    #[schema(example = 2027)]
    pub new_year: i32,
}

#[utoipa::path(
    post,
    path = "/api/admin/financial-year-rollover",
    request_body = RolloverReq,
    responses(
        (status = 200, description = "Balances created for the new year", body = Object, example = json!({
            "message": "Financial year rollover to 2027 completed",
            "processedCount": 42
        })),
        (status = 400, description = "Validation error"),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn financial_year_rollover(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<RolloverReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    payload.validate()?;

    let pool = pool.get_ref();
    let new_year = payload.new_year;

    let processed = rollover(pool, new_year).await.map_err(|e| {
        error!(error = %e, new_year, "Financial year rollover failed");
        AppError::internal("Rollover Failed", "Financial year rollover failed and was rolled back")
    })?;

    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "financial_year",
            entity_id: new_year as u64,
            action: "rollover",
            old_values: None,
            new_values: Some(json!({ "newYear": new_year, "processedCount": processed })),
        },
        &req,
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Financial year rollover to {new_year} completed"),
        "processedCount": processed,
    })))
}

#[derive(Debug, Serialize, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultBalance {
    pub annual_leave: f64,
    pub sick_leave: f64,
    pub personal_leave: f64,
    pub max_carry_over: f64,
}

/// Allotments of the catalog's annual, sick and personal leave types.
fn default_balance(types: &[LeaveType]) -> DefaultBalance {
    let days = |needle: &str, fallback: f64| {
        types
            .iter()
            .find(|t| t.is_active && t.name.to_lowercase().contains(needle))
            .map_or(fallback, |t| t.default_days)
    };
    DefaultBalance {
        annual_leave: days("annual", 20.0),
        sick_leave: days("sick", 10.0),
        personal_leave: days("personal", 5.0),
        max_carry_over: ANNUAL_MAX_CARRY_OVER,
    }
}

#[utoipa::path(
    get,
    path = "/api/admin/default-balance",
    responses(
        (status = 200, description = "Default yearly allotments", body = DefaultBalance),
        (status = 403, description = "HR/Admin only")
    ),
    security(("bearer_auth" = [])),
    tag = "Leave Balance"
)]
pub async fn get_default_balance(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    let types = leave_types(pool.get_ref()).await?;
    Ok(HttpResponse::Ok().json(default_balance(&types)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn leave_type(id: u64, name: &str, default_days: f64) -> LeaveType {
        LeaveType {
            id,
            name: name.to_string(),
            description: None,
            default_days,
            color: "#4299e1".to_string(),
            is_active: true,
        }
    }

    fn user(id: u64, first_name: &str) -> User {
        User {
            id,
            email: format!("{first_name}@company.com"),
            password: "hash".into(),
            first_name: first_name.into(),
            last_name: "Tester".into(),
            employee_code: None,
            role: "employee".into(),
            department: None,
            position: None,
            manager_id: None,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    fn row(user_id: u64, leave_type_id: u64, name: &str) -> BalanceWithTypeRow {
        BalanceWithTypeRow {
            balance: LeaveBalance {
                id: user_id * 10 + leave_type_id,
                user_id,
                leave_type_id,
                year: 2026,
                total_days: 20.0,
                used_days: 0.0,
                remaining_days: 20.0,
                carried_over_days: 0.0,
                max_carry_over: 0.0,
                notes: None,
                is_active: true,
            },
            leave_type_name: name.into(),
            leave_type_color: "#4299e1".into(),
        }
    }

    #[test]
    fn defaults_come_from_the_catalog() {
        let types = vec![
            leave_type(1, "Annual Leave", 24.0),
            leave_type(2, "Sick Leave", 12.0),
        ];
        assert_eq!(
            default_balance(&types),
            DefaultBalance {
                annual_leave: 24.0,
                sick_leave: 12.0,
                personal_leave: 5.0,
                max_carry_over: 5.0,
            }
        );
    }

    #[test]
    fn balances_are_grouped_under_their_employee() {
        let users = vec![user(1, "ana"), user(2, "ben"), user(3, "cy")];
        let rows = vec![row(2, 1, "Annual Leave"), row(1, 1, "Annual Leave"), row(2, 2, "Sick Leave")];

        let grouped = group_balances(users, rows);

        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[0].employee.id, 1);
        assert_eq!(grouped[0].balances.len(), 1);
        assert_eq!(grouped[1].balances.len(), 2);
        assert!(grouped[2].balances.is_empty());

        let json = serde_json::to_value(&grouped[1]).unwrap();
        assert_eq!(json["firstName"], "ben");
        assert_eq!(json["balances"][1]["leaveType"]["name"], "Sick Leave");
    }

    #[test]
    fn year_info_spans_the_financial_year() {
        let info = financial_year_info(2026, 4).unwrap();
        assert_eq!(info.start_date, NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(info.end_date, NaiveDate::from_ymd_opt(2027, 3, 31).unwrap());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["currentYear"], 2026);
        assert_eq!(json["startDate"], "2026-04-01");
    }

    #[test]
    fn balance_edits_reject_negative_values() {
        let req = UpdateBalanceReq {
            balance_id: 1,
            total_days: 20.0,
            used_days: -1.0,
            carried_over_days: 0.0,
            max_carry_over: 5.0,
            notes: None,
        };
        let err: AppError = req.validate().unwrap_err().into();
        assert!(matches!(err, AppError::Validation(ref d) if d[0].field == "usedDays"));
    }

    #[test]
    fn rollover_year_is_bounded() {
        assert!(RolloverReq { new_year: 2031 }.validate().is_err());
        assert!(RolloverReq { new_year: 2027 }.validate().is_ok());
    }
}
