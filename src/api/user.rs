use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::auth::{auth::AuthUser, password::hash_password};
use crate::config::Config;
use crate::errors::AppError;
use crate::model::role::Role;
use crate::model::user::{USER_COLUMNS, User, UserProfile};
use crate::utils::audit_logger::{AuditEntry, AuditLogger};
use crate::utils::db_utils::{Filters, SqlValue, bind_query_as};
use crate::utils::financial_year::{current_financial_year, initialize_employee_balances};
use crate::utils::{email_cache, email_filter};

/// The signed-in user's row; a deactivated or deleted account is treated as signed out.
pub async fn load_active_user<'e, E>(executor: E, user_id: u64) -> Result<User, AppError>
where
    E: sqlx::Executor<'e, Database = sqlx::MySql>,
{
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(executor)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("Account no longer active".into()))
}

/// true  => email AVAILABLE
/// false => email TAKEN
pub async fn is_email_available(email: &str, pool: &MySqlPool) -> Result<bool, AppError> {
    // cuckoo filter: a miss means the email was never registered
    if !email_filter::might_exist(email) {
        return Ok(true);
    }

    if email_cache::is_taken(email).await {
        return Ok(false);
    }

    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = ? LIMIT 1)")
        .bind(email_filter::normalize(email))
        .fetch_one(pool)
        .await?;

    if exists {
        email_cache::mark_taken(email).await;
    }

    Ok(!exists)
}

/// MySQL names the violated key in the message, e.g.
/// `Duplicate entry 'EMP-7' for key 'users.uq_users_employee_code'`.
fn hits_employee_code_key(message: &str) -> bool {
    message.contains("uq_users_employee_code")
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserReq {
    #[validate(email(message = "Valid email is required"))]
    #[schema(example = "jane.doe@company.com")]
    pub email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 100, message = "First name is required"))]
    #[schema(example = "Jane")]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "Last name is required"))]
    #[schema(example = "Doe")]
    pub last_name: String,
    #[validate(length(max = 50, message = "Employee id cannot exceed 50 characters"))]
    #[schema(example = "E-1042")]
    pub employee_id: Option<String>,
    pub role: Option<Role>,
    #[validate(length(max = 100, message = "Department cannot exceed 100 characters"))]
    #[schema(example = "Engineering")]
    pub department: Option<String>,
    #[validate(length(max = 100, message = "Position cannot exceed 100 characters"))]
    pub position: Option<String>,
    pub manager_id: Option<u64>,
}

/* =========================
Create user (HR/Admin)
========================= */
#[utoipa::path(
    post,
    path = "/api/users",
    request_body = CreateUserReq,
    responses(
        (status = 201, description = "User created with this year's leave balances", body = Object, example = json!({
            "message": "User created successfully",
            "user": { "id": 8, "email": "jane.doe@company.com", "role": "employee" }
        })),
        (status = 400, description = "Validation error"),
        (status = 403, description = "HR/Admin only"),
        (status = 409, description = "Email or employee ID already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn create_user(
    req: HttpRequest,
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateUserReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_hr_or_admin()?;
    payload.validate()?;

    let role = payload.role.unwrap_or(Role::Employee);
    if role == Role::Admin {
        auth.require_admin()?;
    }

    let pool = pool.get_ref();
    let email = email_filter::normalize(&payload.email);

    if let Some(manager_id) = payload.manager_id {
        let manager_role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = ? AND is_active = TRUE")
            .bind(manager_id)
            .fetch_optional(pool)
            .await?;
        if !manager_role.is_some_and(|r| Role::from_db(&r).is_approver()) {
            return Err(AppError::field("managerId", "Manager must be an active manager, HR or admin user"));
        }
    }

    let email_taken = || AppError::conflict("Email Taken", "An account with this email already exists", None);

    if !is_email_available(&email, pool).await? {
        return Err(email_taken());
    }

    let password_hash = hash_password(&payload.password).map_err(|e| {
        error!(error = %e, "Failed to hash password");
        AppError::internal("User Creation Failed", "Could not create the account")
    })?;

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users
            (email, password, first_name, last_name, employee_code, role, department, position, manager_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(payload.employee_id.as_deref())
    .bind(role.to_string())
    .bind(payload.department.as_deref())
    .bind(payload.position.as_deref())
    .bind(payload.manager_id)
    .execute(&mut *tx)
    .await;

    let user_id = match inserted {
        Ok(result) => result.last_insert_id(),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            if hits_employee_code_key(db.message()) {
                return Err(AppError::conflict(
                    "Employee ID Taken",
                    "An account with this employee ID already exists",
                    None,
                ));
            }
            email_cache::mark_taken(&email).await;
            return Err(email_taken());
        }
        Err(e) => return Err(e.into()),
    };

    let year = current_financial_year(config.fy_start_month);
    initialize_employee_balances(&mut *tx, user_id, year).await?;

    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    email_filter::insert(&email);
    email_cache::mark_taken(&email).await;

    info!(user_id, role = %role, created_by = auth.user_id, "User created");

    AuditLogger::log_data_modification(
        pool,
        AuditEntry {
            user_id: auth.user_id,
            entity_type: "user",
            entity_id: user_id,
            action: "create",
            old_values: None,
            new_values: Some(json!({
                "email": email,
                "role": role,
                "department": payload.department,
                "managerId": payload.manager_id,
            })),
        },
        &req,
    )
    .await;

    Ok(HttpResponse::Created().json(json!({
        "message": "User created successfully",
        "user": user.profile(),
    })))
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct UserSearchQuery {
    /// Matches first name, last name or email
    pub search: Option<String>,
    /// employee | manager | hr | admin
    pub role: Option<String>,
    /// Maximum rows (1-100, default 20)
    pub limit: Option<u64>,
}

/* =========================
List / search users (approvers)
========================= */
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserSearchQuery),
    responses(
        (status = 200, description = "Active users", body = Object),
        (status = 400, description = "Invalid query"),
        (status = 403, description = "Manager/HR access required")
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserSearchQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_approver()?;

    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(AppError::field("limit", "limit must be between 1 and 100"));
    }

    let role = query
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(|r| r.parse::<Role>().map_err(|_| AppError::field("role", "Unknown role")))
        .transpose()?;

    let mut filters = Filters::new();
    filters
        .eq("is_active", true)
        .eq_opt("role", role.map(|r| r.to_string()));

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        filters.raw(
            "(first_name LIKE ? OR last_name LIKE ? OR email LIKE ?)",
            vec![
                SqlValue::String(pattern.clone()),
                SqlValue::String(pattern.clone()),
                SqlValue::String(pattern),
            ],
        );
    }

    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users{} ORDER BY first_name, last_name LIMIT ?",
        filters.where_clause()
    );
    let users = bind_query_as(sqlx::query_as::<_, User>(&sql), filters.values())
        .bind(limit)
        .fetch_all(pool.get_ref())
        .await?;

    let users: Vec<UserProfile> = users.iter().map(User::profile).collect();
    Ok(HttpResponse::Ok().json(json!({ "users": users })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn employee_code_clashes_are_told_apart_from_email_clashes() {
        assert!(hits_employee_code_key(
            "Duplicate entry 'EMP-7' for key 'users.uq_users_employee_code'"
        ));
        assert!(hits_employee_code_key(
            "Duplicate entry 'EMP-7' for key 'uq_users_employee_code'"
        ));
        assert!(!hits_employee_code_key(
            "Duplicate entry 'dana.lee@company.com' for key 'users.uq_users_email'"
        ));
    }
}
