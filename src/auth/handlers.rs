use crate::{
    api::user::load_active_user,
    auth::{
        auth::AuthUser,
        jwt::{generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    errors::AppError,
    model::user::{USER_COLUMNS, User},
    models::{Claims, LoginReqDto, TokenType},
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument};
use validator::Validate;

fn token_error(e: jsonwebtoken::errors::Error) -> AppError {
    error!(error = %e, "Failed to sign token");
    AppError::internal("Authentication Failed", "Could not issue a session token")
}

fn bearer(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

/// Access and refresh tokens carrying the user row's current email and role.
fn issue_tokens(user: &User, config: &Config) -> Result<(String, String, Claims), AppError> {
    let role = user.role();
    let access_token = generate_access_token(
        user.id,
        &user.email,
        role.as_ref(),
        &config.jwt_secret,
        config.access_token_ttl,
    )
    .map_err(token_error)?;

    let (refresh_token, refresh_claims) = generate_refresh_token(
        user.id,
        &user.email,
        role.as_ref(),
        &config.jwt_secret,
        config.refresh_token_ttl,
    )
    .map_err(token_error)?;

    Ok((access_token, refresh_token, refresh_claims))
}

async fn store_refresh_token(pool: &MySqlPool, claims: &Claims) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(claims.user_id)
    .bind(&claims.jti)
    .bind(claims.exp as i64)
    .execute(pool)
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to store refresh token");
        AppError::internal("Authentication Failed", "Could not start a session")
    })?;
    Ok(())
}

/// POST /auth/login
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Signed in", body = Object, example = json!({
            "token": "<jwt>",
            "refreshToken": "<jwt>",
            "user": { "id": 1, "email": "jane.doe@company.com", "role": "employee" }
        })),
        (status = 400, description = "Validation error"),
        (status = 401, description = "Invalid credentials")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, payload),
    fields(email = %payload.email)
)]
pub async fn login(
    payload: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    payload.validate()?;

    debug!("Fetching user from database");

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = ? AND is_active = TRUE"
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(user) = user else {
        info!("Invalid credentials: user not found");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    if let Err(e) = verify_password(&payload.password, &user.password) {
        info!(error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    debug!(user_id = user.id, "Password verified, issuing tokens");

    let (access_token, refresh_token, refresh_claims) = issue_tokens(&user, &config)?;

    store_refresh_token(pool.get_ref(), &refresh_claims).await?;

    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(user.id)
        .execute(pool.get_ref())
        .await
    {
        // not worth failing the login over
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = user.id, "Login successful");

    Ok(HttpResponse::Ok().json(json!({
        "token": access_token,
        "refreshToken": refresh_token,
        "user": user.profile(),
    })))
}

/// GET /auth/me
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    let user = load_active_user(pool.get_ref(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(user.profile()))
}

/// POST /auth/refresh, rotating the refresh token
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let token = bearer(&req).ok_or_else(|| AppError::Unauthorized("No token".into()))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized("Refresh token required".into()));
    }

    let mut tx = pool.begin().await?;

    // revoke in the same statement that checks it, so a token is only ever used once
    let revoked = sqlx::query(
        "UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ? AND revoked = FALSE AND expires_at > NOW()",
    )
    .bind(&claims.jti)
    .execute(&mut *tx)
    .await?;

    if revoked.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::Unauthorized("Refresh token revoked or expired".into()));
    }

    // deactivated accounts stop here; role changes take effect on the next rotation
    let user = load_active_user(&mut *tx, claims.user_id).await?;
    let (access_token, new_refresh_token, new_claims) = issue_tokens(&user, &config)?;

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(new_claims.user_id)
    .bind(&new_claims.jti)
    .bind(new_claims.exp as i64)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(HttpResponse::Ok().json(json!({
        "token": access_token,
        "refreshToken": new_refresh_token
    })))
}

/// POST /auth/logout. Always answers 204; revokes the refresh token when one is presented.
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    let Some(token) = bearer(&req) else {
        return HttpResponse::NoContent().finish();
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}
