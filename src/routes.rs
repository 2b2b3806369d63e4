use crate::{
    api::{audit, leave, leave_balance, notification, user},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    errors::AppError,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Result, anyhow};
use std::sync::Arc;

type Limiter = Arc<Governor<PeerIpKeyExtractor, NoOpMiddleware>>;

/// Per-route limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct RateLimiters {
    login: Limiter,
    refresh: Limiter,
    protected: Limiter,
}

impl RateLimiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            login: build_limiter(config.rate_login_per_min)?,
            refresh: build_limiter(config.rate_refresh_per_min)?,
            protected: build_limiter(config.rate_protected_per_min)?,
        })
    }
}

fn build_limiter(requests_per_min: u32) -> Result<Limiter> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        (60_000 / requests_per_min as u64).max(1)
    };
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit: {requests_per_min} requests per minute"))?;
    Ok(Arc::new(Governor::new(&cfg)))
}

/// Malformed JSON, query strings and path ids answer 400 in the usual error shape.
fn extractor_configs(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        AppError::bad_request("Invalid Request", err.to_string()).into()
    }))
    .app_data(web::QueryConfig::default().error_handler(|err, _req| {
        AppError::bad_request("Invalid Query", err.to_string()).into()
    }))
    .app_data(web::PathConfig::default().error_handler(|err, _req| {
        AppError::bad_request("Invalid Path", err.to_string()).into()
    }));
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &RateLimiters) {
    extractor_configs(cfg);

    // Public routes; registered ahead of the protected scope sharing its prefix
    cfg.service(
        web::scope(&format!("{}/auth", config.api_prefix))
            .service(
                web::resource("/login")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(limiters.refresh.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(limiters.login.clone())
                    .route(web::post().to(handlers::logout)),
            )
            .service(
                web::resource("/me")
                    .wrap(limiters.protected.clone())
                    .route(web::get().to(handlers::me)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limiters.protected.clone()) // rate limiting
            .service(
                web::scope("/leaves")
                    // /leaves
                    .service(
                        web::resource("")
                            .route(web::get().to(leave::list_own_leaves))
                            .route(web::post().to(leave::submit_leave)),
                    )
                    // static segments before /{id}
                    .service(web::resource("/types").route(web::get().to(leave::list_leave_types)))
                    .service(web::resource("/my-leaves").route(web::get().to(leave::my_leaves)))
                    .service(
                        web::resource("/pending/approvals").route(web::get().to(leave::pending_approvals)),
                    )
                    .service(web::resource("/all").route(web::get().to(leave::all_leaves)))
                    // /leaves/{id}
                    .service(web::resource("/{id}").route(web::get().to(leave::get_leave)))
                    .service(web::resource("/{id}/cancel").route(web::put().to(leave::cancel_leave)))
                    .service(web::resource("/{id}/approve").route(web::put().to(leave::review_leave))),
            )
            .service(
                web::scope("/notifications")
                    .service(web::resource("").route(web::get().to(notification::list_notifications)))
                    .service(web::resource("/unread/count").route(web::get().to(notification::unread_count)))
                    .service(web::resource("/stream").route(web::get().to(notification::notification_stream)))
                    .service(web::resource("/read-all").route(web::put().to(notification::mark_all_read)))
                    .service(
                        web::resource("/mark-all-read").route(web::put().to(notification::mark_all_read)),
                    )
                    .service(
                        web::resource("/audit/all").route(web::get().to(notification::audit_notifications)),
                    )
                    // /notifications/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(notification::get_notification))
                            .route(web::delete().to(notification::delete_notification)),
                    )
                    .service(web::resource("/{id}/read").route(web::put().to(notification::mark_read))),
            )
            .service(
                web::scope("/leave-balances")
                    .service(web::resource("/my-balances").route(web::get().to(leave_balance::my_balances))),
            )
            .service(
                web::scope("/admin")
                    .service(
                        web::resource("/financial-year-info")
                            .route(web::get().to(leave_balance::get_financial_year_info)),
                    )
                    .service(
                        web::resource("/employees/leave-balances")
                            .route(web::get().to(leave_balance::employees_with_balances)),
                    )
                    .service(
                        web::resource("/employees/{user_id}/leave-balance")
                            .route(web::get().to(leave_balance::employee_balance))
                            .route(web::put().to(leave_balance::update_employee_balance)),
                    )
                    .service(
                        web::resource("/financial-year-rollover")
                            .route(web::post().to(leave_balance::financial_year_rollover)),
                    )
                    .service(
                        web::resource("/default-balance").route(web::get().to(leave_balance::get_default_balance)),
                    ),
            )
            .service(
                web::scope("/audit")
                    .service(web::resource("/logs").route(web::get().to(audit::list_audit_logs)))
                    .service(web::resource("/logs/{id}").route(web::get().to(audit::get_audit_log))),
            )
            .service(
                web::resource("/users")
                    .route(web::get().to(user::list_users))
                    .route(web::post().to(user::create_user)),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST {api}/auth/refresh with refresh_token
//       └─ returns new access_token and rotates the refresh token

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, http::StatusCode, test, web::Data};
    use serde_json::Value;
    use sqlx::mysql::MySqlPoolOptions;

    use crate::auth::jwt::generate_access_token;
    use crate::utils::realtime::NotificationHub;

    const SECRET: &str = "route-test-secret";

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://root@127.0.0.1:1/unused".into()),
            "JWT_SECRET" => Some(SECRET.into()),
            _ => None,
        })
        .unwrap()
    }

    fn token(role: &str) -> String {
        generate_access_token(7, "someone@company.com", role, SECRET, 60).unwrap()
    }

    macro_rules! app {
        () => {{
            let config = config();
            let limiters = RateLimiters::from_config(&config).unwrap();
            // never connects: every request below is rejected before touching the database
            let pool = MySqlPoolOptions::new().connect_lazy(&config.database_url).unwrap();
            test::init_service(
                App::new()
                    .app_data(Data::new(pool))
                    .app_data(Data::new(config.clone()))
                    .app_data(Data::new(NotificationHub::new(8)))
                    .configure(|cfg| configure(cfg, &config, &limiters)),
            )
            .await
        }};
    }

    fn get(uri: &str) -> test::TestRequest {
        test::TestRequest::get()
            .uri(uri)
            .peer_addr("127.0.0.1:40000".parse().unwrap())
    }

    #[actix_web::test]
    async fn protected_routes_require_a_token() {
        let app = app!();
        let resp = test::call_service(&app, get("/api/leaves").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Unauthorized");
    }

    #[actix_web::test]
    async fn garbage_tokens_are_rejected() {
        let app = app!();
        let req = get("/api/notifications")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn employees_cannot_reach_approver_views() {
        let app = app!();
        let req = get("/api/leaves/pending/approvals")
            .insert_header(("Authorization", format!("Bearer {}", token("employee"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn admin_routes_are_hr_or_admin_only() {
        let app = app!();
        for uri in [
            "/api/admin/financial-year-info",
            "/api/admin/default-balance",
            "/api/admin/employees/leave-balances",
        ] {
            let req = get(uri)
                .insert_header(("Authorization", format!("Bearer {}", token("manager"))))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[actix_web::test]
    async fn financial_year_info_needs_no_database() {
        let app = app!();
        let req = get("/api/admin/financial-year-info")
            .insert_header(("Authorization", format!("Bearer {}", token("hr"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        let start = body["startDate"].as_str().unwrap();
        assert!(start.ends_with("-04-01"));
    }

    #[actix_web::test]
    async fn audit_trail_is_admin_only() {
        let app = app!();
        let req = get("/api/audit/logs")
            .insert_header(("Authorization", format!("Bearer {}", token("hr"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Admin only");
    }

    #[actix_web::test]
    async fn malformed_query_strings_answer_400() {
        let app = app!();
        let req = get("/api/notifications?isRead=maybe")
            .insert_header(("Authorization", format!("Bearer {}", token("employee"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn oversized_page_limits_are_rejected_before_querying() {
        let app = app!();
        let req = get("/api/leaves/my-leaves?limit=500")
            .insert_header(("Authorization", format!("Bearer {}", token("employee"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["details"][0]["field"], "limit");
    }

    #[actix_web::test]
    async fn unreachable_page_numbers_answer_400() {
        let app = app!();
        let req = get("/api/leaves/my-leaves?page=18446744073709551615&limit=50")
            .insert_header(("Authorization", format!("Bearer {}", token("employee"))))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["details"][0]["field"], "page");
    }
}
