use crate::config::Config;
use crate::errors::AppError;
use crate::{auth::jwt::verify_token, model::role::Role, models::TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub email: String,
    pub role: Role,
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // auth_middleware already decoded the token for protected routes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }
        ready(authenticate(req))
    }
}

pub(crate) fn authenticate(req: &HttpRequest) -> Result<AuthUser, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Missing token".into()))?;

    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| AppError::internal("Internal Server Error", "Config missing"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::Unauthorized("Invalid token".into()))?;

    if claims.token_type != TokenType::Access {
        return Err(AppError::Unauthorized("Access token required".into()));
    }

    let role = claims
        .role
        .parse::<Role>()
        .map_err(|_| AppError::Unauthorized("Invalid role".into()))?;

    Ok(AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role,
    })
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin only"))
        }
    }

    pub fn require_hr_or_admin(&self) -> Result<(), AppError> {
        if matches!(self.role, Role::Admin | Role::Hr) {
            Ok(())
        } else {
            Err(AppError::forbidden("HR/Admin only"))
        }
    }

    /// Managers, HR and admins.
    pub fn require_approver(&self) -> Result<(), AppError> {
        if self.role.is_approver() {
            Ok(())
        } else {
            Err(AppError::forbidden("Manager/HR access required"))
        }
    }

    pub fn is_manager(&self) -> bool {
        self.role == Role::Manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{generate_access_token, generate_refresh_token};
    use actix_web::test::TestRequest;

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/test".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            _ => None,
        })
        .unwrap()
    }

    fn request_with(token: &str) -> HttpRequest {
        TestRequest::default()
            .app_data(Data::new(config()))
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_http_request()
    }

    #[test]
    fn access_tokens_authenticate() {
        let token = generate_access_token(4, "m@company.com", "manager", "test-secret", 60).unwrap();
        let user = authenticate(&request_with(&token)).unwrap();
        assert_eq!(user.user_id, 4);
        assert_eq!(user.role, Role::Manager);
        assert!(user.require_approver().is_ok());
        assert!(user.require_hr_or_admin().is_err());
    }

    #[test]
    fn refresh_tokens_are_not_accepted_for_api_calls() {
        let (token, _) = generate_refresh_token(4, "m@company.com", "manager", "test-secret", 60).unwrap();
        assert!(matches!(
            authenticate(&request_with(&token)),
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let req = TestRequest::default()
            .app_data(Data::new(config()))
            .to_http_request();
        assert!(matches!(authenticate(&req), Err(AppError::Unauthorized(_))));
    }
}
