use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use derive_more::Display;
use serde::Serialize;
use serde_json::{Value, json};
use validator::ValidationErrors;

/// One offending input field, reported back with a 400.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Display)]
pub enum AppError {
    #[display(fmt = "Validation Error")]
    Validation(Vec<FieldError>),
    #[display(fmt = "{}: {}", title, message)]
    BadRequest { title: &'static str, message: String },
    #[display(fmt = "Unauthorized: {}", _0)]
    Unauthorized(String),
    #[display(fmt = "Access Denied: {}", _0)]
    Forbidden(String),
    #[display(fmt = "{}: {}", title, message)]
    NotFound { title: &'static str, message: String },
    #[display(fmt = "{}: {}", title, message)]
    Conflict {
        title: &'static str,
        message: String,
        existing: Option<Value>,
    },
    #[display(fmt = "{}: {}", title, message)]
    Internal {
        title: &'static str,
        message: &'static str,
    },
}

impl AppError {
    pub fn bad_request(title: &'static str, message: impl Into<String>) -> Self {
        AppError::BadRequest {
            title,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Forbidden(message.into())
    }

    pub fn not_found(title: &'static str, message: impl Into<String>) -> Self {
        AppError::NotFound {
            title,
            message: message.into(),
        }
    }

    pub fn conflict(title: &'static str, message: impl Into<String>, existing: Option<Value>) -> Self {
        AppError::Conflict {
            title,
            message: message.into(),
            existing,
        }
    }

    pub fn internal(title: &'static str, message: &'static str) -> Self {
        AppError::Internal { title, message }
    }

    pub fn field(field: &str, message: &str) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "Database error");
        AppError::internal("Internal Server Error", "An unexpected error occurred")
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", e.code));
                    FieldError::new(camel_case(field), message)
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        AppError::Validation(details)
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(e: actix_multipart::MultipartError) -> Self {
        tracing::info!(error = %e, "Malformed multipart payload");
        AppError::bad_request("Invalid Upload", "The uploaded form data could not be read")
    }
}

/// Validation errors name struct fields; the API speaks camelCase.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Validation(details) => json!({
                "error": "Validation Error",
                "message": "Please check your input data",
                "details": details,
            }),
            AppError::BadRequest { title, message } | AppError::NotFound { title, message } => {
                json!({ "error": title, "message": message })
            }
            AppError::Unauthorized(message) => json!({
                "error": "Unauthorized",
                "message": message,
            }),
            AppError::Forbidden(message) => json!({
                "error": "Access Denied",
                "message": message,
            }),
            AppError::Conflict {
                title,
                message,
                existing,
            } => match existing {
                Some(existing) => json!({ "error": title, "message": message, "existing": existing }),
                None => json!({ "error": title, "message": message }),
            },
            AppError::Internal { title, message } => json!({ "error": title, "message": message }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use validator::Validate;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[derive(Validate)]
    struct LeaveInput {
        #[validate(length(min = 10, message = "Reason must be between 10 and 500 characters"))]
        reason: String,
        #[validate(range(min = 1))]
        leave_type_id: i64,
    }

    #[actix_web::test]
    async fn validation_errors_list_every_field() {
        let form = LeaveInput {
            reason: "short".into(),
            leave_type_id: 0,
        };
        let err: AppError = form.validate().unwrap_err().into();
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation Error");
        let details = body["details"].as_array().unwrap();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0]["field"], "leaveTypeId");
        assert_eq!(details[1]["field"], "reason");
        assert_eq!(
            details[1]["message"],
            "Reason must be between 10 and 500 characters"
        );
    }

    #[actix_web::test]
    async fn conflict_carries_the_existing_record() {
        let err = AppError::conflict(
            "Duplicate Submission",
            "A similar leave request already exists",
            Some(json!({ "id": 7 })),
        );
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["existing"]["id"], 7);
    }

    #[actix_web::test]
    async fn internal_errors_keep_a_generic_message() {
        let (status, body) = body_json(sqlx::Error::RowNotFound.into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "An unexpected error occurred");
    }

    #[test]
    fn field_names_are_camel_cased() {
        assert_eq!(camel_case("rejection_reason"), "rejectionReason");
        assert_eq!(camel_case("reason"), "reason");
    }

    #[test]
    fn status_codes_follow_the_error_kind() {
        assert_eq!(AppError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::not_found("Leave Not Found", "x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
