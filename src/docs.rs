use crate::api::audit::AuditQuery;
use crate::api::leave::{AllLeavesQuery, MyLeavesQuery, ReviewLeaveReq};
use crate::api::leave_balance::{DefaultBalance, FinancialYearInfo, RolloverReq, UpdateBalanceReq};
use crate::api::notification::{NotificationAuditQuery, NotificationQuery};
use crate::api::user::{CreateUserReq, UserSearchQuery};
use crate::model::leave_type::LeaveType;
use crate::model::notification::{NotificationCategory, NotificationKind};
use crate::model::role::Role;
use crate::models::{LoginReqDto, Pagination};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Leave Desk API",
        version = "1.0.0",
        description = r#"
## Leave Desk

REST backend for corporate leave management.

### Key Features
- **Leave requests**
  - Submit leave with attachments, cancel pending requests, browse history
- **Approvals**
  - Managers review their team, HR and admins review everyone
- **Leave balances**
  - Per financial year, with annual-leave carry over and yearly rollover
- **Notifications**
  - Stored notifications plus a server-sent event stream
- **Audit trail**
  - Every data change with the acting user, IP and user agent

### Security
Every endpoint except login, refresh and logout expects a **JWT Bearer** access token.

### Response Format
- JSON bodies; errors as `{ "error", "message", "details"? }`
- Pagination supported for list endpoints
"#,
    ),
    paths(
        crate::auth::handlers::login,

        crate::api::leave::list_leave_types,
        crate::api::leave::submit_leave,
        crate::api::leave::list_own_leaves,
        crate::api::leave::my_leaves,
        crate::api::leave::get_leave,
        crate::api::leave::cancel_leave,
        crate::api::leave::pending_approvals,
        crate::api::leave::all_leaves,
        crate::api::leave::review_leave,

        crate::api::notification::list_notifications,
        crate::api::notification::unread_count,
        crate::api::notification::notification_stream,
        crate::api::notification::get_notification,
        crate::api::notification::mark_read,
        crate::api::notification::mark_all_read,
        crate::api::notification::delete_notification,
        crate::api::notification::audit_notifications,

        crate::api::leave_balance::my_balances,
        crate::api::leave_balance::get_financial_year_info,
        crate::api::leave_balance::employees_with_balances,
        crate::api::leave_balance::employee_balance,
        crate::api::leave_balance::update_employee_balance,
        crate::api::leave_balance::financial_year_rollover,
        crate::api::leave_balance::get_default_balance,

        crate::api::audit::list_audit_logs,
        crate::api::audit::get_audit_log,

        crate::api::user::create_user,
        crate::api::user::list_users
    ),
    components(
        schemas(
            LoginReqDto,
            LeaveType,
            MyLeavesQuery,
            AllLeavesQuery,
            ReviewLeaveReq,
            NotificationQuery,
            NotificationAuditQuery,
            NotificationKind,
            NotificationCategory,
            FinancialYearInfo,
            UpdateBalanceReq,
            RolloverReq,
            DefaultBalance,
            AuditQuery,
            CreateUserReq,
            UserSearchQuery,
            Role,
            Pagination
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Sign in and token rotation"),
        (name = "Leave", description = "Leave submission and approval APIs"),
        (name = "Notification", description = "Notification APIs"),
        (name = "Leave Balance", description = "Financial-year leave balance APIs"),
        (name = "Audit", description = "Audit trail APIs"),
        (name = "User", description = "User management APIs"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_the_leave_routes_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/api/leaves/{id}/approve"));
        assert!(doc.paths.paths.contains_key("/api/admin/financial-year-rollover"));
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
