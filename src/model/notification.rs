use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::role::Role;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationCategory {
    LeaveRequest,
    LeaveApproval,
    LeaveRejection,
    System,
    Reminder,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub category: String,
    pub recipient_role: Option<String>,
    pub related_id: Option<u64>,
    pub related_type: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, category, \
     recipient_role, related_id, related_type, is_read, read_at, created_at";

impl Notification {
    /// A user may see a notification addressed to them, or one targeted at their role.
    pub fn visible_to(&self, user_id: u64, role: Role) -> bool {
        self.user_id == user_id
            || self
                .recipient_role
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case(role.as_ref()))
    }
}

/// Row to be inserted; ids and timestamps come from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub user_id: u64,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub category: NotificationCategory,
    pub recipient_role: Option<Role>,
    pub related_id: Option<u64>,
    pub related_type: Option<String>,
}

impl NewNotification {
    pub fn new(
        user_id: u64,
        title: impl Into<String>,
        message: impl Into<String>,
        kind: NotificationKind,
        category: NotificationCategory,
    ) -> Self {
        Self {
            user_id,
            title: title.into(),
            message: message.into(),
            kind,
            category,
            recipient_role: None,
            related_id: None,
            related_type: None,
        }
    }

    pub fn for_role(mut self, role: Role) -> Self {
        self.recipient_role = Some(role);
        self
    }

    pub fn about_leave(mut self, leave_id: u64) -> Self {
        self.related_id = Some(leave_id);
        self.related_type = Some("leave".to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(user_id: u64, recipient_role: Option<&str>) -> Notification {
        Notification {
            id: 1,
            user_id,
            title: "New Leave Request".into(),
            message: "m".into(),
            notification_type: "info".into(),
            category: "leave_request".into(),
            recipient_role: recipient_role.map(str::to_string),
            related_id: Some(3),
            related_type: Some("leave".into()),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn recipients_always_see_their_own_rows() {
        assert!(notification(5, None).visible_to(5, Role::Employee));
    }

    #[test]
    fn role_targeting_ignores_case() {
        let n = notification(9, Some("Manager"));
        assert!(n.visible_to(5, Role::Manager));
        assert!(!n.visible_to(5, Role::Employee));
        assert!(!notification(9, None).visible_to(5, Role::Admin));
    }

    #[test]
    fn categories_use_snake_case_column_text() {
        assert_eq!(NotificationCategory::LeaveRequest.as_ref(), "leave_request");
        assert_eq!(
            "leave_rejection".parse::<NotificationCategory>().unwrap(),
            NotificationCategory::LeaveRejection
        );
    }
}
