use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::user::UserSummary;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    /// Status only ever moves out of `pending`, and only once.
    pub fn can_transition_to(self, next: LeaveStatus) -> bool {
        self == LeaveStatus::Pending && next != LeaveStatus::Pending
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HalfDayType {
    Morning,
    Afternoon,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Leave {
    pub id: u64,
    pub user_id: u64,
    pub leave_type_id: u64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub number_of_days: f64,
    pub number_of_hours: f64,
    pub reason: String,
    pub is_half_day: bool,
    pub half_day_type: Option<String>,
    pub emergency_contact: Option<String>,
    pub handover_notes: Option<String>,
    pub attachment_path: Option<String>,
    pub status: String,
    pub approved_by: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub manager_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Leave {
    pub fn status(&self) -> Option<LeaveStatus> {
        self.status.parse().ok()
    }
}

pub const LEAVE_COLUMNS: &str = "id, user_id, leave_type_id, start_date, end_date, number_of_days, \
     number_of_hours, reason, is_half_day, half_day_type, emergency_contact, handover_notes, \
     attachment_path, status, approved_by, approved_at, rejection_reason, manager_notes, \
     created_at, updated_at";

/// Leave joined with its type, requester and approver. Append a WHERE clause.
pub const LEAVE_DETAIL_SELECT: &str = r#"
    SELECT
        l.id, l.user_id, l.leave_type_id, l.start_date, l.end_date, l.number_of_days,
        l.number_of_hours, l.reason, l.is_half_day, l.half_day_type, l.emergency_contact,
        l.handover_notes, l.attachment_path, l.status, l.approved_by, l.approved_at,
        l.rejection_reason, l.manager_notes, l.created_at, l.updated_at,
        lt.name AS leave_type_name,
        lt.color AS leave_type_color,
        lt.description AS leave_type_description,
        u.first_name AS requester_first_name,
        u.last_name AS requester_last_name,
        u.email AS requester_email,
        u.department AS requester_department,
        u.position AS requester_position,
        u.manager_id AS requester_manager_id,
        a.first_name AS approver_first_name,
        a.last_name AS approver_last_name,
        a.email AS approver_email
    FROM leaves l
    JOIN leave_types lt ON lt.id = l.leave_type_id
    JOIN users u ON u.id = l.user_id
    LEFT JOIN users a ON a.id = l.approved_by
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeaveDetailRow {
    #[sqlx(flatten)]
    pub leave: Leave,
    pub leave_type_name: Option<String>,
    pub leave_type_color: Option<String>,
    pub leave_type_description: Option<String>,
    pub requester_first_name: Option<String>,
    pub requester_last_name: Option<String>,
    pub requester_email: Option<String>,
    pub requester_department: Option<String>,
    pub requester_position: Option<String>,
    pub requester_manager_id: Option<u64>,
    pub approver_first_name: Option<String>,
    pub approver_last_name: Option<String>,
    pub approver_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaveTypeSummary {
    pub name: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveView {
    #[serde(flatten)]
    pub leave: Leave,
    pub leave_type: LeaveTypeSummary,
    pub user: Option<UserSummary>,
    pub approver: Option<UserSummary>,
}

impl LeaveDetailRow {
    pub fn into_view(self) -> LeaveView {
        let user = match (self.requester_first_name, self.requester_last_name, self.requester_email) {
            (Some(first_name), Some(last_name), Some(email)) => Some(UserSummary {
                id: self.leave.user_id,
                first_name,
                last_name,
                email,
                department: self.requester_department,
                position: self.requester_position,
                manager_id: self.requester_manager_id,
            }),
            _ => None,
        };

        let approver = match (
            self.leave.approved_by,
            self.approver_first_name,
            self.approver_last_name,
            self.approver_email,
        ) {
            (Some(id), Some(first_name), Some(last_name), Some(email)) => Some(UserSummary {
                id,
                first_name,
                last_name,
                email,
                department: None,
                position: None,
                manager_id: None,
            }),
            _ => None,
        };

        LeaveView {
            leave_type: LeaveTypeSummary {
                name: self.leave_type_name.unwrap_or_default(),
                color: self.leave_type_color.unwrap_or_else(|| "#4299e1".to_string()),
                description: self.leave_type_description,
            },
            leave: self.leave,
            user,
            approver,
        }
    }
}
