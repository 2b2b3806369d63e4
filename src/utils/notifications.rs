use sqlx::{MySqlConnection, MySqlPool};
use tracing::{debug, error};

use crate::model::leave::Leave;
use crate::model::notification::{
    NOTIFICATION_COLUMNS, NewNotification, Notification, NotificationCategory, NotificationKind,
};
use crate::model::role::Role;
use crate::model::user::User;
use crate::utils::realtime::{NotificationEvent, NotificationHub};

async fn insert_notification(
    conn: &mut MySqlConnection,
    new: &NewNotification,
) -> Result<Notification, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO notifications
            (user_id, title, message, notification_type, category,
             recipient_role, related_id, related_type)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(new.user_id)
    .bind(&new.title)
    .bind(&new.message)
    .bind(new.kind.as_ref())
    .bind(new.category.as_ref())
    .bind(new.recipient_role.map(|r| r.to_string()))
    .bind(new.related_id)
    .bind(new.related_type.as_deref())
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, Notification>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?"
    ))
    .bind(result.last_insert_id())
    .fetch_one(&mut *conn)
    .await
}

/// Stores one notification and pushes it to the recipient if connected.
pub async fn create_notification(
    pool: &MySqlPool,
    hub: &NotificationHub,
    new: NewNotification,
) -> Result<Notification, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let notification = insert_notification(&mut conn, &new).await.map_err(|e| {
        error!(error = %e, user_id = new.user_id, "Error creating notification");
        e
    })?;

    hub.publish(NotificationEvent::from(&notification));
    Ok(notification)
}

/// All-or-nothing insert; events go out only after commit.
pub async fn send_bulk_notifications(
    pool: &MySqlPool,
    hub: &NotificationHub,
    batch: Vec<NewNotification>,
) -> Result<Vec<Notification>, sqlx::Error> {
    if batch.is_empty() {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await?;
    let mut created = Vec::with_capacity(batch.len());

    for new in &batch {
        match insert_notification(&mut tx, new).await {
            Ok(n) => created.push(n),
            Err(e) => {
                error!(error = %e, "Error sending bulk notifications");
                tx.rollback().await?;
                return Err(e);
            }
        }
    }

    tx.commit().await?;

    for notification in &created {
        hub.publish(NotificationEvent::from(notification));
    }

    debug!(count = created.len(), "Bulk notifications created");
    Ok(created)
}

/// Confirmation for the submitter plus one "New Leave Request" per reviewer.
/// The submitter's own manager is the only reviewer when set, otherwise every
/// id in `approvers`.
pub fn plan_submission_notifications(
    leave: &Leave,
    submitter: &User,
    approvers: &[u64],
) -> Vec<NewNotification> {
    let days = leave.number_of_days;
    let mut planned = vec![
        NewNotification::new(
            submitter.id,
            "Leave Submitted",
            format!("Your leave request for {days} day(s) has been submitted and is pending approval."),
            NotificationKind::Info,
            NotificationCategory::System,
        )
        .for_role(Role::Employee)
        .about_leave(leave.id),
    ];

    let recipients: Vec<u64> = match submitter.manager_id {
        Some(manager_id) => vec![manager_id],
        None => approvers.to_vec(),
    };

    let message = format!(
        "{} has submitted a leave request for {days} day(s).",
        submitter.full_name()
    );

    planned.extend(recipients.into_iter().map(|recipient| {
        NewNotification::new(
            recipient,
            "New Leave Request",
            message.clone(),
            NotificationKind::Info,
            NotificationCategory::LeaveRequest,
        )
        .for_role(Role::Manager)
        .about_leave(leave.id)
    }));

    planned
}

async fn active_approver_ids(pool: &MySqlPool) -> Result<Vec<u64>, sqlx::Error> {
    sqlx::query_scalar::<_, u64>(
        "SELECT id FROM users WHERE role IN ('manager', 'hr', 'admin') AND is_active = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

pub async fn create_leave_submission_notifications(
    pool: &MySqlPool,
    hub: &NotificationHub,
    leave: &Leave,
    submitter: &User,
) -> Result<Vec<Notification>, sqlx::Error> {
    let approvers = if submitter.manager_id.is_some() {
        Vec::new()
    } else {
        active_approver_ids(pool).await?
    };

    let planned = plan_submission_notifications(leave, submitter, &approvers);
    send_bulk_notifications(pool, hub, planned).await
}

pub fn decision_notification(leave: &Leave, leave_type_name: &str, approved: bool) -> NewNotification {
    let (title, verb, kind, category) = if approved {
        (
            "Leave Approved",
            "approved",
            NotificationKind::Success,
            NotificationCategory::LeaveApproval,
        )
    } else {
        (
            "Leave Rejected",
            "rejected",
            NotificationKind::Error,
            NotificationCategory::LeaveRejection,
        )
    };

    NewNotification::new(
        leave.user_id,
        title,
        format!("Your leave request for {leave_type_name} has been {verb}"),
        kind,
        category,
    )
    .about_leave(leave.id)
}

pub async fn send_leave_decision_notification(
    pool: &MySqlPool,
    hub: &NotificationHub,
    leave: &Leave,
    leave_type_name: &str,
    approved: bool,
) -> Result<Notification, sqlx::Error> {
    create_notification(pool, hub, decision_notification(leave, leave_type_name, approved)).await
}

pub async fn send_system_notification(
    pool: &MySqlPool,
    hub: &NotificationHub,
    user_id: u64,
    title: &str,
    message: &str,
    kind: NotificationKind,
) -> Result<Notification, sqlx::Error> {
    let new = NewNotification::new(user_id, title, message, kind, NotificationCategory::System);
    create_notification(pool, hub, new).await
}

pub async fn send_reminder_notification(
    pool: &MySqlPool,
    hub: &NotificationHub,
    user_id: u64,
    title: &str,
    message: &str,
) -> Result<Notification, sqlx::Error> {
    let new = NewNotification::new(
        user_id,
        title,
        message,
        NotificationKind::Warning,
        NotificationCategory::Reminder,
    );
    create_notification(pool, hub, new).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn leave(days: f64) -> Leave {
        let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
        Leave {
            id: 42,
            user_id: 7,
            leave_type_id: 1,
            start_date: date,
            end_date: date,
            number_of_days: days,
            number_of_hours: 0.0,
            reason: "Family event out of town".into(),
            is_half_day: false,
            half_day_type: None,
            emergency_contact: None,
            handover_notes: None,
            attachment_path: None,
            status: "pending".into(),
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            manager_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn submitter(manager_id: Option<u64>) -> User {
        User {
            id: 7,
            email: "jane.doe@company.com".into(),
            password: "hash".into(),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            employee_code: Some("E-007".into()),
            role: "employee".into(),
            department: Some("Engineering".into()),
            position: None,
            manager_id,
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_manager_is_the_only_reviewer_notified() {
        let planned = plan_submission_notifications(&leave(3.0), &submitter(Some(4)), &[1, 2, 4]);

        assert_eq!(planned.len(), 2);
        let confirmation = &planned[0];
        assert_eq!(confirmation.user_id, 7);
        assert_eq!(confirmation.title, "Leave Submitted");
        assert_eq!(
            confirmation.message,
            "Your leave request for 3 day(s) has been submitted and is pending approval."
        );
        assert_eq!(confirmation.category, NotificationCategory::System);
        assert_eq!(confirmation.recipient_role, Some(Role::Employee));

        let review = &planned[1];
        assert_eq!(review.user_id, 4);
        assert_eq!(review.message, "Jane Doe has submitted a leave request for 3 day(s).");
        assert_eq!(review.category, NotificationCategory::LeaveRequest);
        assert_eq!(review.recipient_role, Some(Role::Manager));
        assert_eq!(review.related_id, Some(42));
    }

    #[test]
    fn without_a_manager_every_approver_is_notified() {
        let planned = plan_submission_notifications(&leave(1.5), &submitter(None), &[1, 2, 3]);

        let reviewers: Vec<u64> = planned.iter().skip(1).map(|n| n.user_id).collect();
        assert_eq!(reviewers, vec![1, 2, 3]);
        assert!(planned[1].message.contains("1.5 day(s)"));
    }

    #[test]
    fn no_approvers_still_confirms_to_the_submitter() {
        let planned = plan_submission_notifications(&leave(1.0), &submitter(None), &[]);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].user_id, 7);
    }

    #[test]
    fn decisions_map_to_kind_and_category() {
        let approved = decision_notification(&leave(2.0), "Annual Leave", true);
        assert_eq!(approved.title, "Leave Approved");
        assert_eq!(approved.message, "Your leave request for Annual Leave has been approved");
        assert_eq!(approved.kind, NotificationKind::Success);
        assert_eq!(approved.category, NotificationCategory::LeaveApproval);
        assert_eq!(approved.recipient_role, None);

        let rejected = decision_notification(&leave(2.0), "Sick Leave", false);
        assert_eq!(rejected.title, "Leave Rejected");
        assert_eq!(rejected.kind, NotificationKind::Error);
        assert_eq!(rejected.category, NotificationCategory::LeaveRejection);
    }
}
