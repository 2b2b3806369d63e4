use chrono::NaiveDate;

use crate::errors::AppError;
use crate::model::role::Role;

pub const HOURS_PER_DAY: f64 = 8.0;

/// Inclusive calendar days in the range, half a day less for half-day requests.
pub fn count_days(start: NaiveDate, end: NaiveDate, is_half_day: bool) -> f64 {
    let days = (end - start).num_days() + 1;
    let days = days as f64;
    if is_half_day { days - 0.5 } else { days }
}

pub fn validate_range(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Result<(), AppError> {
    if start < today {
        return Err(AppError::bad_request("Invalid Date", "Start date cannot be in the past"));
    }
    if end < start {
        return Err(AppError::bad_request("Invalid Date", "End date cannot be before start date"));
    }
    Ok(())
}

pub fn ranges_overlap(a_start: NaiveDate, a_end: NaiveDate, b_start: NaiveDate, b_end: NaiveDate) -> bool {
    a_start <= b_end && b_start <= a_end
}

/// Whether `reviewer` may approve or reject a request from someone managed by
/// `requester_manager_id`. Managers only review their direct reports.
pub fn can_review(reviewer_id: u64, reviewer_role: Role, requester_manager_id: Option<u64>) -> bool {
    match reviewer_role {
        Role::Hr | Role::Admin => true,
        Role::Manager => requester_manager_id == Some(reviewer_id),
        Role::Employee => false,
    }
}

/// Owners, approvers, and the approver of record may read a leave.
pub fn can_view(viewer_id: u64, viewer_role: Role, owner_id: u64, approved_by: Option<u64>) -> bool {
    viewer_id == owner_id || viewer_role.is_approver() || approved_by == Some(viewer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn counts_both_ends_of_the_range() {
        assert_eq!(count_days(date(2026, 5, 4), date(2026, 5, 8), false), 5.0);
        assert_eq!(count_days(date(2026, 5, 4), date(2026, 5, 4), false), 1.0);
    }

    #[test]
    fn half_day_takes_off_half() {
        assert_eq!(count_days(date(2026, 5, 4), date(2026, 5, 4), true), 0.5);
        assert_eq!(count_days(date(2026, 5, 4), date(2026, 5, 5), true), 1.5);
    }

    #[test]
    fn ranges_spanning_months_count_correctly() {
        assert_eq!(count_days(date(2026, 2, 27), date(2026, 3, 2), false), 4.0);
    }

    #[test]
    fn past_start_dates_are_rejected() {
        let today = date(2026, 10, 18);
        let err = validate_range(date(2026, 10, 17), date(2026, 10, 20), today).unwrap_err();
        assert!(err.to_string().contains("Start date cannot be in the past"));
        assert!(validate_range(today, today, today).is_ok());
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let today = date(2026, 10, 18);
        let err = validate_range(date(2026, 10, 22), date(2026, 10, 20), today).unwrap_err();
        assert!(err.to_string().contains("End date cannot be before start date"));
    }

    #[test]
    fn overlap_is_inclusive_at_the_edges() {
        let (s, e) = (date(2026, 6, 10), date(2026, 6, 15));
        assert!(ranges_overlap(s, e, date(2026, 6, 15), date(2026, 6, 20)));
        assert!(ranges_overlap(s, e, date(2026, 6, 1), date(2026, 6, 10)));
        assert!(ranges_overlap(s, e, date(2026, 6, 1), date(2026, 6, 30)));
        assert!(ranges_overlap(s, e, date(2026, 6, 11), date(2026, 6, 12)));
        assert!(!ranges_overlap(s, e, date(2026, 6, 16), date(2026, 6, 20)));
        assert!(!ranges_overlap(s, e, date(2026, 6, 1), date(2026, 6, 9)));
    }

    #[test]
    fn managers_only_review_their_own_team() {
        assert!(can_review(4, Role::Manager, Some(4)));
        assert!(!can_review(4, Role::Manager, Some(5)));
        assert!(!can_review(4, Role::Manager, None));
        assert!(can_review(4, Role::Hr, Some(5)));
        assert!(can_review(4, Role::Admin, None));
        assert!(!can_review(4, Role::Employee, Some(4)));
    }

    #[test]
    fn employees_only_see_their_own_leave() {
        assert!(can_view(3, Role::Employee, 3, None));
        assert!(!can_view(3, Role::Employee, 4, None));
        assert!(can_view(3, Role::Employee, 4, Some(3)));
        assert!(can_view(3, Role::Manager, 4, None));
    }
}
