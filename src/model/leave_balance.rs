use serde::{Deserialize, Serialize};

use super::leave::LeaveTypeSummary;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LeaveBalance {
    pub id: u64,
    pub user_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    pub total_days: f64,
    pub used_days: f64,
    pub remaining_days: f64,
    pub carried_over_days: f64,
    pub max_carry_over: f64,
    pub notes: Option<String>,
    pub is_active: bool,
}

pub const BALANCE_COLUMNS: &str = "id, user_id, leave_type_id, year, total_days, used_days, \
     remaining_days, carried_over_days, max_carry_over, notes, is_active";

pub const BALANCE_WITH_TYPE_SELECT: &str = r#"
    SELECT
        b.id, b.user_id, b.leave_type_id, b.year, b.total_days, b.used_days,
        b.remaining_days, b.carried_over_days, b.max_carry_over, b.notes, b.is_active,
        lt.name AS leave_type_name,
        lt.color AS leave_type_color
    FROM leave_balances b
    JOIN leave_types lt ON lt.id = b.leave_type_id
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BalanceWithTypeRow {
    #[sqlx(flatten)]
    pub balance: LeaveBalance,
    pub leave_type_name: String,
    pub leave_type_color: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    #[serde(flatten)]
    pub balance: LeaveBalance,
    pub leave_type: LeaveTypeSummary,
}

impl From<BalanceWithTypeRow> for BalanceView {
    fn from(row: BalanceWithTypeRow) -> Self {
        BalanceView {
            balance: row.balance,
            leave_type: LeaveTypeSummary {
                name: row.leave_type_name,
                color: row.leave_type_color,
                description: None,
            },
        }
    }
}
