use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "id": 1,
    "name": "Annual Leave",
    "description": "Regular annual leave",
    "defaultDays": 20.0,
    "color": "#4299e1",
    "isActive": true
}))]
pub struct LeaveType {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub default_days: f64,
    pub color: String,
    pub is_active: bool,
}

impl LeaveType {
    /// Annual leave is the only kind that carries over between financial years.
    pub fn is_annual(&self) -> bool {
        is_annual_name(&self.name)
    }

    pub fn max_carry_over(&self) -> f64 {
        if self.is_annual() { ANNUAL_MAX_CARRY_OVER } else { 0.0 }
    }
}

pub const ANNUAL_MAX_CARRY_OVER: f64 = 5.0;

pub fn is_annual_name(name: &str) -> bool {
    name.to_lowercase().contains("annual")
}

/// Catalog seeded when no leave types exist yet: (name, description, default days).
pub const DEFAULT_LEAVE_TYPES: [(&str, &str, f64); 5] = [
    ("Annual Leave", "Regular annual leave", 20.0),
    ("Sick Leave", "Medical leave", 10.0),
    ("Personal Leave", "Personal time off", 5.0),
    ("Maternity Leave", "Maternity leave", 90.0),
    ("Paternity Leave", "Paternity leave", 14.0),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn leave_type(name: &str) -> LeaveType {
        LeaveType {
            id: 1,
            name: name.to_string(),
            description: None,
            default_days: 10.0,
            color: "#4299e1".to_string(),
            is_active: true,
        }
    }

    #[test]
    fn only_annual_types_carry_over() {
        assert_eq!(leave_type("Annual Leave").max_carry_over(), 5.0);
        assert_eq!(leave_type("ANNUAL").max_carry_over(), 5.0);
        assert_eq!(leave_type("Sick Leave").max_carry_over(), 0.0);
    }
}
