use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    Employee,
    Manager,
    Hr,
    Admin,
}

impl Role {
    /// Roles allowed to review other people's leave.
    pub const APPROVERS: [Role; 3] = [Role::Manager, Role::Hr, Role::Admin];

    pub fn is_approver(self) -> bool {
        Self::APPROVERS.contains(&self)
    }

    /// Parses a stored role, treating anything unknown as a plain employee.
    pub fn from_db(value: &str) -> Self {
        value.parse().unwrap_or(Role::Employee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("HR".parse::<Role>().unwrap(), Role::Hr);
        assert_eq!("Manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(Role::Admin.as_ref(), "admin");
    }

    #[test]
    fn only_managers_hr_and_admins_approve() {
        assert!(!Role::Employee.is_approver());
        assert!(Role::Manager.is_approver());
        assert!(Role::Hr.is_approver());
        assert!(Role::Admin.is_approver());
    }

    #[test]
    fn unknown_roles_fall_back_to_employee() {
        assert_eq!(Role::from_db("contractor"), Role::Employee);
    }
}
