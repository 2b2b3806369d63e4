use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::role::Role;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub employee_code: Option<String>,
    pub role: String,
    pub department: Option<String>,
    pub position: Option<String>,
    pub manager_id: Option<u64>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "id, email, password, first_name, last_name, employee_code, role, \
     department, position, manager_id, is_active, last_login_at, created_at";

impl User {
    pub fn role(&self) -> Role {
        Role::from_db(&self.role)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            employee_id: self.employee_code.clone(),
            role: self.role(),
            department: self.department.clone(),
            position: self.position.clone(),
            manager_id: self.manager_id,
            is_active: self.is_active,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
        }
    }
}

/// User as exposed over the API, never carrying the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: u64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub employee_id: Option<String>,
    pub role: Role,
    pub department: Option<String>,
    pub position: Option<String>,
    pub manager_id: Option<u64>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Short form embedded in leave listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<u64>,
}
