use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditLog {
    pub id: u64,
    pub user_id: Option<u64>,
    pub entity_type: String,
    pub entity_id: Option<u64>,
    pub action: String,
    pub old_values: Option<String>,
    pub new_values: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const AUDIT_COLUMNS: &str = "id, user_id, entity_type, entity_id, action, old_values, \
     new_values, ip_address, user_agent, created_at";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: u64,
    pub user_id: Option<u64>,
    pub entity_type: String,
    pub entity_id: Option<u64>,
    pub action: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLog> for AuditLogEntry {
    fn from(log: AuditLog) -> Self {
        // Stored snapshots are JSON text; anything unparsable is passed through as a string.
        let parse = |raw: Option<String>| {
            raw.map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s)))
        };
        AuditLogEntry {
            id: log.id,
            user_id: log.user_id,
            entity_type: log.entity_type,
            entity_id: log.entity_id,
            action: log.action,
            old_values: parse(log.old_values),
            new_values: parse(log.new_values),
            ip_address: log.ip_address,
            user_agent: log.user_agent,
            created_at: log.created_at,
        }
    }
}
