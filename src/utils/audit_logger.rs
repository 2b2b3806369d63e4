use actix_web::HttpRequest;
use serde_json::Value;
use sqlx::MySqlPool;

/// What changed, by whom. Snapshots are stored as JSON text.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub user_id: u64,
    pub entity_type: &'a str,
    pub entity_id: u64,
    pub action: &'a str,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

/// Caller details taken from the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOrigin {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestOrigin {
    pub fn from_request(req: &HttpRequest) -> Self {
        let ip_address = req
            .connection_info()
            .realip_remote_addr()
            .map(|addr| strip_port(addr).to_string());
        let user_agent = req
            .headers()
            .get("User-Agent")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        Self {
            ip_address,
            user_agent,
        }
    }
}

fn strip_port(addr: &str) -> &str {
    // "[::1]:8080" and "10.0.0.1:8080"; bare IPv6 has several colons and no brackets
    if let Some(rest) = addr.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => addr,
    }
}

pub struct AuditLogger;

impl AuditLogger {
    /// Records a data change. Never fails the caller; write errors are logged.
    pub async fn log_data_modification(pool: &MySqlPool, entry: AuditEntry<'_>, req: &HttpRequest) {
        let origin = RequestOrigin::from_request(req);
        Self::record(pool, entry, origin).await;
    }

    pub async fn record(pool: &MySqlPool, entry: AuditEntry<'_>, origin: RequestOrigin) {
        let to_text = |v: Option<Value>| v.map(|v| v.to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs
                (user_id, entity_type, entity_id, action, old_values, new_values, ip_address, user_agent)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.entity_type)
        .bind(entry.entity_id)
        .bind(entry.action)
        .bind(to_text(entry.old_values))
        .bind(to_text(entry.new_values))
        .bind(origin.ip_address)
        .bind(origin.user_agent)
        .execute(pool)
        .await;

        match result {
            Ok(_) => tracing::debug!(
                entity_type = entry.entity_type,
                entity_id = entry.entity_id,
                action = entry.action,
                "Audit entry recorded"
            ),
            Err(e) => tracing::error!(
                error = %e,
                entity_type = entry.entity_type,
                entity_id = entry.entity_id,
                action = entry.action,
                "Failed to write audit log"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn origin_reads_forwarded_ip_and_user_agent() {
        let req = TestRequest::default()
            .insert_header(("X-Forwarded-For", "203.0.113.9"))
            .insert_header(("User-Agent", "leave-desk-tests/1.0"))
            .to_http_request();

        let origin = RequestOrigin::from_request(&req);
        assert_eq!(origin.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(origin.user_agent.as_deref(), Some("leave-desk-tests/1.0"));
    }

    #[test]
    fn ports_are_dropped_from_addresses() {
        assert_eq!(strip_port("10.0.0.1:8080"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("::1"), "::1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
    }
}
