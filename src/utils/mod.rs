pub mod audit_logger;
pub mod db_utils;
pub mod email_cache;
pub mod email_filter;
pub mod financial_year;
pub mod leave_rules;
pub mod leave_type_cache;
pub mod notifications;
pub mod realtime;
pub mod uploads;
