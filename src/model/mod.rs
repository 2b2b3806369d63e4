pub mod audit_log;
pub mod leave;
pub mod leave_balance;
pub mod leave_type;
pub mod notification;
pub mod role;
pub mod user;
