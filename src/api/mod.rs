pub mod audit;
pub mod leave;
pub mod leave_balance;
pub mod notification;
pub mod user;
