pub mod attendance;
pub mod audit_log;
pub mod company;
pub mod dashboard;
pub mod employee;
pub mod parameter;
pub mod pay_cycle;
pub mod payment;
pub mod payslip;
pub mod report;
pub mod user;
