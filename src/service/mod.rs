pub mod audit;
pub mod payroll;
pub mod reporting;
