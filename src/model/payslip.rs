use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PayslipStatus {
    Pending,
    Partial,
    Paid,
}

sql_string_enum!(PayslipStatus);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 40,
        "company_id": 1,
        "pay_cycle_id": 12,
        "employee_id": 1,
        "days_worked": 22,
        "gross_amount": 450000.0,
        "deductions": 22500.0,
        "net_amount": 427500.0,
        "status": "PENDING",
        "created_at": "2026-01-28T10:05:00Z"
    })
)]
pub struct Payslip {
    pub id: u64,
    pub company_id: u64,
    pub pay_cycle_id: u64,
    pub employee_id: u64,
    pub days_worked: u32,
    pub gross_amount: f64,
    pub deductions: f64,
    pub net_amount: f64,
    pub status: PayslipStatus,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}
