use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    PayrollSummary,
    AttendanceSummary,
    EmployeeHistory,
}

sql_string_enum!(ReportType);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Report {
    pub id: u64,
    pub company_id: u64,
    pub report_type: ReportType,
    #[schema(value_type = Object)]
    pub parameters: serde_json::Value,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
    pub generated_by: u64,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}
