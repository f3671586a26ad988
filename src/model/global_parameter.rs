use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Percentage withheld from gross pay when payslips are generated.
pub const DEDUCTION_RATE_KEY: &str = "payroll.deduction_rate";

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct GlobalParameter {
    pub id: u64,
    /// `None` for platform-wide values.
    pub company_id: Option<u64>,
    #[schema(example = "payroll.deduction_rate")]
    pub param_key: String,
    #[schema(example = "5")]
    pub param_value: String,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
}
