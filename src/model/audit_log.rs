use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Login,
    Create,
    Update,
    Delete,
    Generate,
    Approve,
    Close,
    StatusChange,
}

sql_string_enum!(AuditAction);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntity {
    User,
    Company,
    Employee,
    Attendance,
    PayCycle,
    Payslip,
    Payment,
    Report,
    Parameter,
}

sql_string_enum!(AuditEntity);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AuditLog {
    pub id: u64,
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Option<u64>,
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}
