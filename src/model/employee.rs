use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// How an employee's gross pay is computed for a cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractType {
    /// Fixed salary per cycle.
    Fixed,
    /// Daily rate times days present.
    Daily,
    /// Flat fee per cycle.
    Honorarium,
}

sql_string_enum!(ContractType);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "company_id": 1,
        "employee_code": "EMP-001",
        "first_name": "Awa",
        "last_name": "Diop",
        "email": "awa.diop@sahel-logistique.sn",
        "phone": "+221771234567",
        "position": "Accountant",
        "contract_type": "FIXED",
        "base_salary": 450000.0,
        "daily_rate": 0.0,
        "bank_account": "SN012 01001 012345678901 23",
        "hire_date": "2024-01-01",
        "is_active": true,
        "created_at": "2024-01-01T08:00:00Z"
    })
)]
pub struct Employee {
    pub id: u64,
    pub company_id: u64,
    pub employee_code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub contract_type: ContractType,
    pub base_salary: f64,
    pub daily_rate: f64,
    pub bank_account: Option<String>,
    #[schema(value_type = String, example = "2024-01-01")]
    pub hire_date: NaiveDate,
    pub is_active: bool,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
