use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PayFrequency {
    Monthly,
    Biweekly,
    Weekly,
}

sql_string_enum!(PayFrequency);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "name": "Sahel Logistique",
        "email": "contact@sahel-logistique.sn",
        "phone": "+221771234567",
        "address": "Dakar, Plateau",
        "currency": "XOF",
        "pay_frequency": "MONTHLY",
        "is_active": true,
        "created_at": "2026-01-01T08:00:00Z"
    })
)]
pub struct Company {
    pub id: u64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub currency: String,
    pub pay_frequency: PayFrequency,
    pub is_active: bool,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}
