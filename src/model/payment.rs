use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

sql_string_enum!(PaymentStatus);

impl PaymentStatus {
    /// PAID and FAILED are final.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Paid)
                | (PaymentStatus::Pending, PaymentStatus::Failed)
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Cheque,
}

sql_string_enum!(PaymentMethod);

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 301,
        "company_id": 1,
        "payslip_id": 40,
        "pay_cycle_id": 12,
        "amount": 427500.0,
        "method": "MOBILE_MONEY",
        "reference": "WAVE-88231",
        "status": "PAID",
        "paid_at": "2026-01-31T12:00:00Z",
        "created_by": 3,
        "created_at": "2026-01-31T11:58:00Z"
    })
)]
pub struct Payment {
    pub id: u64,
    pub company_id: u64,
    pub payslip_id: u64,
    pub pay_cycle_id: u64,
    pub amount: f64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub status: PaymentStatus,
    #[schema(value_type = Option<String>)]
    pub paid_at: Option<DateTime<Utc>>,
    pub created_by: u64,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_payments_move() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Failed));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Pending.can_transition_to(PaymentStatus::Pending));
    }

    #[test]
    fn method_wire_names() {
        assert_eq!(PaymentMethod::BankTransfer.as_ref(), "BANK_TRANSFER");
        assert_eq!("MOBILE_MONEY".parse::<PaymentMethod>().unwrap(), PaymentMethod::MobileMoney);
    }
}
