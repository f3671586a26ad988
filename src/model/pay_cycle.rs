use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::company::PayFrequency;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Draft,
    Approved,
    Closed,
}

sql_string_enum!(CycleStatus);

impl CycleStatus {
    /// Nothing leaves CLOSED; closing straight from DRAFT is gated only by the payment rule.
    pub fn can_transition_to(self, next: CycleStatus) -> bool {
        matches!(
            (self, next),
            (CycleStatus::Draft, CycleStatus::Approved)
                | (CycleStatus::Draft, CycleStatus::Closed)
                | (CycleStatus::Approved, CycleStatus::Closed)
        )
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 12,
        "company_id": 1,
        "label": "January 2026",
        "period_start": "2026-01-01",
        "period_end": "2026-01-31",
        "frequency": "MONTHLY",
        "status": "DRAFT",
        "closed_at": null,
        "created_at": "2026-01-28T10:00:00Z"
    })
)]
pub struct PayCycle {
    pub id: u64,
    pub company_id: u64,
    pub label: String,
    #[schema(value_type = String)]
    pub period_start: NaiveDate,
    #[schema(value_type = String)]
    pub period_end: NaiveDate,
    pub frequency: PayFrequency,
    pub status: CycleStatus,
    #[schema(value_type = Option<String>)]
    pub closed_at: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_terminal() {
        for next in [CycleStatus::Draft, CycleStatus::Approved, CycleStatus::Closed] {
            assert!(!CycleStatus::Closed.can_transition_to(next));
        }
    }

    #[test]
    fn approved_cannot_go_back_to_draft() {
        assert!(!CycleStatus::Approved.can_transition_to(CycleStatus::Draft));
        assert!(CycleStatus::Approved.can_transition_to(CycleStatus::Closed));
        assert!(CycleStatus::Draft.can_transition_to(CycleStatus::Approved));
    }
}
