use serde_json::Value;
use sqlx::MySqlPool;

use crate::auth::auth::AuthUser;
use crate::model::audit_log::{AuditAction, AuditEntity};

/// One audit trail line. Built per mutating request and written after the
/// change succeeds; a failed write is logged and never fails the request.
#[derive(Debug)]
pub struct AuditEntry {
    pub user_id: u64,
    pub company_id: Option<u64>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Option<u64>,
    pub details: Option<Value>,
}

impl AuditEntry {
    pub fn new(user_id: u64, company_id: Option<u64>, action: AuditAction, entity: AuditEntity) -> Self {
        Self {
            user_id,
            company_id,
            action,
            entity,
            entity_id: None,
            details: None,
        }
    }

    pub fn by(auth: &AuthUser, action: AuditAction, entity: AuditEntity) -> Self {
        Self::new(auth.user_id, auth.company_id, action, entity)
    }

    pub fn entity_id(mut self, id: u64) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Records the company the change touched, which may differ from the actor's.
    pub fn company(mut self, company_id: u64) -> Self {
        self.company_id = Some(company_id);
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub async fn record(self, pool: &MySqlPool) {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, company_id, action, entity, entity_id, details)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.user_id)
        .bind(self.company_id)
        .bind(self.action)
        .bind(self.entity)
        .bind(self.entity_id)
        .bind(self.details)
        .execute(pool)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                user_id = self.user_id,
                action = %self.action,
                entity = %self.entity,
                "Failed to write audit entry"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use serde_json::json;

    #[test]
    fn builder_fills_actor_and_target() {
        let auth = AuthUser {
            user_id: 3,
            email: "root@example.com".to_string(),
            role: Role::SuperAdmin,
            company_id: None,
            employee_id: None,
        };

        let entry = AuditEntry::by(&auth, AuditAction::Create, AuditEntity::Company)
            .entity_id(10)
            .company(10)
            .details(json!({ "name": "Acme" }));

        assert_eq!(entry.user_id, 3);
        assert_eq!(entry.company_id, Some(10));
        assert_eq!(entry.entity_id, Some(10));
        assert_eq!(entry.details.unwrap()["name"], "Acme");
    }
}
