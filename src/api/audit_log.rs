use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::IntoParams;

use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity, AuditLog},
        role::MANAGERS,
    },
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub user_id: Option<u64>,
    pub entity: Option<AuditEntity>,
    pub entity_id: Option<u64>,
    pub action: Option<AuditAction>,
    /// Entries written on or after this day
    #[param(value_type = Option<String>, example = "2026-01-01")]
    pub from: Option<NaiveDate>,
}

/// List audit entries
///
/// Admins only see entries of their own company.
#[utoipa::path(
    get,
    path = "/api/v1/audit-logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Paginated audit trail", body = AuditLogPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "AuditLog"
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AuditLogQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("user_id = ?", query.user_id)
        .push_opt("entity = ?", query.entity.map(|e| e.to_string()))
        .push_opt("entity_id = ?", query.entity_id)
        .push_opt("action = ?", query.action.map(|a| a.to_string()))
        .push_opt("created_at >= ?", query.from);
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting audit entries");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT id, user_id, company_id, action, entity, entity_id, details, created_at
        FROM audit_logs
        {}
        ORDER BY id DESC
        LIMIT ? OFFSET ?
        "#,
        where_clause
    );

    let entries = sqlx::query_as::<_, AuditLog>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(entries, total)))
}
