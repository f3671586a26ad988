use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::{Executor, MySql, MySqlPool};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        global_parameter::{DEDUCTION_RATE_KEY, GlobalParameter},
        role::{MANAGERS, PAYROLL_STAFF},
    },
    models::MessageResponse,
    service::{audit::AuditEntry, payroll::parse_deduction_rate},
};

const PARAMETER_COLUMNS: &str = "id, company_id, param_key, param_value, description, updated_at";
const MAX_KEY_LEN: usize = 100;

#[derive(Deserialize, ToSchema)]
pub struct UpsertParameter {
    #[schema(example = "5")]
    pub param_value: String,
    pub description: Option<String>,
    /// Write a platform-wide value (SuperAdmin only)
    #[serde(default)]
    pub global: bool,
    /// Company to write for when the caller is a SuperAdmin
    pub company_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ParameterScope {
    /// Company whose values are read or written (SuperAdmin only)
    pub company_id: Option<u64>,
    /// Target the platform-wide value instead of a company one
    pub global: Option<bool>,
}

/// Keys are dotted lowercase names such as `payroll.deduction_rate`.
fn validate_key(key: &str) -> Result<(), AppError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(AppError::validation(
            "Parameter keys use lowercase letters, digits, '.' and '_'",
        ))
    }
}

/// Values of known keys are checked before they are stored.
fn validate_value(key: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation("param_value must not be empty"));
    }
    if key == DEDUCTION_RATE_KEY {
        parse_deduction_rate(Some(value))?;
    }
    Ok(())
}

/// Resolves the owner of a write: `None` is the platform-wide row.
fn write_scope(auth: &AuthUser, global: bool, company_id: Option<u64>) -> Result<Option<u64>, AppError> {
    if global {
        if !auth.is_super_admin() {
            return Err(AppError::forbidden());
        }
        return Ok(None);
    }
    auth.target_company(company_id).map(Some)
}

/// Effective value of `key` for a company: its own row wins over the global one.
/// Runs on whatever executor the caller holds, so it can join an open transaction.
pub async fn resolve_value<'e, E>(executor: E, company_id: u64, key: &str) -> Result<Option<String>, AppError>
where
    E: Executor<'e, Database = MySql>,
{
    let value = sqlx::query_scalar::<_, String>(
        r#"
        SELECT param_value
        FROM global_parameters
        WHERE param_key = ? AND (company_id = ? OR company_id IS NULL)
        ORDER BY company_id IS NULL
        LIMIT 1
        "#,
    )
    .bind(key)
    .bind(company_id)
    .fetch_optional(executor)
    .await?;

    Ok(value)
}

async fn fetch_parameter(
    pool: &MySqlPool,
    company_id: Option<u64>,
    key: &str,
) -> Result<Option<GlobalParameter>, AppError> {
    let parameter = sqlx::query_as::<_, GlobalParameter>(&format!(
        "SELECT {PARAMETER_COLUMNS} FROM global_parameters WHERE param_key = ? AND company_id <=> ?"
    ))
    .bind(key)
    .bind(company_id)
    .fetch_optional(pool)
    .await?;

    Ok(parameter)
}

/// List parameters
///
/// Company values first, then the global ones.
#[utoipa::path(
    get,
    path = "/api/v1/parameters",
    params(ParameterScope),
    responses(
        (status = 200, description = "Parameters visible to the caller", body = [GlobalParameter]),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Parameter"
)]
pub async fn list_parameters(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ParameterScope>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let scope = auth.company_scope(query.company_id)?;
    let parameters = match scope {
        Some(company_id) if query.global != Some(true) => {
            sqlx::query_as::<_, GlobalParameter>(&format!(
                r#"
                SELECT {PARAMETER_COLUMNS}
                FROM global_parameters
                WHERE company_id = ? OR company_id IS NULL
                ORDER BY company_id IS NULL, param_key
                "#
            ))
            .bind(company_id)
            .fetch_all(pool.get_ref())
            .await?
        }
        _ => {
            sqlx::query_as::<_, GlobalParameter>(&format!(
                "SELECT {PARAMETER_COLUMNS} FROM global_parameters WHERE company_id IS NULL ORDER BY param_key"
            ))
            .fetch_all(pool.get_ref())
            .await?
        }
    };

    Ok(HttpResponse::Ok().json(parameters))
}

/// Get a parameter by key
#[utoipa::path(
    get,
    path = "/api/v1/parameters/{key}",
    params(
        ("key" = String, Path, description = "Parameter key"),
        ParameterScope
    ),
    responses(
        (status = 200, description = "Effective parameter", body = GlobalParameter),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Parameter not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Parameter"
)]
pub async fn get_parameter(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    query: web::Query<ParameterScope>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let key = path.into_inner();
    validate_key(&key)?;

    let company_value = match auth.company_scope(query.company_id)? {
        Some(company_id) if query.global != Some(true) => {
            fetch_parameter(pool.get_ref(), Some(company_id), &key).await?
        }
        _ => None,
    };

    let parameter = match company_value {
        Some(parameter) => parameter,
        None => fetch_parameter(pool.get_ref(), None, &key)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Parameter '{key}' not found")))?,
    };

    Ok(HttpResponse::Ok().json(parameter))
}

/// Create or replace a parameter
#[utoipa::path(
    put,
    path = "/api/v1/parameters/{key}",
    params(("key" = String, Path, description = "Parameter key")),
    request_body = UpsertParameter,
    responses(
        (status = 200, description = "Parameter stored", body = GlobalParameter),
        (status = 400, description = "Invalid key or value", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Parameter"
)]
pub async fn upsert_parameter(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    body: web::Json<UpsertParameter>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let key = path.into_inner();
    validate_key(&key)?;
    let value = body.param_value.trim();
    validate_value(&key, value)?;

    let owner = write_scope(&auth, body.global, body.company_id)?;

    // NULL company ids never collide in the unique key, so global rows are updated by hand
    let updated = sqlx::query(
        r#"
        UPDATE global_parameters
        SET param_value = ?, description = COALESCE(?, description)
        WHERE param_key = ? AND company_id <=> ?
        "#,
    )
    .bind(value)
    .bind(&body.description)
    .bind(&key)
    .bind(owner)
    .execute(pool.get_ref())
    .await?;

    if updated.rows_affected() == 0 {
        let existing = fetch_parameter(pool.get_ref(), owner, &key).await?;
        if existing.is_none() {
            sqlx::query(
                r#"
                INSERT INTO global_parameters (company_id, param_key, param_value, description)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(owner)
            .bind(&key)
            .bind(value)
            .bind(&body.description)
            .execute(pool.get_ref())
            .await?;
        }
    }

    info!(key = %key, company_id = ?owner, "Parameter stored");

    let parameter = fetch_parameter(pool.get_ref(), owner, &key)
        .await?
        .ok_or_else(|| AppError::internal("Parameter vanished after upsert"))?;

    let mut entry = AuditEntry::by(&auth, AuditAction::Update, AuditEntity::Parameter)
        .entity_id(parameter.id)
        .details(json!({ "key": key, "value": value, "global": owner.is_none() }));
    if let Some(company_id) = owner {
        entry = entry.company(company_id);
    }
    entry.record(pool.get_ref()).await;

    Ok(HttpResponse::Ok().json(parameter))
}

/// Delete a parameter
#[utoipa::path(
    delete,
    path = "/api/v1/parameters/{key}",
    params(
        ("key" = String, Path, description = "Parameter key"),
        ParameterScope
    ),
    responses(
        (status = 200, description = "Parameter deleted", body = MessageResponse),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Parameter not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Parameter"
)]
pub async fn delete_parameter(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<String>,
    query: web::Query<ParameterScope>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let key = path.into_inner();
    validate_key(&key)?;
    let owner = write_scope(&auth, query.global.unwrap_or(false), query.company_id)?;

    let result = sqlx::query("DELETE FROM global_parameters WHERE param_key = ? AND company_id <=> ?")
        .bind(&key)
        .bind(owner)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("Parameter '{key}' not found")));
    }

    let mut entry = AuditEntry::by(&auth, AuditAction::Delete, AuditEntity::Parameter)
        .details(json!({ "key": key, "global": owner.is_none() }));
    if let Some(company_id) = owner {
        entry = entry.company(company_id);
    }
    entry.record(pool.get_ref()).await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Parameter deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::principal;
    use crate::model::role::Role;

    #[test]
    fn key_format() {
        assert!(validate_key("payroll.deduction_rate").is_ok());
        assert!(validate_key("Payroll.Rate").is_err());
        assert!(validate_key("rate; DROP TABLE users").is_err());
        assert!(validate_key("").is_err());
    }

    #[test]
    fn deduction_rate_values_are_checked() {
        assert!(validate_value(DEDUCTION_RATE_KEY, "7.5").is_ok());
        assert!(validate_value(DEDUCTION_RATE_KEY, "150").is_err());
        assert!(validate_value("company.motto", "anything goes").is_ok());
        assert!(validate_value("company.motto", "  ").is_err());
    }

    #[test]
    fn only_super_admin_writes_global_values() {
        let admin = principal(Role::Admin, Some(3));
        assert!(matches!(write_scope(&admin, true, None), Err(AppError::Forbidden(_))));
        assert_eq!(write_scope(&admin, false, None).unwrap(), Some(3));

        let root = principal(Role::SuperAdmin, None);
        assert_eq!(write_scope(&root, true, None).unwrap(), None);
        assert_eq!(write_scope(&root, false, Some(8)).unwrap(), Some(8));
        assert!(matches!(write_scope(&root, false, None), Err(AppError::Validation(_))));
    }
}
