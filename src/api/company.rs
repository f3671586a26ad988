use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        company::{Company, PayFrequency},
        role::{MANAGERS, PLATFORM},
    },
    models::MessageResponse,
    service::audit::AuditEntry,
    utils::{
        db_utils::{BindValues, WhereBuilder, build_update_sql, execute_update},
        pagination::PageParams,
    },
};

const UPDATABLE_COLUMNS: &[&str] = &[
    "name",
    "email",
    "phone",
    "address",
    "currency",
    "pay_frequency",
    "is_active",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateCompany {
    #[schema(example = "Sahel Logistique")]
    pub name: String,
    #[schema(example = "contact@sahel-logistique.sn")]
    pub email: Option<String>,
    #[schema(example = "+221771234567")]
    pub phone: Option<String>,
    #[schema(example = "Dakar, Plateau")]
    pub address: Option<String>,
    /// ISO 4217 code, defaults to XOF
    #[schema(example = "XOF")]
    pub currency: Option<String>,
    pub pay_frequency: Option<PayFrequency>,
}

#[derive(Deserialize, Serialize, ToSchema)]
pub struct UpdateCompany {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_frequency: Option<PayFrequency>,
    /// SuperAdmin only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CompanyQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Search by name or email
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

fn validate_currency(currency: &str) -> Result<(), AppError> {
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::validation(
            "currency must be a three-letter uppercase ISO code",
        ));
    }
    Ok(())
}

pub async fn fetch_company(pool: &MySqlPool, company_id: u64) -> Result<Company, AppError> {
    sqlx::query_as::<_, Company>(
        r#"
        SELECT id, name, email, phone, address, currency, pay_frequency, is_active, created_at
        FROM companies
        WHERE id = ?
        "#,
    )
    .bind(company_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Company not found"))
}

/// Create Company
#[utoipa::path(
    post,
    path = "/api/v1/companies",
    request_body = CreateCompany,
    responses(
        (status = 201, description = "Company created", body = Company),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 409, description = "Name already used", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn create_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateCompany>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PLATFORM)?;

    let payload = payload.into_inner();
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::validation("name must not be empty"));
    }

    let currency = payload.currency.unwrap_or_else(|| "XOF".to_string());
    validate_currency(&currency)?;

    let result = sqlx::query(
        r#"
        INSERT INTO companies (name, email, phone, address, currency, pay_frequency)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.address)
    .bind(&currency)
    .bind(payload.pay_frequency.unwrap_or(PayFrequency::Monthly))
    .execute(pool.get_ref())
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::conflict("A company with this name already exists"),
        other => other,
    })?;

    let company_id = result.last_insert_id();
    info!(company_id, "Company created");

    AuditEntry::by(&auth, AuditAction::Create, AuditEntity::Company)
        .entity_id(company_id)
        .company(company_id)
        .details(json!({ "name": name }))
        .record(pool.get_ref())
        .await;

    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Created().json(company))
}

/// List companies (Admin only sees its own)
#[utoipa::path(
    get,
    path = "/api/v1/companies",
    params(CompanyQuery),
    responses(
        (status = 200, description = "Paginated company list", body = CompanyPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn list_companies(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<CompanyQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("id = ?", auth.company_scope(None)?)
        .push_opt("is_active = ?", query.is_active)
        .search(&["name", "email"], query.search.as_deref());
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM companies {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting companies");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT id, name, email, phone, address, currency, pay_frequency, is_active, created_at
        FROM companies
        {}
        ORDER BY name
        LIMIT ? OFFSET ?
        "#,
        where_clause
    );

    let companies = sqlx::query_as::<_, Company>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(companies, total)))
}

/// Get Company by ID
#[utoipa::path(
    get,
    path = "/api/v1/companies/{company_id}",
    params(("company_id" = u64, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company found", body = Company),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Company not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn get_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let company_id = path.into_inner();
    auth.ensure_company(company_id)?;

    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Ok().json(company))
}

/// Update Company
#[utoipa::path(
    put,
    path = "/api/v1/companies/{company_id}",
    params(("company_id" = u64, Path, description = "Company ID")),
    request_body = UpdateCompany,
    responses(
        (status = 200, description = "Company updated", body = Company),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Company not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn update_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateCompany>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let company_id = path.into_inner();
    auth.ensure_company(company_id)?;

    let body = body.into_inner();
    if body.is_active.is_some() && !auth.is_super_admin() {
        return Err(AppError::forbidden());
    }
    if let Some(name) = &body.name {
        if name.trim().is_empty() {
            return Err(AppError::validation("name must not be empty"));
        }
    }
    if let Some(currency) = &body.currency {
        validate_currency(currency)?;
    }

    let payload = serde_json::to_value(&body)
        .map_err(|e| AppError::internal(format!("serialize company update: {e}")))?;
    let update = build_update_sql("companies", &payload, UPDATABLE_COLUMNS, &[("id", company_id)])?;

    // MySQL reports 0 affected rows when nothing changed, so existence is checked separately
    fetch_company(pool.get_ref(), company_id).await?;
    execute_update(pool.get_ref(), update).await?;

    AuditEntry::by(&auth, AuditAction::Update, AuditEntity::Company)
        .entity_id(company_id)
        .company(company_id)
        .details(payload)
        .record(pool.get_ref())
        .await;

    let company = fetch_company(pool.get_ref(), company_id).await?;
    Ok(HttpResponse::Ok().json(company))
}

/// Delete Company
#[utoipa::path(
    delete,
    path = "/api/v1/companies/{company_id}",
    params(("company_id" = u64, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Company deleted", body = MessageResponse),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Company not found", body = ErrorBody),
        (status = 409, description = "Company still has employees", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Company"
)]
pub async fn delete_company(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PLATFORM)?;

    let company_id = path.into_inner();

    let employees = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees WHERE company_id = ?")
        .bind(company_id)
        .fetch_one(pool.get_ref())
        .await?;

    if employees > 0 {
        return Err(AppError::conflict(format!(
            "Company still has {employees} employee(s)"
        )));
    }

    let result = sqlx::query("DELETE FROM companies WHERE id = ?")
        .bind(company_id)
        .execute(pool.get_ref())
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Company not found"));
    }

    AuditEntry::by(&auth, AuditAction::Delete, AuditEntity::Company)
        .entity_id(company_id)
        .company(company_id)
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Company deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_codes() {
        assert!(validate_currency("XOF").is_ok());
        assert!(validate_currency("eur").is_err());
        assert!(validate_currency("EURO").is_err());
    }
}
