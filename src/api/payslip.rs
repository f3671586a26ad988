use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::pay_cycle::{ensure_draft, lock_cycle},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        payslip::{Payslip, PayslipStatus},
        role::{EVERYONE, MANAGERS, Role},
    },
    service::{
        audit::AuditEntry,
        payroll::{adjusted_net, rollup_payslip_status},
    },
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

const PAYSLIP_COLUMNS: &str = "id, company_id, pay_cycle_id, employee_id, days_worked, gross_amount, deductions, net_amount, status, created_at";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayslipQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub pay_cycle_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub status: Option<PayslipStatus>,
}

#[derive(Deserialize, ToSchema)]
pub struct AdjustPayslip {
    #[schema(example = 460000.0)]
    pub gross_amount: Option<f64>,
    #[schema(example = 23000.0)]
    pub deductions: Option<f64>,
}

/// Employees are limited to their own payslips; everyone else to their company.
fn employee_filter(auth: &AuthUser, requested: Option<u64>) -> Result<Option<u64>, AppError> {
    if auth.role != Role::Employee {
        return Ok(requested);
    }

    let own = auth.require_employee()?;
    match requested {
        Some(id) if id != own => Err(AppError::forbidden()),
        _ => Ok(Some(own)),
    }
}

pub async fn fetch_payslip(pool: &MySqlPool, auth: &AuthUser, payslip_id: u64) -> Result<Payslip, AppError> {
    let payslip = sqlx::query_as::<_, Payslip>(&format!(
        "SELECT {PAYSLIP_COLUMNS} FROM payslips WHERE id = ?"
    ))
    .bind(payslip_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Payslip not found"))?;

    auth.ensure_company(payslip.company_id)?;
    employee_filter(auth, Some(payslip.employee_id))?;
    Ok(payslip)
}

/// List payslips
#[utoipa::path(
    get,
    path = "/api/v1/payslips",
    params(PayslipQuery),
    responses(
        (status = 200, description = "Paginated payslip list", body = PayslipPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payslip"
)]
pub async fn list_payslips(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayslipQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("employee_id = ?", employee_filter(&auth, query.employee_id)?)
        .push_opt("pay_cycle_id = ?", query.pay_cycle_id)
        .push_opt("status = ?", query.status.map(|s| s.to_string()));
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM payslips {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting payslips");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {PAYSLIP_COLUMNS} FROM payslips {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );

    let payslips = sqlx::query_as::<_, Payslip>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(payslips, total)))
}

/// Get Payslip by ID
#[utoipa::path(
    get,
    path = "/api/v1/payslips/{payslip_id}",
    params(("payslip_id" = u64, Path, description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip found", body = Payslip),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Payslip not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payslip"
)]
pub async fn get_payslip(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;

    let payslip = fetch_payslip(pool.get_ref(), &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

/// Adjust a payslip of a DRAFT cycle
#[utoipa::path(
    put,
    path = "/api/v1/payslips/{payslip_id}",
    params(("payslip_id" = u64, Path, description = "Payslip ID")),
    request_body = AdjustPayslip,
    responses(
        (status = 200, description = "Payslip adjusted", body = Payslip),
        (status = 400, description = "Invalid amounts or cycle not DRAFT", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Payslip not found", body = ErrorBody),
        (status = 409, description = "Cycle is closed", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payslip"
)]
pub async fn adjust_payslip(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<AdjustPayslip>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    if body.gross_amount.is_none() && body.deductions.is_none() {
        return Err(AppError::validation("No fields provided for update"));
    }

    let payslip_id = path.into_inner();
    let current = fetch_payslip(pool.get_ref(), &auth, payslip_id).await?;

    let mut tx = pool.begin().await?;
    let cycle = lock_cycle(&mut tx, &auth, current.pay_cycle_id).await?;
    ensure_draft(&cycle)?;

    let gross = body.gross_amount.unwrap_or(current.gross_amount);
    let deductions = body.deductions.unwrap_or(current.deductions);
    let net = adjusted_net(gross, deductions)?;

    // DRAFT cycles carry no payments yet
    let status = rollup_payslip_status(net, 0.0);

    sqlx::query("UPDATE payslips SET gross_amount = ?, deductions = ?, net_amount = ?, status = ? WHERE id = ?")
        .bind(gross)
        .bind(deductions)
        .bind(net)
        .bind(status)
        .bind(payslip_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(payslip_id, gross, deductions, net, "Payslip adjusted");

    AuditEntry::by(&auth, AuditAction::Update, AuditEntity::Payslip)
        .entity_id(payslip_id)
        .company(current.company_id)
        .details(json!({
            "before": { "gross_amount": current.gross_amount, "deductions": current.deductions },
            "after": { "gross_amount": gross, "deductions": deductions, "net_amount": net }
        }))
        .record(pool.get_ref())
        .await;

    let payslip = fetch_payslip(pool.get_ref(), &auth, payslip_id).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::principal;

    #[test]
    fn staff_filter_passes_through() {
        let cashier = principal(Role::Cashier, Some(1));
        assert_eq!(employee_filter(&cashier, None).unwrap(), None);
        assert_eq!(employee_filter(&cashier, Some(4)).unwrap(), Some(4));
    }

    #[test]
    fn employees_only_see_their_own_payslips() {
        let mut employee = principal(Role::Employee, Some(1));
        employee.employee_id = Some(12);

        assert_eq!(employee_filter(&employee, None).unwrap(), Some(12));
        assert_eq!(employee_filter(&employee, Some(12)).unwrap(), Some(12));
        assert!(matches!(employee_filter(&employee, Some(13)), Err(AppError::Forbidden(_))));
    }

    #[test]
    fn employee_without_profile_is_forbidden() {
        let employee = principal(Role::Employee, Some(1));
        assert!(employee_filter(&employee, None).is_err());
    }
}
