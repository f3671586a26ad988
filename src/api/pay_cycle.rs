use std::collections::HashMap;

use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{company::fetch_company, parameter::resolve_value},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        attendance::AttendanceStatus,
        audit_log::{AuditAction, AuditEntity},
        company::PayFrequency,
        employee::ContractType,
        global_parameter::DEDUCTION_RATE_KEY,
        pay_cycle::{CycleStatus, PayCycle},
        payment::PaymentStatus,
        role::{MANAGERS, PAYROLL_STAFF},
    },
    service::{
        audit::AuditEntry,
        payroll::{
            compute_payslip, ensure_cycle_closable, parse_deduction_rate, rollup_payslip_status, round_money,
            validate_period,
        },
        reporting::{PayrollSummary, load_payroll_summary},
    },
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

const CYCLE_COLUMNS: &str =
    "id, company_id, label, period_start, period_end, frequency, status, closed_at, created_at";

#[derive(Deserialize, ToSchema)]
pub struct CreatePayCycle {
    /// Required when a SuperAdmin creates the cycle
    pub company_id: Option<u64>,
    #[schema(example = "January 2026")]
    pub label: String,
    #[schema(value_type = String, example = "2026-01-01")]
    pub period_start: NaiveDate,
    #[schema(value_type = String, example = "2026-01-31")]
    pub period_end: NaiveDate,
    /// Defaults to the company's pay frequency
    pub frequency: Option<PayFrequency>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PayCycleQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub status: Option<CycleStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GenerationResult {
    pub pay_cycle_id: u64,
    pub payslips: usize,
    /// Deduction rate applied, in percent of gross
    pub deduction_rate: f64,
    pub total_net: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PayCycleDetail {
    #[serde(flatten)]
    pub cycle: PayCycle,
    pub summary: PayrollSummary,
}

#[derive(sqlx::FromRow)]
struct PayableEmployee {
    id: u64,
    contract_type: ContractType,
    base_salary: f64,
    daily_rate: f64,
}

pub async fn fetch_cycle(pool: &MySqlPool, auth: &AuthUser, cycle_id: u64) -> Result<PayCycle, AppError> {
    let cycle = sqlx::query_as::<_, PayCycle>(&format!(
        "SELECT {CYCLE_COLUMNS} FROM pay_cycles WHERE id = ?"
    ))
    .bind(cycle_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Pay cycle not found"))?;

    auth.ensure_company(cycle.company_id)?;
    Ok(cycle)
}

/// Loads the cycle with a row lock held until `tx` ends, serializing
/// generation, approval, closure and payment creation on the same cycle.
pub async fn lock_cycle(
    tx: &mut Transaction<'_, MySql>,
    auth: &AuthUser,
    cycle_id: u64,
) -> Result<PayCycle, AppError> {
    let cycle = sqlx::query_as::<_, PayCycle>(&format!(
        "SELECT {CYCLE_COLUMNS} FROM pay_cycles WHERE id = ? FOR UPDATE"
    ))
    .bind(cycle_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| AppError::not_found("Pay cycle not found"))?;

    auth.ensure_company(cycle.company_id)?;
    Ok(cycle)
}

pub(crate) fn ensure_draft(cycle: &PayCycle) -> Result<(), AppError> {
    match cycle.status {
        CycleStatus::Draft => Ok(()),
        CycleStatus::Closed => Err(AppError::conflict("Pay cycle is closed")),
        status => Err(AppError::validation(format!(
            "Pay cycle is {status}; only DRAFT cycles can be changed"
        ))),
    }
}

/// Status moves go through the cycle transition table; CLOSED is terminal.
pub(crate) fn ensure_transition(cycle: &PayCycle, next: CycleStatus) -> Result<(), AppError> {
    if cycle.status.can_transition_to(next) {
        return Ok(());
    }
    match cycle.status {
        CycleStatus::Closed => Err(AppError::conflict("Pay cycle is closed")),
        from => Err(AppError::validation(format!(
            "Pay cycle cannot move from {from} to {next}"
        ))),
    }
}

/// Create a pay cycle
#[utoipa::path(
    post,
    path = "/api/v1/pay-cycles",
    request_body = CreatePayCycle,
    responses(
        (status = 201, description = "Pay cycle created", body = PayCycle),
        (status = 400, description = "Invalid period", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Company not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn create_pay_cycle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayCycle>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let company_id = auth.target_company(payload.company_id)?;
    let label = payload.label.trim();
    if label.is_empty() {
        return Err(AppError::validation("label must not be empty"));
    }
    validate_period(payload.period_start, payload.period_end)?;

    let company = fetch_company(pool.get_ref(), company_id).await?;
    if !company.is_active {
        return Err(AppError::validation("Company is inactive"));
    }
    let frequency = payload.frequency.unwrap_or(company.pay_frequency);

    let result = sqlx::query(
        r#"
        INSERT INTO pay_cycles (company_id, label, period_start, period_end, frequency, status)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(label)
    .bind(payload.period_start)
    .bind(payload.period_end)
    .bind(frequency)
    .bind(CycleStatus::Draft)
    .execute(pool.get_ref())
    .await?;

    let cycle_id = result.last_insert_id();
    info!(cycle_id, company_id, label, "Pay cycle created");

    AuditEntry::by(&auth, AuditAction::Create, AuditEntity::PayCycle)
        .entity_id(cycle_id)
        .company(company_id)
        .details(json!({
            "label": label,
            "period_start": payload.period_start,
            "period_end": payload.period_end,
            "frequency": frequency
        }))
        .record(pool.get_ref())
        .await;

    let cycle = fetch_cycle(pool.get_ref(), &auth, cycle_id).await?;
    Ok(HttpResponse::Created().json(cycle))
}

/// List pay cycles
#[utoipa::path(
    get,
    path = "/api/v1/pay-cycles",
    params(PayCycleQuery),
    responses(
        (status = 200, description = "Paginated pay cycle list", body = PayCyclePage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn list_pay_cycles(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PayCycleQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("status = ?", query.status.map(|s| s.to_string()));
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM pay_cycles {}", where_clause);
    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {CYCLE_COLUMNS} FROM pay_cycles {} ORDER BY period_start DESC, id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    debug!(sql = %data_sql, bindings = ?filters.values(), "Fetching pay cycles");

    let cycles = sqlx::query_as::<_, PayCycle>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(cycles, total)))
}

/// Get a pay cycle with its payroll totals
#[utoipa::path(
    get,
    path = "/api/v1/pay-cycles/{cycle_id}",
    params(("cycle_id" = u64, Path, description = "Pay cycle ID")),
    responses(
        (status = 200, description = "Pay cycle found", body = PayCycleDetail),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Pay cycle not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn get_pay_cycle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let cycle = fetch_cycle(pool.get_ref(), &auth, path.into_inner()).await?;
    let summary = load_payroll_summary(pool.get_ref(), cycle.id).await?;

    Ok(HttpResponse::Ok().json(PayCycleDetail { cycle, summary }))
}

/// Generate the payslips of a DRAFT cycle
///
/// Replaces any payslips generated earlier for the cycle.
#[utoipa::path(
    post,
    path = "/api/v1/pay-cycles/{cycle_id}/generate",
    params(("cycle_id" = u64, Path, description = "Pay cycle ID")),
    responses(
        (status = 200, description = "Payslips generated", body = GenerationResult),
        (status = 400, description = "Cycle is not DRAFT or rate parameter invalid", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Pay cycle not found", body = ErrorBody),
        (status = 409, description = "Cycle is closed", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn generate_payslips(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let cycle_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let cycle = lock_cycle(&mut tx, &auth, cycle_id).await?;
    ensure_draft(&cycle)?;

    let raw_rate = resolve_value(&mut *tx, cycle.company_id, DEDUCTION_RATE_KEY).await?;
    let rate = parse_deduction_rate(raw_rate.as_deref())?;

    let employees = sqlx::query_as::<_, PayableEmployee>(
        r#"
        SELECT id, contract_type, base_salary, daily_rate
        FROM employees
        WHERE company_id = ? AND is_active = TRUE
        ORDER BY id
        "#,
    )
    .bind(cycle.company_id)
    .fetch_all(&mut *tx)
    .await?;

    let days_present: HashMap<u64, i64> = sqlx::query_as::<_, (u64, i64)>(
        r#"
        SELECT a.employee_id, COUNT(*)
        FROM attendance a
        JOIN employees e ON e.id = a.employee_id
        WHERE e.company_id = ? AND a.status = ? AND a.date BETWEEN ? AND ?
        GROUP BY a.employee_id
        "#,
    )
    .bind(cycle.company_id)
    .bind(AttendanceStatus::Present)
    .bind(cycle.period_start)
    .bind(cycle.period_end)
    .fetch_all(&mut *tx)
    .await?
    .into_iter()
    .collect();

    sqlx::query("DELETE FROM payslips WHERE pay_cycle_id = ?")
        .bind(cycle.id)
        .execute(&mut *tx)
        .await?;

    let mut total_net = 0.0;
    for employee in &employees {
        let days = days_present
            .get(&employee.id)
            .map(|d| u32::try_from(*d).unwrap_or(u32::MAX))
            .unwrap_or(0);
        let figures = compute_payslip(
            employee.contract_type,
            employee.base_salary,
            employee.daily_rate,
            days,
            rate,
        );
        total_net += figures.net;

        sqlx::query(
            r#"
            INSERT INTO payslips
            (company_id, pay_cycle_id, employee_id, days_worked, gross_amount, deductions, net_amount, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(cycle.company_id)
        .bind(cycle.id)
        .bind(employee.id)
        .bind(figures.days_worked)
        .bind(figures.gross)
        .bind(figures.deductions)
        .bind(figures.net)
        .bind(rollup_payslip_status(figures.net, 0.0))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    if employees.is_empty() {
        warn!(cycle_id, company_id = cycle.company_id, "No active employees; cycle has no payslips");
    }
    info!(cycle_id, payslips = employees.len(), rate, "Payslips generated");

    let result = GenerationResult {
        pay_cycle_id: cycle.id,
        payslips: employees.len(),
        deduction_rate: rate,
        total_net: round_money(total_net),
    };

    AuditEntry::by(&auth, AuditAction::Generate, AuditEntity::PayCycle)
        .entity_id(cycle.id)
        .company(cycle.company_id)
        .details(json!({ "payslips": result.payslips, "deduction_rate": rate, "total_net": result.total_net }))
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(result))
}

/// Approve a DRAFT cycle
#[utoipa::path(
    post,
    path = "/api/v1/pay-cycles/{cycle_id}/approve",
    params(("cycle_id" = u64, Path, description = "Pay cycle ID")),
    responses(
        (status = 200, description = "Pay cycle approved", body = PayCycle),
        (status = 400, description = "Cycle is not DRAFT or has no payslips", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Pay cycle not found", body = ErrorBody),
        (status = 409, description = "Cycle is closed", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn approve_pay_cycle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let cycle_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let cycle = lock_cycle(&mut tx, &auth, cycle_id).await?;
    ensure_transition(&cycle, CycleStatus::Approved)?;

    let payslips = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payslips WHERE pay_cycle_id = ?")
        .bind(cycle.id)
        .fetch_one(&mut *tx)
        .await?;
    if payslips == 0 {
        return Err(AppError::validation(
            "Generate payslips before approving the pay cycle",
        ));
    }

    sqlx::query("UPDATE pay_cycles SET status = ? WHERE id = ?")
        .bind(CycleStatus::Approved)
        .bind(cycle.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(cycle_id, payslips, "Pay cycle approved");

    AuditEntry::by(&auth, AuditAction::Approve, AuditEntity::PayCycle)
        .entity_id(cycle.id)
        .company(cycle.company_id)
        .details(json!({ "from": cycle.status, "to": CycleStatus::Approved, "payslips": payslips }))
        .record(pool.get_ref())
        .await;

    let cycle = fetch_cycle(pool.get_ref(), &auth, cycle_id).await?;
    Ok(HttpResponse::Ok().json(cycle))
}

/// Close a cycle
///
/// Every payment recorded under the cycle must be PAID.
#[utoipa::path(
    post,
    path = "/api/v1/pay-cycles/{cycle_id}/close",
    params(("cycle_id" = u64, Path, description = "Pay cycle ID")),
    responses(
        (status = 200, description = "Pay cycle closed", body = PayCycle),
        (status = 400, description = "Some payments are not paid", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Pay cycle not found", body = ErrorBody),
        (status = 409, description = "Already closed", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "PayCycle"
)]
pub async fn close_pay_cycle(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let cycle_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let cycle = lock_cycle(&mut tx, &auth, cycle_id).await?;

    let payments = sqlx::query_scalar::<_, PaymentStatus>("SELECT status FROM payments WHERE pay_cycle_id = ?")
        .bind(cycle.id)
        .fetch_all(&mut *tx)
        .await?;

    if let Err(e) = ensure_cycle_closable(cycle.status, &payments) {
        warn!(cycle_id, status = %cycle.status, payments = payments.len(), error = %e, "Pay cycle close refused");
        return Err(e);
    }

    sqlx::query("UPDATE pay_cycles SET status = ?, closed_at = NOW() WHERE id = ?")
        .bind(CycleStatus::Closed)
        .bind(cycle.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(cycle_id, payments = payments.len(), "Pay cycle closed");

    AuditEntry::by(&auth, AuditAction::Close, AuditEntity::PayCycle)
        .entity_id(cycle.id)
        .company(cycle.company_id)
        .details(json!({ "from": cycle.status, "payments": payments.len() }))
        .record(pool.get_ref())
        .await;

    let cycle = fetch_cycle(pool.get_ref(), &auth, cycle_id).await?;
    Ok(HttpResponse::Ok().json(cycle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn cycle(status: CycleStatus) -> PayCycle {
        PayCycle {
            id: 1,
            company_id: 1,
            label: "January 2026".to_string(),
            period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            frequency: PayFrequency::Monthly,
            status,
            closed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn only_draft_cycles_are_editable() {
        assert!(ensure_draft(&cycle(CycleStatus::Draft)).is_ok());
        assert!(matches!(ensure_draft(&cycle(CycleStatus::Approved)), Err(AppError::Validation(_))));
        assert!(matches!(ensure_draft(&cycle(CycleStatus::Closed)), Err(AppError::Conflict(_))));
    }

    #[test]
    fn approval_follows_the_transition_table() {
        assert!(ensure_transition(&cycle(CycleStatus::Draft), CycleStatus::Approved).is_ok());

        let err = ensure_transition(&cycle(CycleStatus::Approved), CycleStatus::Approved).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Pay cycle cannot move from APPROVED to APPROVED"));

        assert!(matches!(
            ensure_transition(&cycle(CycleStatus::Closed), CycleStatus::Approved),
            Err(AppError::Conflict(_))
        ));
    }

    // The deduction rate is read on the connection that holds the cycle lock.
    async fn rate_under_lock(tx: &mut Transaction<'_, MySql>, company_id: u64) -> Result<Option<String>, AppError> {
        resolve_value(&mut **tx, company_id, DEDUCTION_RATE_KEY).await
    }

    #[test]
    fn deduction_rate_lookup_joins_the_open_transaction() {
        let _lookup = rate_under_lock;
    }

    #[test]
    fn detail_flattens_the_cycle() {
        let detail = PayCycleDetail {
            cycle: cycle(CycleStatus::Approved),
            summary: PayrollSummary::default(),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["status"], "APPROVED");
        assert_eq!(json["summary"]["payslip_count"], 0);
    }
}
