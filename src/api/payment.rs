use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySql, MySqlPool, Transaction};
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{pay_cycle::lock_cycle, payslip::fetch_payslip},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        pay_cycle::CycleStatus,
        payment::{Payment, PaymentMethod, PaymentStatus},
        payslip::PayslipStatus,
        role::PAYROLL_STAFF,
    },
    service::{
        audit::AuditEntry,
        payroll::{
            ensure_cycle_accepts_payments, outstanding_amount, rollup_payslip_status,
            validate_payment_amount,
        },
    },
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

const PAYMENT_COLUMNS: &str = "id, company_id, payslip_id, pay_cycle_id, amount, method, reference, status, paid_at, created_by, created_at";

#[derive(Deserialize, ToSchema)]
pub struct CreatePayment {
    pub payslip_id: u64,
    #[schema(example = 427500.0)]
    pub amount: f64,
    pub method: PaymentMethod,
    #[schema(example = "WAVE-88231")]
    pub reference: Option<String>,
    /// PENDING (default) or PAID when the money already left
    pub status: Option<PaymentStatus>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdatePaymentStatus {
    pub status: PaymentStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaymentQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub pay_cycle_id: Option<u64>,
    pub payslip_id: Option<u64>,
    pub status: Option<PaymentStatus>,
    pub method: Option<PaymentMethod>,
}

fn initial_status(requested: Option<PaymentStatus>) -> Result<PaymentStatus, AppError> {
    match requested.unwrap_or(PaymentStatus::Pending) {
        PaymentStatus::Failed => Err(AppError::validation(
            "A payment cannot be recorded as FAILED",
        )),
        status => Ok(status),
    }
}

fn ensure_transition(from: PaymentStatus, to: PaymentStatus) -> Result<(), AppError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Payment status cannot change from {from} to {to}"
        )))
    }
}

async fn fetch_payment(pool: &MySqlPool, auth: &AuthUser, payment_id: u64) -> Result<Payment, AppError> {
    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"
    ))
    .bind(payment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Payment not found"))?;

    auth.ensure_company(payment.company_id)?;
    Ok(payment)
}

/// Recomputes a payslip's status from its PAID payments.
async fn refresh_payslip_status(
    tx: &mut Transaction<'_, MySql>,
    payslip_id: u64,
    net_amount: f64,
) -> Result<PayslipStatus, AppError> {
    let paid = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE payslip_id = ? AND status = ?",
    )
    .bind(payslip_id)
    .bind(PaymentStatus::Paid)
    .fetch_one(&mut **tx)
    .await?;

    let status = rollup_payslip_status(net_amount, paid);

    sqlx::query("UPDATE payslips SET status = ? WHERE id = ?")
        .bind(status)
        .bind(payslip_id)
        .execute(&mut **tx)
        .await?;

    debug!(payslip_id, paid, status = %status, "Payslip status refreshed");
    Ok(status)
}

/// Record a payment against a payslip
#[utoipa::path(
    post,
    path = "/api/v1/payments",
    request_body = CreatePayment,
    responses(
        (status = 201, description = "Payment recorded", body = Payment),
        (status = 400, description = "Cycle not approved or amount invalid", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Payslip not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn create_payment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreatePayment>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let status = initial_status(payload.status)?;
    let payslip = fetch_payslip(pool.get_ref(), &auth, payload.payslip_id).await?;

    let mut tx = pool.begin().await?;

    // cycle first, then payslip: the same order generation and closure lock in
    let cycle = lock_cycle(&mut tx, &auth, payslip.pay_cycle_id).await?;
    ensure_cycle_accepts_payments(cycle.status)?;

    let net_amount = sqlx::query_scalar::<_, f64>("SELECT net_amount FROM payslips WHERE id = ? FOR UPDATE")
        .bind(payslip.id)
        .fetch_one(&mut *tx)
        .await?;

    let committed = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE payslip_id = ? AND status <> ?",
    )
    .bind(payslip.id)
    .bind(PaymentStatus::Failed)
    .fetch_one(&mut *tx)
    .await?;

    validate_payment_amount(payload.amount, outstanding_amount(net_amount, committed))?;

    let result = sqlx::query(
        r#"
        INSERT INTO payments
        (company_id, payslip_id, pay_cycle_id, amount, method, reference, status, paid_at, created_by)
        VALUES (?, ?, ?, ?, ?, ?, ?, IF(?, NOW(), NULL), ?)
        "#,
    )
    .bind(payslip.company_id)
    .bind(payslip.id)
    .bind(payslip.pay_cycle_id)
    .bind(payload.amount)
    .bind(payload.method)
    .bind(&payload.reference)
    .bind(status)
    .bind(status == PaymentStatus::Paid)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await?;

    let payment_id = result.last_insert_id();
    let payslip_status = refresh_payslip_status(&mut tx, payslip.id, net_amount).await?;

    tx.commit().await?;
    info!(payment_id, payslip_id = payslip.id, amount = payload.amount, status = %status, "Payment recorded");

    AuditEntry::by(&auth, AuditAction::Create, AuditEntity::Payment)
        .entity_id(payment_id)
        .company(payslip.company_id)
        .details(json!({
            "payslip_id": payslip.id,
            "amount": payload.amount,
            "method": payload.method,
            "status": status,
            "payslip_status": payslip_status
        }))
        .record(pool.get_ref())
        .await;

    let payment = fetch_payment(pool.get_ref(), &auth, payment_id).await?;
    Ok(HttpResponse::Created().json(payment))
}

/// Mark a payment PAID or FAILED
#[utoipa::path(
    put,
    path = "/api/v1/payments/{payment_id}/status",
    params(("payment_id" = u64, Path, description = "Payment ID")),
    request_body = UpdatePaymentStatus,
    responses(
        (status = 200, description = "Payment status changed", body = Payment),
        (status = 400, description = "Transition not allowed or cycle closed", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Payment not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn update_payment_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdatePaymentStatus>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let payment_id = path.into_inner();
    let current = fetch_payment(pool.get_ref(), &auth, payment_id).await?;

    let mut tx = pool.begin().await?;

    let cycle = lock_cycle(&mut tx, &auth, current.pay_cycle_id).await?;
    if cycle.status == CycleStatus::Closed {
        return Err(AppError::validation(
            "Payments of a closed pay cycle cannot change",
        ));
    }

    let net_amount = sqlx::query_scalar::<_, f64>("SELECT net_amount FROM payslips WHERE id = ? FOR UPDATE")
        .bind(current.payslip_id)
        .fetch_one(&mut *tx)
        .await?;

    // re-read under the locks; another cashier may have moved it meanwhile
    let from = sqlx::query_scalar::<_, PaymentStatus>("SELECT status FROM payments WHERE id = ? FOR UPDATE")
        .bind(payment_id)
        .fetch_one(&mut *tx)
        .await?;
    ensure_transition(from, body.status)?;

    sqlx::query(
        r#"
        UPDATE payments
        SET status = ?, paid_at = IF(?, NOW(), paid_at)
        WHERE id = ?
        "#,
    )
    .bind(body.status)
    .bind(body.status == PaymentStatus::Paid)
    .bind(payment_id)
    .execute(&mut *tx)
    .await?;

    let payslip_status = refresh_payslip_status(&mut tx, current.payslip_id, net_amount).await?;

    tx.commit().await?;
    info!(payment_id, from = %from, to = %body.status, "Payment status changed");

    AuditEntry::by(&auth, AuditAction::StatusChange, AuditEntity::Payment)
        .entity_id(payment_id)
        .company(current.company_id)
        .details(json!({ "from": from, "to": body.status, "payslip_status": payslip_status }))
        .record(pool.get_ref())
        .await;

    let payment = fetch_payment(pool.get_ref(), &auth, payment_id).await?;
    Ok(HttpResponse::Ok().json(payment))
}

/// List payments
#[utoipa::path(
    get,
    path = "/api/v1/payments",
    params(PaymentQuery),
    responses(
        (status = 200, description = "Paginated payment list", body = PaymentPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn list_payments(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<PaymentQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("pay_cycle_id = ?", query.pay_cycle_id)
        .push_opt("payslip_id = ?", query.payslip_id)
        .push_opt("status = ?", query.status.map(|s| s.to_string()))
        .push_opt("method = ?", query.method.map(|m| m.to_string()));
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM payments {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting payments");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );

    let payments = sqlx::query_as::<_, Payment>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(payments, total)))
}

/// Get Payment by ID
#[utoipa::path(
    get,
    path = "/api/v1/payments/{payment_id}",
    params(("payment_id" = u64, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment found", body = Payment),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Payment not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn get_payment(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let payment = fetch_payment(pool.get_ref(), &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_payments_start_pending_or_paid() {
        assert_eq!(initial_status(None).unwrap(), PaymentStatus::Pending);
        assert_eq!(initial_status(Some(PaymentStatus::Paid)).unwrap(), PaymentStatus::Paid);
        assert!(initial_status(Some(PaymentStatus::Failed)).is_err());
    }

    #[test]
    fn settled_payments_cannot_move() {
        assert!(ensure_transition(PaymentStatus::Pending, PaymentStatus::Paid).is_ok());
        assert!(ensure_transition(PaymentStatus::Pending, PaymentStatus::Failed).is_ok());

        let err = ensure_transition(PaymentStatus::Paid, PaymentStatus::Failed).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("PAID to FAILED")));
        assert!(ensure_transition(PaymentStatus::Failed, PaymentStatus::Pending).is_err());
    }
}
