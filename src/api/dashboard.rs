use actix_web::{HttpResponse, web};
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::{
    auth::auth::AuthUser,
    error::AppError,
    model::role::{EVERYONE, Role},
    service::{
        payroll::round_money,
        reporting::{EmployeePayslipLine, load_employee_history},
    },
    utils::db_utils::{BindValues, SqlValue},
};

const LATEST_PAYSLIPS: i64 = 6;

#[derive(Debug, Default, Serialize, ToSchema)]
pub struct PayrollOverview {
    /// Only filled for the platform view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companies: Option<i64>,
    pub active_employees: i64,
    /// Cycles not CLOSED yet
    pub open_cycles: i64,
    /// Net payroll of open cycles
    pub open_net_total: f64,
    /// Company view only: net of open cycles not yet covered by PAID payments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CashierOverview {
    pub pending_payments: i64,
    pub pending_amount: f64,
    pub paid_today: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeeOverview {
    pub employee_id: u64,
    pub latest_payslips: Vec<EmployeePayslipLine>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "view", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dashboard {
    Platform(PayrollOverview),
    Company(PayrollOverview),
    Cashier(CashierOverview),
    Employee(EmployeeOverview),
}

/// Optional company filter appended to the statements below.
fn company_clause(column: &str, company_id: Option<u64>) -> String {
    match company_id {
        Some(_) => format!(" AND {column} = ?"),
        None => String::new(),
    }
}

async fn payroll_overview(pool: &MySqlPool, company_id: Option<u64>) -> Result<PayrollOverview, AppError> {
    let scope: Vec<SqlValue> = company_id.map(SqlValue::from).into_iter().collect();

    let active_employees = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM employees WHERE is_active = TRUE{}",
        company_clause("company_id", company_id)
    ))
    .bind_values(&scope)
    .fetch_one(pool)
    .await?;

    let open_cycles = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM pay_cycles WHERE status <> 'CLOSED'{}",
        company_clause("company_id", company_id)
    ))
    .bind_values(&scope)
    .fetch_one(pool)
    .await?;

    let open_net_total = sqlx::query_scalar::<_, f64>(&format!(
        r#"
        SELECT COALESCE(SUM(p.net_amount), 0)
        FROM payslips p
        JOIN pay_cycles c ON c.id = p.pay_cycle_id
        WHERE c.status <> 'CLOSED'{}
        "#,
        company_clause("c.company_id", company_id)
    ))
    .bind_values(&scope)
    .fetch_one(pool)
    .await?;

    let mut overview = PayrollOverview {
        companies: None,
        active_employees,
        open_cycles,
        open_net_total: round_money(open_net_total),
        outstanding: None,
    };

    match company_id {
        None => {
            let companies = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM companies WHERE is_active = TRUE")
                .fetch_one(pool)
                .await?;
            overview.companies = Some(companies);
        }
        Some(company_id) => {
            let paid = sqlx::query_scalar::<_, f64>(
                r#"
                SELECT COALESCE(SUM(pm.amount), 0)
                FROM payments pm
                JOIN pay_cycles c ON c.id = pm.pay_cycle_id
                WHERE c.status <> 'CLOSED' AND pm.status = 'PAID' AND c.company_id = ?
                "#,
            )
            .bind(company_id)
            .fetch_one(pool)
            .await?;
            overview.outstanding = Some(round_money((open_net_total - paid).max(0.0)));
        }
    }

    Ok(overview)
}

async fn cashier_overview(pool: &MySqlPool, company_id: u64) -> Result<CashierOverview, AppError> {
    let (pending_payments, pending_amount) = sqlx::query_as::<_, (i64, f64)>(
        r#"
        SELECT COUNT(*), COALESCE(SUM(amount), 0)
        FROM payments
        WHERE company_id = ? AND status = 'PENDING'
        "#,
    )
    .bind(company_id)
    .fetch_one(pool)
    .await?;

    let paid_today = sqlx::query_scalar::<_, f64>(
        r#"
        SELECT COALESCE(SUM(amount), 0)
        FROM payments
        WHERE company_id = ? AND status = 'PAID' AND DATE(paid_at) = CURDATE()
        "#,
    )
    .bind(company_id)
    .fetch_one(pool)
    .await?;

    Ok(CashierOverview {
        pending_payments,
        pending_amount: round_money(pending_amount),
        paid_today: round_money(paid_today),
    })
}

/// Role dependent dashboard
#[utoipa::path(
    get,
    path = "/api/v1/dashboard",
    responses(
        (status = 200, description = "Figures for the caller's role", body = Dashboard),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Dashboard"
)]
pub async fn dashboard(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;

    let view = match auth.role {
        Role::SuperAdmin => Dashboard::Platform(payroll_overview(pool.get_ref(), None).await?),
        Role::Admin => {
            let company_id = auth.target_company(None)?;
            Dashboard::Company(payroll_overview(pool.get_ref(), Some(company_id)).await?)
        }
        Role::Cashier => {
            let company_id = auth.target_company(None)?;
            Dashboard::Cashier(cashier_overview(pool.get_ref(), company_id).await?)
        }
        Role::Employee => {
            let employee_id = auth.require_employee()?;
            let history = load_employee_history(pool.get_ref(), employee_id, LATEST_PAYSLIPS).await?;
            Dashboard::Employee(EmployeeOverview {
                employee_id,
                latest_payslips: history.payslips,
            })
        }
    };

    Ok(HttpResponse::Ok().json(view))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn company_clause_only_when_scoped() {
        assert_eq!(company_clause("company_id", None), "");
        assert_eq!(company_clause("c.company_id", Some(3)), " AND c.company_id = ?");
    }

    #[test]
    fn views_are_tagged() {
        let view = Dashboard::Cashier(CashierOverview {
            pending_payments: 2,
            pending_amount: 150.0,
            paid_today: 0.0,
        });
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["view"], "CASHIER");
        assert_eq!(json["pending_payments"], 2);

        let platform = serde_json::to_value(Dashboard::Platform(PayrollOverview::default())).unwrap();
        assert_eq!(platform["view"], "PLATFORM");
        assert!(platform.get("outstanding").is_none());
    }
}
