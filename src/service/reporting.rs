use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::model::{attendance::AttendanceStatus, payslip::PayslipStatus};
use crate::service::payroll::{outstanding_amount, round_money};

/// One payslip with the sum of its PAID payments.
#[derive(Debug, sqlx::FromRow)]
pub struct PayslipTotalsRow {
    pub status: PayslipStatus,
    pub gross_amount: f64,
    pub deductions: f64,
    pub net_amount: f64,
    pub paid_amount: f64,
}

#[derive(Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct PayrollSummary {
    pub payslip_count: usize,
    pub total_gross: f64,
    pub total_deductions: f64,
    pub total_net: f64,
    pub total_paid: f64,
    pub total_outstanding: f64,
    pub pending: usize,
    pub partial: usize,
    pub paid: usize,
}

pub fn summarize_payslips(rows: &[PayslipTotalsRow]) -> PayrollSummary {
    let mut summary = rows.iter().fold(PayrollSummary::default(), |mut acc, row| {
        acc.payslip_count += 1;
        acc.total_gross += row.gross_amount;
        acc.total_deductions += row.deductions;
        acc.total_net += row.net_amount;
        acc.total_paid += row.paid_amount;
        acc.total_outstanding += outstanding_amount(row.net_amount, row.paid_amount);
        match row.status {
            PayslipStatus::Pending => acc.pending += 1,
            PayslipStatus::Partial => acc.partial += 1,
            PayslipStatus::Paid => acc.paid += 1,
        }
        acc
    });

    summary.total_gross = round_money(summary.total_gross);
    summary.total_deductions = round_money(summary.total_deductions);
    summary.total_net = round_money(summary.total_net);
    summary.total_paid = round_money(summary.total_paid);
    summary.total_outstanding = round_money(summary.total_outstanding);
    summary
}

/// Payslip totals of one cycle.
pub async fn load_payroll_summary(pool: &MySqlPool, cycle_id: u64) -> Result<PayrollSummary, AppError> {
    let rows = sqlx::query_as::<_, PayslipTotalsRow>(
        r#"
        SELECT p.status, p.gross_amount, p.deductions, p.net_amount,
               COALESCE((SELECT SUM(pm.amount) FROM payments pm
                         WHERE pm.payslip_id = p.id AND pm.status = 'PAID'), 0) AS paid_amount
        FROM payslips p
        WHERE p.pay_cycle_id = ?
        "#,
    )
    .bind(cycle_id)
    .fetch_all(pool)
    .await?;

    Ok(summarize_payslips(&rows))
}

#[derive(Debug, sqlx::FromRow)]
pub struct AttendanceRow {
    pub employee_id: u64,
    pub employee_name: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, PartialEq, Serialize, ToSchema)]
pub struct EmployeeAttendance {
    pub employee_id: u64,
    pub employee_name: String,
    pub present: u32,
    pub absent: u32,
    pub leave: u32,
}

/// Per-employee day counts, ordered by employee id.
pub fn summarize_attendance(rows: &[AttendanceRow]) -> Vec<EmployeeAttendance> {
    let mut by_employee: BTreeMap<u64, EmployeeAttendance> = BTreeMap::new();

    for row in rows {
        let entry = by_employee
            .entry(row.employee_id)
            .or_insert_with(|| EmployeeAttendance {
                employee_id: row.employee_id,
                employee_name: row.employee_name.clone(),
                present: 0,
                absent: 0,
                leave: 0,
            });

        match row.status {
            AttendanceStatus::Present => entry.present += 1,
            AttendanceStatus::Absent => entry.absent += 1,
            AttendanceStatus::Leave => entry.leave += 1,
        }
    }

    by_employee.into_values().collect()
}

/// Attendance of a company's employees between two days, both included.
pub async fn load_attendance_summary(
    pool: &MySqlPool,
    company_id: u64,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<EmployeeAttendance>, AppError> {
    let rows = sqlx::query_as::<_, AttendanceRow>(
        r#"
        SELECT a.employee_id, CONCAT(e.first_name, ' ', e.last_name) AS employee_name, a.status
        FROM attendance a
        JOIN employees e ON e.id = a.employee_id
        WHERE e.company_id = ? AND a.date BETWEEN ? AND ?
        "#,
    )
    .bind(company_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(summarize_attendance(&rows))
}

/// One payslip of an employee with the cycle it belongs to.
#[derive(Debug, Serialize, sqlx::FromRow, ToSchema)]
pub struct EmployeePayslipLine {
    pub payslip_id: u64,
    pub pay_cycle_id: u64,
    pub cycle_label: String,
    #[schema(value_type = String)]
    pub period_start: NaiveDate,
    #[schema(value_type = String)]
    pub period_end: NaiveDate,
    pub days_worked: u32,
    pub gross_amount: f64,
    pub deductions: f64,
    pub net_amount: f64,
    pub paid_amount: f64,
    pub status: PayslipStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EmployeeHistory {
    pub employee_id: u64,
    pub payslips: Vec<EmployeePayslipLine>,
    pub total_net: f64,
    pub total_paid: f64,
}

pub fn summarize_history(employee_id: u64, payslips: Vec<EmployeePayslipLine>) -> EmployeeHistory {
    let total_net = round_money(payslips.iter().map(|p| p.net_amount).sum());
    let total_paid = round_money(payslips.iter().map(|p| p.paid_amount).sum());

    EmployeeHistory {
        employee_id,
        payslips,
        total_net,
        total_paid,
    }
}

/// Newest first; `limit` caps the number of payslips.
pub async fn load_employee_history(
    pool: &MySqlPool,
    employee_id: u64,
    limit: i64,
) -> Result<EmployeeHistory, AppError> {
    let payslips = sqlx::query_as::<_, EmployeePayslipLine>(
        r#"
        SELECT p.id AS payslip_id, p.pay_cycle_id, c.label AS cycle_label,
               c.period_start, c.period_end, p.days_worked,
               p.gross_amount, p.deductions, p.net_amount,
               COALESCE((SELECT SUM(pm.amount) FROM payments pm
                         WHERE pm.payslip_id = p.id AND pm.status = 'PAID'), 0) AS paid_amount,
               p.status
        FROM payslips p
        JOIN pay_cycles c ON c.id = p.pay_cycle_id
        WHERE p.employee_id = ?
        ORDER BY c.period_start DESC, p.id DESC
        LIMIT ?
        "#,
    )
    .bind(employee_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(summarize_history(employee_id, payslips))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slip(status: PayslipStatus, net: f64, paid: f64) -> PayslipTotalsRow {
        PayslipTotalsRow {
            status,
            gross_amount: net,
            deductions: 0.0,
            net_amount: net,
            paid_amount: paid,
        }
    }

    #[test]
    fn payroll_summary_totals_and_counts() {
        let summary = summarize_payslips(&[
            slip(PayslipStatus::Paid, 1000.0, 1000.0),
            slip(PayslipStatus::Partial, 500.0, 200.0),
            slip(PayslipStatus::Pending, 300.0, 0.0),
        ]);

        assert_eq!(summary.payslip_count, 3);
        assert_eq!(summary.total_net, 1800.0);
        assert_eq!(summary.total_paid, 1200.0);
        assert_eq!(summary.total_outstanding, 600.0);
        assert_eq!((summary.pending, summary.partial, summary.paid), (1, 1, 1));
    }

    #[test]
    fn empty_cycle_summarizes_to_zero() {
        assert_eq!(summarize_payslips(&[]), PayrollSummary::default());
    }

    #[test]
    fn attendance_is_grouped_per_employee() {
        let row = |employee_id, status| AttendanceRow {
            employee_id,
            employee_name: format!("Employee {employee_id}"),
            status,
        };

        let summary = summarize_attendance(&[
            row(2, AttendanceStatus::Present),
            row(1, AttendanceStatus::Absent),
            row(2, AttendanceStatus::Present),
            row(2, AttendanceStatus::Leave),
        ]);

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].employee_id, 1);
        assert_eq!(summary[0].absent, 1);
        assert_eq!((summary[1].present, summary[1].leave), (2, 1));
    }

    #[test]
    fn history_totals() {
        let line = |id, net, paid| EmployeePayslipLine {
            payslip_id: id,
            pay_cycle_id: id,
            cycle_label: format!("Cycle {id}"),
            period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
            days_worked: 20,
            gross_amount: net,
            deductions: 0.0,
            net_amount: net,
            paid_amount: paid,
            status: PayslipStatus::Partial,
        };

        let history = summarize_history(7, vec![line(1, 100.1, 100.1), line(2, 200.2, 50.0)]);
        assert_eq!(history.employee_id, 7);
        assert_eq!(history.total_net, 300.3);
        assert_eq!(history.total_paid, 150.1);
    }
}
