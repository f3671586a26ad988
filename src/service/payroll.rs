//! Payroll rules shared by the pay cycle, payslip and payment handlers.
//!
//! Everything here is plain arithmetic over values already loaded from the
//! database, so the rules can be tested without one.

use chrono::NaiveDate;

use crate::error::AppError;
use crate::model::{
    employee::ContractType, pay_cycle::CycleStatus, payment::PaymentStatus,
    payslip::PayslipStatus,
};

/// Amounts closer than half a cent are treated as equal.
pub const MONEY_EPSILON: f64 = 0.005;

pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayslipFigures {
    pub days_worked: u32,
    pub gross: f64,
    pub deductions: f64,
    pub net: f64,
}

pub fn compute_gross(contract: ContractType, base_salary: f64, daily_rate: f64, days_present: u32) -> f64 {
    let gross = match contract {
        ContractType::Fixed | ContractType::Honorarium => base_salary,
        ContractType::Daily => daily_rate * f64::from(days_present),
    };
    round_money(gross.max(0.0))
}

/// `rate_percent` is a percentage of gross, already validated to 0..=100.
pub fn compute_payslip(
    contract: ContractType,
    base_salary: f64,
    daily_rate: f64,
    days_present: u32,
    rate_percent: f64,
) -> PayslipFigures {
    let gross = compute_gross(contract, base_salary, daily_rate, days_present);
    let deductions = round_money(gross * rate_percent / 100.0);

    PayslipFigures {
        days_worked: days_present,
        gross,
        deductions,
        net: round_money(gross - deductions),
    }
}

/// Parses the stored deduction-rate parameter; absent means no deduction.
pub fn parse_deduction_rate(raw: Option<&str>) -> Result<f64, AppError> {
    let Some(raw) = raw else {
        return Ok(0.0);
    };

    let rate: f64 = raw.trim().parse().map_err(|_| {
        AppError::validation(format!("Deduction rate parameter is not a number: {raw}"))
    })?;

    if !(0.0..=100.0).contains(&rate) {
        return Err(AppError::validation(format!(
            "Deduction rate must be between 0 and 100, got {rate}"
        )));
    }
    Ok(rate)
}

/// Manual payslip adjustment; returns the recomputed net.
pub fn adjusted_net(gross: f64, deductions: f64) -> Result<f64, AppError> {
    if gross < 0.0 || deductions < 0.0 {
        return Err(AppError::validation("Amounts cannot be negative"));
    }
    if deductions > gross + MONEY_EPSILON {
        return Err(AppError::validation("Deductions cannot exceed the gross amount"));
    }
    Ok(round_money(gross - deductions).max(0.0))
}

/// Payslip status follows the sum of its PAID payments. Nothing is owed on a zero net.
pub fn rollup_payslip_status(net: f64, paid_total: f64) -> PayslipStatus {
    if net <= MONEY_EPSILON {
        PayslipStatus::Paid
    } else if paid_total <= MONEY_EPSILON {
        PayslipStatus::Pending
    } else if paid_total + MONEY_EPSILON < net {
        PayslipStatus::Partial
    } else {
        PayslipStatus::Paid
    }
}

/// What may still be committed against a payslip. Failed payments free their amount.
pub fn outstanding_amount(net: f64, committed: f64) -> f64 {
    round_money((net - committed).max(0.0))
}

pub fn validate_payment_amount(amount: f64, outstanding: f64) -> Result<(), AppError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::validation("Payment amount must be greater than zero"));
    }
    if round_money(amount) != amount {
        return Err(AppError::validation("Payment amount must be in whole cents"));
    }
    if amount > outstanding {
        return Err(AppError::validation(format!(
            "Payment amount {amount:.2} exceeds the outstanding {outstanding:.2}"
        )));
    }
    Ok(())
}

/// Payments may only be recorded against an approved, still open cycle.
pub fn ensure_cycle_accepts_payments(status: CycleStatus) -> Result<(), AppError> {
    match status {
        CycleStatus::Approved => Ok(()),
        CycleStatus::Draft => Err(AppError::validation(
            "Pay cycle must be approved before payments are recorded",
        )),
        CycleStatus::Closed => Err(AppError::validation("Pay cycle is closed")),
    }
}

/// A cycle closes only when every payment under it is PAID.
pub fn ensure_cycle_closable(status: CycleStatus, payments: &[PaymentStatus]) -> Result<(), AppError> {
    if !status.can_transition_to(CycleStatus::Closed) {
        return Err(AppError::conflict("Pay cycle is already closed"));
    }

    let outstanding = payments
        .iter()
        .filter(|status| **status != PaymentStatus::Paid)
        .count();

    if outstanding > 0 {
        return Err(AppError::validation(format!(
            "Cannot close pay cycle: {outstanding} payment(s) are not paid"
        )));
    }
    Ok(())
}

pub fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), AppError> {
    if start > end {
        return Err(AppError::validation("period_start cannot be after period_end"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_contract_ignores_attendance() {
        let figures = compute_payslip(ContractType::Fixed, 450_000.0, 0.0, 3, 5.0);
        assert_eq!(figures.gross, 450_000.0);
        assert_eq!(figures.deductions, 22_500.0);
        assert_eq!(figures.net, 427_500.0);
    }

    #[test]
    fn daily_contract_pays_days_present() {
        let figures = compute_payslip(ContractType::Daily, 0.0, 12_500.0, 22, 0.0);
        assert_eq!(figures.days_worked, 22);
        assert_eq!(figures.gross, 275_000.0);
        assert_eq!(figures.net, 275_000.0);
    }

    #[test]
    fn amounts_are_rounded_to_cents() {
        let figures = compute_payslip(ContractType::Honorarium, 1000.0, 0.0, 0, 3.333);
        assert_eq!(figures.deductions, 33.33);
        assert_eq!(figures.net, 966.67);
    }

    #[test]
    fn deduction_rate_parsing() {
        assert_eq!(parse_deduction_rate(None).unwrap(), 0.0);
        assert_eq!(parse_deduction_rate(Some(" 7.5 ")).unwrap(), 7.5);
        assert!(parse_deduction_rate(Some("abc")).is_err());
        assert!(parse_deduction_rate(Some("120")).is_err());
    }

    #[test]
    fn adjustment_rejects_deductions_above_gross() {
        assert_eq!(adjusted_net(1000.0, 250.0).unwrap(), 750.0);
        assert!(adjusted_net(1000.0, 1000.5).is_err());
        assert!(adjusted_net(-1.0, 0.0).is_err());
    }

    #[test]
    fn payslip_rollup() {
        assert_eq!(rollup_payslip_status(1000.0, 0.0), PayslipStatus::Pending);
        assert_eq!(rollup_payslip_status(1000.0, 400.0), PayslipStatus::Partial);
        assert_eq!(rollup_payslip_status(1000.0, 999.999), PayslipStatus::Paid);
        assert_eq!(rollup_payslip_status(1000.0, 1000.0), PayslipStatus::Paid);
    }

    #[test]
    fn payment_amount_must_fit_the_outstanding_balance() {
        let outstanding = outstanding_amount(1000.0, 600.0);
        assert_eq!(outstanding, 400.0);
        assert!(validate_payment_amount(400.0, outstanding).is_ok());
        assert!(validate_payment_amount(400.5, outstanding).is_err());
        assert!(validate_payment_amount(0.0, outstanding).is_err());
        assert!(validate_payment_amount(f64::NAN, outstanding).is_err());
    }

    #[test]
    fn fully_committed_payslip_takes_no_more_money() {
        let outstanding = outstanding_amount(1000.0, 1000.0);
        assert_eq!(outstanding, 0.0);
        assert!(validate_payment_amount(0.004, outstanding).is_err());
        assert!(validate_payment_amount(0.01, outstanding).is_err());
    }

    #[test]
    fn payment_amounts_are_whole_cents() {
        let err = validate_payment_amount(12.345, 500.0).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Payment amount must be in whole cents"));
        assert!(validate_payment_amount(399.9, outstanding_amount(1000.0, 600.1)).is_ok());
    }

    #[test]
    fn zero_net_payslip_is_settled() {
        assert_eq!(rollup_payslip_status(0.0, 0.0), PayslipStatus::Paid);
        assert_eq!(rollup_payslip_status(0.004, 0.0), PayslipStatus::Paid);
    }

    #[test]
    fn payments_need_an_approved_cycle() {
        assert!(ensure_cycle_accepts_payments(CycleStatus::Approved).is_ok());
        assert!(ensure_cycle_accepts_payments(CycleStatus::Draft).is_err());
        assert!(ensure_cycle_accepts_payments(CycleStatus::Closed).is_err());
    }

    #[test]
    fn close_fails_while_a_payment_is_pending() {
        let err = ensure_cycle_closable(
            CycleStatus::Approved,
            &[PaymentStatus::Paid, PaymentStatus::Pending],
        )
        .unwrap_err();

        assert!(matches!(err, AppError::Validation(ref msg) if msg.contains("1 payment")));
    }

    #[test]
    fn close_fails_when_a_payment_failed() {
        assert!(matches!(
            ensure_cycle_closable(CycleStatus::Approved, &[PaymentStatus::Failed]),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn close_succeeds_when_everything_is_paid() {
        assert!(
            ensure_cycle_closable(
                CycleStatus::Approved,
                &[PaymentStatus::Paid, PaymentStatus::Paid]
            )
            .is_ok()
        );
        assert!(ensure_cycle_closable(CycleStatus::Approved, &[]).is_ok());
    }

    #[test]
    fn closing_twice_is_a_conflict() {
        assert!(matches!(
            ensure_cycle_closable(CycleStatus::Closed, &[PaymentStatus::Paid]),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn period_must_be_ordered() {
        let jan1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let jan31 = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert!(validate_period(jan1, jan31).is_ok());
        assert!(validate_period(jan1, jan1).is_ok());
        assert!(validate_period(jan31, jan1).is_err());
    }
}
