use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::model::{
    attendance::Attendance, audit_log::AuditLog, company::Company, employee::Employee,
    pay_cycle::PayCycle, payment::Payment, payslip::Payslip, report::Report, user::UserResponse,
};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// `?page=&per_page=`; list queries embed the same two fields and convert.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// 1-based page number
    #[param(example = 1)]
    pub page: Option<u32>,
    /// items per page (max 100)
    #[param(example = 20)]
    pub per_page: Option<u32>,
}

impl PageParams {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page())
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page() - 1) * self.limit()
    }

    pub fn wrap<T>(&self, data: Vec<T>, total: i64) -> Paginated<T> {
        Paginated {
            data,
            page: self.page(),
            per_page: self.per_page(),
            total,
        }
    }
}

#[derive(Serialize, ToSchema)]
#[aliases(
    CompanyPage = Paginated<Company>,
    UserPage = Paginated<UserResponse>,
    EmployeePage = Paginated<Employee>,
    AttendancePage = Paginated<Attendance>,
    PayCyclePage = Paginated<PayCycle>,
    PayslipPage = Paginated<Payslip>,
    PaymentPage = Paginated<Payment>,
    ReportPage = Paginated<Report>,
    AuditLogPage = Paginated<AuditLog>
)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 57)]
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page() {
        let params = PageParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.per_page(), DEFAULT_PER_PAGE);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let params = PageParams {
            page: Some(0),
            per_page: Some(10_000),
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.per_page(), MAX_PER_PAGE);
    }

    #[test]
    fn offset_skips_previous_pages() {
        let params = PageParams {
            page: Some(3),
            per_page: Some(25),
        };
        assert_eq!(params.offset(), 50);
        assert_eq!(params.limit(), 25);

        let page = params.wrap(vec!["a", "b"], 52);
        assert_eq!(page.page, 3);
        assert_eq!(page.total, 52);
    }
}
