use crate::api::{
    attendance::RecordAttendance,
    company::{CreateCompany, UpdateCompany},
    dashboard::{CashierOverview, Dashboard, EmployeeOverview, PayrollOverview},
    employee::{CreateEmployee, EmployeeStatus, UpdateEmployee},
    parameter::UpsertParameter,
    pay_cycle::{CreatePayCycle, GenerationResult, PayCycleDetail},
    payment::{CreatePayment, UpdatePaymentStatus},
    payslip::AdjustPayslip,
    report::GenerateReport,
    user::{CreateUser, UpdateUser},
};
use crate::auth::{auth::AuthUser, handlers::ChangePasswordReq};
use crate::error::ErrorBody;
use crate::model::{
    attendance::{Attendance, AttendanceStatus},
    audit_log::{AuditAction, AuditEntity, AuditLog},
    company::{Company, PayFrequency},
    employee::{ContractType, Employee},
    global_parameter::GlobalParameter,
    pay_cycle::{CycleStatus, PayCycle},
    payment::{Payment, PaymentMethod, PaymentStatus},
    payslip::{Payslip, PayslipStatus},
    report::{Report, ReportType},
    role::Role,
    user::UserResponse,
};
use crate::models::{LoginReqDto, MessageResponse, TokenPair};
use crate::service::reporting::{EmployeeAttendance, EmployeeHistory, EmployeePayslipLine, PayrollSummary};
use crate::utils::pagination::{
    AttendancePage, AuditLogPage, CompanyPage, EmployeePage, PayCyclePage, PaymentPage, PayslipPage,
    ReportPage, UserPage,
};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payroll API",
        version = "1.0.0",
        description = r#"
## Multi-company Payroll Management

Companies run their payroll through this API: employee records, daily attendance,
pay cycles, payslips and the payments that settle them.

### Key Features
- **Companies and users**
  - Platform administrators manage companies; company administrators manage their staff accounts
- **Employees and attendance**
  - Monthly or daily contracts, self-service check-in and check-out
- **Pay cycles**
  - DRAFT -> APPROVED -> CLOSED; payslips are generated from attendance and the deduction rate
- **Payments**
  - Partial and full payments; a cycle only closes once every payment is PAID
- **Reports, dashboard and audit trail**

### Security
Every `/api/v1` endpoint requires a **JWT Bearer** access token. Each route carries a role
allow-list (SUPER_ADMIN, ADMIN, CASHIER, EMPLOYEE); other roles receive 403.

### Response Format
- JSON bodies; errors are `{"error": CODE, "message": text}`
- List endpoints take `page` and `per_page`
"#,
    ),
    paths(
        crate::routes::health,

        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,
        crate::auth::handlers::change_password,

        crate::api::company::create_company,
        crate::api::company::list_companies,
        crate::api::company::get_company,
        crate::api::company::update_company,
        crate::api::company::delete_company,

        crate::api::user::create_user,
        crate::api::user::list_users,
        crate::api::user::get_user,
        crate::api::user::update_user,
        crate::api::user::deactivate_user,

        crate::api::employee::create_employee,
        crate::api::employee::list_employees,
        crate::api::employee::get_employee,
        crate::api::employee::update_employee,
        crate::api::employee::set_employee_status,
        crate::api::employee::delete_employee,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::record_attendance,
        crate::api::attendance::list_attendance,

        crate::api::pay_cycle::create_pay_cycle,
        crate::api::pay_cycle::list_pay_cycles,
        crate::api::pay_cycle::get_pay_cycle,
        crate::api::pay_cycle::generate_payslips,
        crate::api::pay_cycle::approve_pay_cycle,
        crate::api::pay_cycle::close_pay_cycle,

        crate::api::payslip::list_payslips,
        crate::api::payslip::get_payslip,
        crate::api::payslip::adjust_payslip,

        crate::api::payment::create_payment,
        crate::api::payment::list_payments,
        crate::api::payment::get_payment,
        crate::api::payment::update_payment_status,

        crate::api::report::generate_report,
        crate::api::report::list_reports,
        crate::api::report::get_report,

        crate::api::dashboard::dashboard,
        crate::api::audit_log::list_audit_logs,

        crate::api::parameter::list_parameters,
        crate::api::parameter::get_parameter,
        crate::api::parameter::upsert_parameter,
        crate::api::parameter::delete_parameter
    ),
    components(
        schemas(
            ErrorBody,
            MessageResponse,
            LoginReqDto,
            TokenPair,
            AuthUser,
            ChangePasswordReq,
            Role,

            Company,
            PayFrequency,
            CreateCompany,
            UpdateCompany,
            CompanyPage,

            UserResponse,
            CreateUser,
            UpdateUser,
            UserPage,

            Employee,
            ContractType,
            CreateEmployee,
            UpdateEmployee,
            EmployeeStatus,
            EmployeePage,

            Attendance,
            AttendanceStatus,
            RecordAttendance,
            AttendancePage,

            PayCycle,
            CycleStatus,
            CreatePayCycle,
            PayCycleDetail,
            GenerationResult,
            PayCyclePage,
            PayrollSummary,

            Payslip,
            PayslipStatus,
            AdjustPayslip,
            PayslipPage,

            Payment,
            PaymentStatus,
            PaymentMethod,
            CreatePayment,
            UpdatePaymentStatus,
            PaymentPage,

            Report,
            ReportType,
            GenerateReport,
            ReportPage,
            EmployeeAttendance,
            EmployeeHistory,
            EmployeePayslipLine,

            Dashboard,
            PayrollOverview,
            CashierOverview,
            EmployeeOverview,

            AuditLog,
            AuditAction,
            AuditEntity,
            AuditLogPage,

            GlobalParameter,
            UpsertParameter
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Auth", description = "Login, token refresh and logout"),
        (name = "Company", description = "Company management APIs"),
        (name = "User", description = "User account APIs"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Attendance", description = "Attendance management APIs"),
        (name = "PayCycle", description = "Pay cycle lifecycle and payslip generation"),
        (name = "Payslip", description = "Payslip APIs"),
        (name = "Payment", description = "Payment APIs"),
        (name = "Report", description = "Stored reports"),
        (name = "Dashboard", description = "Role dependent figures"),
        (name = "AuditLog", description = "Audit trail"),
        (name = "Parameter", description = "Global and company parameters"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by every protected path.
pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_protected_paths_and_scheme() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/api/v1/pay-cycles/{cycle_id}/close"));
        assert!(doc.paths.paths.contains_key("/auth/login"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(components.schemas.contains_key("PaymentPage"));
        assert!(components.schemas.contains_key("ErrorBody"));
        assert!(components.schemas.contains_key("AuditLogPage"));
    }
}
