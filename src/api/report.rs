use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::{employee::fetch_employee, pay_cycle::fetch_cycle},
    auth::auth::AuthUser,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        report::{Report, ReportType},
        role::MANAGERS,
    },
    service::{
        audit::AuditEntry,
        payroll::validate_period,
        reporting::{load_attendance_summary, load_employee_history, load_payroll_summary},
    },
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

const REPORT_COLUMNS: &str = "id, company_id, report_type, parameters, data, generated_by, created_at";
const HISTORY_LIMIT: i64 = 120;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct GenerateReport {
    pub report_type: ReportType,
    /// Required for SuperAdmin callers on ATTENDANCE_SUMMARY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<u64>,
    /// PAYROLL_SUMMARY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pay_cycle_id: Option<u64>,
    /// ATTENDANCE_SUMMARY
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "2026-01-01")]
    pub from: Option<NaiveDate>,
    /// ATTENDANCE_SUMMARY
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "2026-01-31")]
    pub to: Option<NaiveDate>,
    /// EMPLOYEE_HISTORY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub report_type: Option<ReportType>,
}

fn required<T>(value: Option<T>, field: &str, report_type: ReportType) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::validation(format!("{field} is required for {report_type}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value).map_err(|e| AppError::internal(format!("serialize report: {e}")))
}

/// Computes the report body and the company it belongs to.
async fn build_report(pool: &MySqlPool, auth: &AuthUser, request: &GenerateReport) -> Result<(u64, Value), AppError> {
    let report_type = request.report_type;

    match report_type {
        ReportType::PayrollSummary => {
            let cycle_id = required(request.pay_cycle_id, "pay_cycle_id", report_type)?;
            let cycle = fetch_cycle(pool, auth, cycle_id).await?;
            let summary = load_payroll_summary(pool, cycle.id).await?;

            let data = json!({
                "pay_cycle_id": cycle.id,
                "label": cycle.label,
                "period_start": cycle.period_start,
                "period_end": cycle.period_end,
                "status": cycle.status,
                "summary": to_json(&summary)?
            });
            Ok((cycle.company_id, data))
        }
        ReportType::AttendanceSummary => {
            let company_id = auth.target_company(request.company_id)?;
            let from = required(request.from, "from", report_type)?;
            let to = required(request.to, "to", report_type)?;
            validate_period(from, to)?;

            let employees = load_attendance_summary(pool, company_id, from, to).await?;
            let data = json!({
                "from": from,
                "to": to,
                "employees": to_json(&employees)?
            });
            Ok((company_id, data))
        }
        ReportType::EmployeeHistory => {
            let employee_id = required(request.employee_id, "employee_id", report_type)?;
            let employee = fetch_employee(pool, auth, employee_id).await?;
            let history = load_employee_history(pool, employee.id, HISTORY_LIMIT).await?;

            let mut data = to_json(&history)?;
            data["employee_name"] = json!(employee.full_name());
            data["employee_code"] = json!(employee.employee_code);
            Ok((employee.company_id, data))
        }
    }
}

pub async fn fetch_report(pool: &MySqlPool, auth: &AuthUser, report_id: u64) -> Result<Report, AppError> {
    let report = sqlx::query_as::<_, Report>(&format!(
        "SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?"
    ))
    .bind(report_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Report not found"))?;

    auth.ensure_company(report.company_id)?;
    Ok(report)
}

/// Generate and store a report
#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = GenerateReport,
    responses(
        (status = 201, description = "Report generated", body = Report),
        (status = 400, description = "Missing report parameters", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Cycle or employee not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Report"
)]
pub async fn generate_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<GenerateReport>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let request = payload.into_inner();
    let (company_id, data) = build_report(pool.get_ref(), &auth, &request).await?;
    let parameters = to_json(&request)?;

    let result = sqlx::query(
        r#"
        INSERT INTO reports (company_id, report_type, parameters, data, generated_by)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(request.report_type)
    .bind(&parameters)
    .bind(&data)
    .bind(auth.user_id)
    .execute(pool.get_ref())
    .await?;

    let report_id = result.last_insert_id();
    info!(report_id, company_id, report_type = %request.report_type, "Report generated");

    AuditEntry::by(&auth, AuditAction::Generate, AuditEntity::Report)
        .entity_id(report_id)
        .company(company_id)
        .details(parameters)
        .record(pool.get_ref())
        .await;

    let report = fetch_report(pool.get_ref(), &auth, report_id).await?;
    Ok(HttpResponse::Created().json(report))
}

/// List stored reports
#[utoipa::path(
    get,
    path = "/api/v1/reports",
    params(ReportQuery),
    responses(
        (status = 200, description = "Paginated report list", body = ReportPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Report"
)]
pub async fn list_reports(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<ReportQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("report_type = ?", query.report_type.map(|t| t.to_string()));
    let where_clause = filters.clause();

    let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM reports {}", where_clause))
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {REPORT_COLUMNS} FROM reports {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );

    let reports = sqlx::query_as::<_, Report>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(reports, total)))
}

/// Get a stored report
#[utoipa::path(
    get,
    path = "/api/v1/reports/{report_id}",
    params(("report_id" = u64, Path, description = "Report ID")),
    responses(
        (status = 200, description = "Report found", body = Report),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Report not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Report"
)]
pub async fn get_report(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let report = fetch_report(pool.get_ref(), &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_parameter_names_the_report() {
        let err = required::<u64>(None, "pay_cycle_id", ReportType::PayrollSummary).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m == "pay_cycle_id is required for PAYROLL_SUMMARY"));
        assert_eq!(required(Some(4), "pay_cycle_id", ReportType::PayrollSummary).unwrap(), 4);
    }

    #[test]
    fn stored_parameters_skip_absent_fields() {
        let request: GenerateReport = serde_json::from_value(json!({
            "report_type": "ATTENDANCE_SUMMARY",
            "from": "2026-01-01",
            "to": "2026-01-31"
        }))
        .unwrap();

        let parameters = to_json(&request).unwrap();
        assert_eq!(parameters["report_type"], "ATTENDANCE_SUMMARY");
        assert_eq!(parameters["from"], "2026-01-01");
        assert!(parameters.get("employee_id").is_none());
    }
}
