use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
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
        employee::{ContractType, Employee},
        role::{MANAGERS, PAYROLL_STAFF},
    },
    models::MessageResponse,
    service::audit::AuditEntry,
    utils::{
        db_utils::{BindValues, WhereBuilder, build_update_sql, execute_update},
        pagination::PageParams,
    },
};

const EMPLOYEE_COLUMNS: &str = "id, company_id, employee_code, first_name, last_name, email, phone, position, contract_type, base_salary, daily_rate, bank_account, hire_date, is_active, created_at";

const UPDATABLE_COLUMNS: &[&str] = &[
    "employee_code",
    "first_name",
    "last_name",
    "email",
    "phone",
    "position",
    "contract_type",
    "base_salary",
    "daily_rate",
    "bank_account",
    "hire_date",
];

#[derive(Deserialize, ToSchema)]
pub struct CreateEmployee {
    /// Required when a SuperAdmin creates the employee
    pub company_id: Option<u64>,
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "Awa")]
    pub first_name: String,
    #[schema(example = "Diop")]
    pub last_name: String,
    #[schema(example = "awa.diop@sahel-logistique.sn")]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[schema(example = "Accountant")]
    pub position: Option<String>,
    pub contract_type: ContractType,
    #[serde(default)]
    #[schema(example = 450000.0)]
    pub base_salary: f64,
    #[serde(default)]
    pub daily_rate: f64,
    pub bank_account: Option<String>,
    #[schema(example = "2026-01-01", value_type = String)]
    pub hire_date: NaiveDate,
}

#[derive(Deserialize, Serialize, ToSchema)]
pub struct UpdateEmployee {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_type: Option<ContractType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_salary: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "2026-01-01", value_type = Option<String>)]
    pub hire_date: Option<NaiveDate>,
}

#[derive(Deserialize, ToSchema)]
pub struct EmployeeStatus {
    pub is_active: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub contract_type: Option<ContractType>,
    pub is_active: Option<bool>,
    /// Search by name, email or employee code
    pub search: Option<String>,
}

/// Pay fields must match how the contract is paid.
fn validate_pay(contract: ContractType, base_salary: f64, daily_rate: f64) -> Result<(), AppError> {
    if base_salary < 0.0 || daily_rate < 0.0 {
        return Err(AppError::validation("Salary amounts cannot be negative"));
    }
    match contract {
        ContractType::Fixed | ContractType::Honorarium if base_salary <= 0.0 => Err(
            AppError::validation(format!("{contract} contracts need a base_salary greater than zero")),
        ),
        ContractType::Daily if daily_rate <= 0.0 => Err(AppError::validation(
            "DAILY contracts need a daily_rate greater than zero",
        )),
        _ => Ok(()),
    }
}

fn require_text(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn duplicate_code(e: sqlx::Error) -> AppError {
    match AppError::from(e) {
        AppError::Conflict(_) => AppError::conflict("Employee code already used in this company"),
        other => other,
    }
}

/// Loads an employee and checks it belongs to a company the caller can see.
pub async fn fetch_employee(
    pool: &MySqlPool,
    auth: &AuthUser,
    employee_id: u64,
) -> Result<Employee, AppError> {
    let employee = sqlx::query_as::<_, Employee>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ?"
    ))
    .bind(employee_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("Employee not found"))?;

    auth.ensure_company(employee.company_id)?;
    Ok(employee)
}

/// Create Employee
#[utoipa::path(
    post,
    path = "/api/v1/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 409, description = "Employee code already used", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateEmployee>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let company_id = auth.target_company(payload.company_id)?;
    require_text("employee_code", &payload.employee_code)?;
    require_text("first_name", &payload.first_name)?;
    require_text("last_name", &payload.last_name)?;
    validate_pay(payload.contract_type, payload.base_salary, payload.daily_rate)?;

    let result = sqlx::query(
        r#"
        INSERT INTO employees
        (company_id, employee_code, first_name, last_name, email, phone, position,
         contract_type, base_salary, daily_rate, bank_account, hire_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(payload.employee_code.trim())
    .bind(payload.first_name.trim())
    .bind(payload.last_name.trim())
    .bind(&payload.email)
    .bind(&payload.phone)
    .bind(&payload.position)
    .bind(payload.contract_type)
    .bind(payload.base_salary)
    .bind(payload.daily_rate)
    .bind(&payload.bank_account)
    .bind(payload.hire_date)
    .execute(pool.get_ref())
    .await
    .map_err(duplicate_code)?;

    let employee_id = result.last_insert_id();
    info!(employee_id, company_id, "Employee created");

    AuditEntry::by(&auth, AuditAction::Create, AuditEntity::Employee)
        .entity_id(employee_id)
        .company(company_id)
        .details(json!({ "employee_code": payload.employee_code.trim() }))
        .record(pool.get_ref())
        .await;

    let employee = fetch_employee(pool.get_ref(), &auth, employee_id).await?;
    Ok(HttpResponse::Created().json(employee))
}

/// List employees
#[utoipa::path(
    get,
    path = "/api/v1/employees",
    params(EmployeeQuery),
    responses(
        (status = 200, description = "Paginated employee list", body = EmployeePage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EmployeeQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    // ---------- build WHERE clause dynamically ----------
    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("contract_type = ?", query.contract_type.map(|c| c.to_string()))
        .push_opt("is_active = ?", query.is_active)
        .search(
            &["first_name", "last_name", "email", "employee_code"],
            query.search.as_deref(),
        );
    let where_clause = filters.clause();

    // ---------- total count ----------
    let count_sql = format!("SELECT COUNT(*) FROM employees {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting employees");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    // ---------- data query ----------
    let data_sql = format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );
    debug!(sql = %data_sql, page = paging.page(), per_page = paging.per_page(), "Fetching employees");

    let employees = sqlx::query_as::<_, Employee>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(employees, total)))
}

/// Get Employee by ID
#[utoipa::path(
    get,
    path = "/api/v1/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(PAYROLL_STAFF)?;

    let employee = fetch_employee(pool.get_ref(), &auth, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Update Employee
#[utoipa::path(
    put,
    path = "/api/v1/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody),
        (status = 409, description = "Employee code already used", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateEmployee>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let employee_id = path.into_inner();
    let current = fetch_employee(pool.get_ref(), &auth, employee_id).await?;

    let body = body.into_inner();
    for (field, value) in [
        ("employee_code", &body.employee_code),
        ("first_name", &body.first_name),
        ("last_name", &body.last_name),
    ] {
        if let Some(value) = value {
            require_text(field, value)?;
        }
    }

    // the resulting combination has to be valid, not just the changed fields
    validate_pay(
        body.contract_type.unwrap_or(current.contract_type),
        body.base_salary.unwrap_or(current.base_salary),
        body.daily_rate.unwrap_or(current.daily_rate),
    )?;

    let payload = serde_json::to_value(&body)
        .map_err(|e| AppError::internal(format!("serialize employee update: {e}")))?;
    let update = build_update_sql(
        "employees",
        &payload,
        UPDATABLE_COLUMNS,
        &[("id", employee_id), ("company_id", current.company_id)],
    )?;

    execute_update(pool.get_ref(), update)
        .await
        .map_err(duplicate_code)?;

    AuditEntry::by(&auth, AuditAction::Update, AuditEntity::Employee)
        .entity_id(employee_id)
        .company(current.company_id)
        .details(payload)
        .record(pool.get_ref())
        .await;

    let employee = fetch_employee(pool.get_ref(), &auth, employee_id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Activate or deactivate an Employee
#[utoipa::path(
    put,
    path = "/api/v1/employees/{employee_id}/status",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    request_body = EmployeeStatus,
    responses(
        (status = 200, description = "Status changed", body = Employee),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn set_employee_status(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<EmployeeStatus>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let employee_id = path.into_inner();
    let current = fetch_employee(pool.get_ref(), &auth, employee_id).await?;

    sqlx::query("UPDATE employees SET is_active = ? WHERE id = ?")
        .bind(body.is_active)
        .bind(employee_id)
        .execute(pool.get_ref())
        .await?;

    info!(employee_id, is_active = body.is_active, "Employee status changed");

    AuditEntry::by(&auth, AuditAction::StatusChange, AuditEntity::Employee)
        .entity_id(employee_id)
        .company(current.company_id)
        .details(json!({ "from": current.is_active, "to": body.is_active }))
        .record(pool.get_ref())
        .await;

    let employee = fetch_employee(pool.get_ref(), &auth, employee_id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Delete Employee
#[utoipa::path(
    delete,
    path = "/api/v1/employees/{employee_id}",
    params(("employee_id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Successfully deleted", body = MessageResponse),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody),
        (status = 409, description = "Employee has payroll history", body = ErrorBody)
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let employee_id = path.into_inner();
    let current = fetch_employee(pool.get_ref(), &auth, employee_id).await?;

    sqlx::query("DELETE FROM employees WHERE id = ? AND company_id = ?")
        .bind(employee_id)
        .bind(current.company_id)
        .execute(pool.get_ref())
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::conflict(
                "Employee has attendance or payroll history; deactivate instead",
            ),
            other => other,
        })?;

    AuditEntry::by(&auth, AuditAction::Delete, AuditEntity::Employee)
        .entity_id(employee_id)
        .company(current.company_id)
        .details(json!({ "employee_code": current.employee_code }))
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Successfully deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_honorarium_need_a_salary() {
        assert!(validate_pay(ContractType::Fixed, 300000.0, 0.0).is_ok());
        assert!(validate_pay(ContractType::Fixed, 0.0, 5000.0).is_err());
        assert!(validate_pay(ContractType::Honorarium, 0.0, 0.0).is_err());
    }

    #[test]
    fn daily_contracts_need_a_rate() {
        assert!(validate_pay(ContractType::Daily, 0.0, 7500.0).is_ok());
        assert!(validate_pay(ContractType::Daily, 300000.0, 0.0).is_err());
        assert!(validate_pay(ContractType::Daily, 0.0, -1.0).is_err());
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(require_text("first_name", "  ").is_err());
        assert!(require_text("first_name", "Awa").is_ok());
    }

    #[test]
    fn partial_update_only_sends_present_fields() {
        let update = UpdateEmployee {
            employee_code: None,
            first_name: Some("Awa".to_string()),
            last_name: None,
            email: None,
            phone: None,
            position: None,
            contract_type: Some(ContractType::Daily),
            base_salary: None,
            daily_rate: Some(8000.0),
            bank_account: None,
            hire_date: None,
        };

        let payload = serde_json::to_value(&update).unwrap();
        let sql = build_update_sql("employees", &payload, UPDATABLE_COLUMNS, &[("id", 1), ("company_id", 2)])
            .unwrap();

        assert_eq!(payload.as_object().unwrap().len(), 3);
        assert_eq!(payload["contract_type"], "DAILY");
        assert_eq!(sql.values.len(), 5);
    }
}
