use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::debug;
use utoipa::{IntoParams, ToSchema};

use crate::{
    api::employee::fetch_employee,
    auth::auth::AuthUser,
    error::AppError,
    model::{
        attendance::{Attendance, AttendanceStatus},
        audit_log::{AuditAction, AuditEntity},
        role::{EVERYONE, MANAGERS, Role},
    },
    models::MessageResponse,
    service::audit::AuditEntry,
    utils::{
        db_utils::{BindValues, WhereBuilder},
        pagination::PageParams,
    },
};

#[derive(Deserialize, ToSchema)]
pub struct RecordAttendance {
    pub employee_id: u64,
    #[schema(value_type = String, example = "2026-01-15")]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    #[schema(value_type = Option<String>, example = "08:00:00")]
    pub check_in: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "17:00:00")]
    pub check_out: Option<NaiveTime>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AttendanceQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub status: Option<AttendanceStatus>,
    /// First day included
    #[param(value_type = Option<String>, example = "2026-01-01")]
    pub from: Option<NaiveDate>,
    /// Last day included
    #[param(value_type = Option<String>, example = "2026-01-31")]
    pub to: Option<NaiveDate>,
}

fn validate_record(record: &RecordAttendance) -> Result<(), AppError> {
    if let (Some(check_in), Some(check_out)) = (record.check_in, record.check_out) {
        if check_out < check_in {
            return Err(AppError::validation("check_out cannot be earlier than check_in"));
        }
    }
    if record.status != AttendanceStatus::Present
        && (record.check_in.is_some() || record.check_out.is_some())
    {
        return Err(AppError::validation(format!(
            "{} days cannot carry check-in or check-out times",
            record.status
        )));
    }
    Ok(())
}

fn validate_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<(), AppError> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(AppError::validation("from must not be after to")),
        _ => Ok(()),
    }
}

/// Audit line for a self-service clock event.
fn clock_audit(auth: &AuthUser, action: AuditAction, attendance_id: u64, employee_id: u64) -> AuditEntry {
    let event = if action == AuditAction::Create { "check_in" } else { "check_out" };
    AuditEntry::by(auth, action, AuditEntity::Attendance)
        .entity_id(attendance_id)
        .details(json!({ "employee_id": employee_id, "event": event }))
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/v1/attendance/check-in",
    responses(
        (status = 200, description = "Checked in successfully", body = MessageResponse),
        (status = 400, description = "Already checked in today", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "No employee profile", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;
    let employee_id = auth.require_employee()?;

    let result = sqlx::query(
        r#"
        INSERT INTO attendance (employee_id, date, check_in, status)
        VALUES (?, CURDATE(), CURTIME(), ?)
        "#,
    )
    .bind(employee_id)
    .bind(AttendanceStatus::Present)
    .execute(pool.get_ref())
    .await
    .map_err(|e| match AppError::from(e) {
        // one row per employee and day
        AppError::Conflict(_) => AppError::validation("Already checked in today"),
        other => other,
    })?;

    let attendance_id = result.last_insert_id();
    debug!(employee_id, attendance_id, "Checked in");

    clock_audit(&auth, AuditAction::Create, attendance_id, employee_id)
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Checked in successfully")))
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/v1/attendance/check-out",
    responses(
        (status = 200, description = "Checked out successfully", body = MessageResponse),
        (status = 400, description = "No active check-in found for today", body = ErrorBody),
        (status = 401, description = "Unauthorized", body = ErrorBody),
        (status = 403, description = "No employee profile", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(auth: AuthUser, pool: web::Data<MySqlPool>) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;
    let employee_id = auth.require_employee()?;

    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out = CURTIME()
        WHERE employee_id = ?
        AND date = CURDATE()
        AND check_in IS NOT NULL
        AND check_out IS NULL
        "#,
    )
    .bind(employee_id)
    .execute(pool.get_ref())
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::validation("No active check-in found for today"));
    }

    let attendance_id = sqlx::query_scalar::<_, u64>(
        "SELECT id FROM attendance WHERE employee_id = ? AND date = CURDATE()",
    )
    .bind(employee_id)
    .fetch_one(pool.get_ref())
    .await?;
    debug!(employee_id, attendance_id, "Checked out");

    clock_audit(&auth, AuditAction::Update, attendance_id, employee_id)
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Checked out successfully")))
}

/// Record or correct a day of attendance
#[utoipa::path(
    post,
    path = "/api/v1/attendance/records",
    request_body = RecordAttendance,
    responses(
        (status = 200, description = "Attendance stored", body = Attendance),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "Employee not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn record_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<RecordAttendance>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;
    validate_record(&payload)?;

    let employee = fetch_employee(pool.get_ref(), &auth, payload.employee_id).await?;

    sqlx::query(
        r#"
        INSERT INTO attendance (employee_id, date, check_in, check_out, status)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            check_in = VALUES(check_in),
            check_out = VALUES(check_out),
            status = VALUES(status)
        "#,
    )
    .bind(employee.id)
    .bind(payload.date)
    .bind(payload.check_in)
    .bind(payload.check_out)
    .bind(payload.status)
    .execute(pool.get_ref())
    .await?;

    let record = sqlx::query_as::<_, Attendance>(
        r#"
        SELECT id, employee_id, date, check_in, check_out, status
        FROM attendance
        WHERE employee_id = ? AND date = ?
        "#,
    )
    .bind(employee.id)
    .bind(payload.date)
    .fetch_one(pool.get_ref())
    .await?;

    AuditEntry::by(&auth, AuditAction::Update, AuditEntity::Attendance)
        .entity_id(record.id)
        .company(employee.company_id)
        .details(json!({
            "employee_id": employee.id,
            "date": payload.date,
            "status": payload.status
        }))
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(record))
}

/// List attendance
///
/// Employees only see their own days.
#[utoipa::path(
    get,
    path = "/api/v1/attendance",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Paginated attendance list", body = AttendancePage),
        (status = 400, description = "Invalid date range", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<AttendanceQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;
    validate_range(query.from, query.to)?;

    let employee_filter = if auth.role == Role::Employee {
        let own = auth.require_employee()?;
        if query.employee_id.is_some_and(|id| id != own) {
            return Err(AppError::forbidden());
        }
        Some(own)
    } else {
        query.employee_id
    };

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("e.company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("a.employee_id = ?", employee_filter)
        .push_opt("a.status = ?", query.status.map(|s| s.to_string()))
        .push_opt("a.date >= ?", query.from)
        .push_opt("a.date <= ?", query.to);
    let where_clause = filters.clause();

    let count_sql = format!(
        "SELECT COUNT(*) FROM attendance a JOIN employees e ON e.id = a.employee_id {}",
        where_clause
    );
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting attendance");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        r#"
        SELECT a.id, a.employee_id, a.date, a.check_in, a.check_out, a.status
        FROM attendance a
        JOIN employees e ON e.id = a.employee_id
        {}
        ORDER BY a.date DESC, a.employee_id
        LIMIT ? OFFSET ?
        "#,
        where_clause
    );

    let records = sqlx::query_as::<_, Attendance>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    Ok(HttpResponse::Ok().json(paging.wrap(records, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: AttendanceStatus, check_in: Option<(u32, u32)>, check_out: Option<(u32, u32)>) -> RecordAttendance {
        let time = |(h, m): (u32, u32)| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        RecordAttendance {
            employee_id: 1,
            date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            status,
            check_in: check_in.map(time),
            check_out: check_out.map(time),
        }
    }

    #[test]
    fn present_day_with_ordered_times_is_valid() {
        assert!(validate_record(&record(AttendanceStatus::Present, Some((8, 0)), Some((17, 30)))).is_ok());
        assert!(validate_record(&record(AttendanceStatus::Present, Some((8, 0)), None)).is_ok());
    }

    #[test]
    fn clock_events_are_audited_against_the_attendance_row() {
        let mut auth = crate::auth::auth::tests::principal(Role::Employee, Some(2));
        auth.employee_id = Some(8);

        let entry = clock_audit(&auth, AuditAction::Create, 41, 8);
        assert_eq!(entry.action, AuditAction::Create);
        assert_eq!(entry.entity, AuditEntity::Attendance);
        assert_eq!(entry.entity_id, Some(41));
        assert_eq!(entry.company_id, Some(2));
        assert_eq!(entry.details.as_ref().unwrap()["event"], "check_in");

        let entry = clock_audit(&auth, AuditAction::Update, 41, 8);
        assert_eq!(entry.action, AuditAction::Update);
        assert_eq!(entry.details.as_ref().unwrap()["event"], "check_out");
        assert_eq!(entry.details.as_ref().unwrap()["employee_id"], 8);
    }

    #[test]
    fn check_out_before_check_in_is_rejected() {
        assert!(validate_record(&record(AttendanceStatus::Present, Some((17, 0)), Some((8, 0)))).is_err());
    }

    #[test]
    fn absence_cannot_carry_times() {
        assert!(validate_record(&record(AttendanceStatus::Absent, None, None)).is_ok());
        assert!(validate_record(&record(AttendanceStatus::Leave, Some((8, 0)), None)).is_err());
    }

    #[test]
    fn date_range_must_be_ordered() {
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        assert!(validate_range(Some(d(1)), Some(d(31))).is_ok());
        assert!(validate_range(Some(d(10)), Some(d(2))).is_err());
        assert!(validate_range(None, Some(d(2))).is_ok());
    }
}
