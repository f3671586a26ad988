use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

use crate::{
    auth::{
        auth::AuthUser,
        password::{hash_password, validate_new_password},
    },
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        role::{MANAGERS, Role},
        user::{User, UserResponse},
    },
    models::MessageResponse,
    service::audit::AuditEntry,
    utils::{
        db_utils::{BindValues, WhereBuilder},
        email_cache, email_filter,
        pagination::PageParams,
    },
};

const USER_COLUMNS: &str = "id, company_id, employee_id, full_name, email, password, role_id, is_active, last_login_at, created_at";

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "Moussa Ndiaye")]
    pub full_name: String,
    #[schema(example = "moussa.ndiaye@sahel-logistique.sn")]
    pub email: String,
    #[schema(example = "Ch4ngeMe!")]
    pub password: String,
    pub role: Role,
    /// Required for SuperAdmin callers creating company users
    pub company_id: Option<u64>,
    /// Links the account to an employee record for self-service
    pub employee_id: Option<u64>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateUser {
    pub full_name: Option<String>,
    pub role: Option<Role>,
    pub employee_id: Option<u64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UserQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub company_id: Option<u64>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    /// Search by name or email
    pub search: Option<String>,
}

/// true  => email AVAILABLE
/// false => email TAKEN
pub async fn is_email_available(email: &str, pool: &MySqlPool) -> bool {
    let email = email_filter::normalize(email);

    // 1️⃣ Cuckoo filter: fast negative
    if !email_filter::might_exist(&email) {
        return true;
    }

    // 2️⃣ Moka cache: fast positive
    if email_cache::is_taken(&email).await {
        return false;
    }

    // 3️⃣ Database fallback
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = ? LIMIT 1)")
        .bind(&email)
        .fetch_one(pool)
        .await
        .unwrap_or(true); // fail-safe

    if exists {
        email_cache::mark_taken(&email).await;
        return false;
    }

    true
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'));

    if valid && !email.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(AppError::validation("email is not a valid address"))
    }
}

/// Admins may hand out any role below their own.
fn ensure_can_grant(auth: &AuthUser, role: Role) -> Result<(), AppError> {
    if role == Role::SuperAdmin && !auth.is_super_admin() {
        return Err(AppError::forbidden());
    }
    Ok(())
}

fn ensure_user_visible(auth: &AuthUser, user: &User) -> Result<(), AppError> {
    match user.company_id {
        Some(company_id) => auth.ensure_company(company_id),
        None if auth.is_super_admin() => Ok(()),
        None => Err(AppError::forbidden()),
    }
}

pub async fn fetch_user(pool: &MySqlPool, user_id: u64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))
}

async fn ensure_employee_in_company(
    pool: &MySqlPool,
    employee_id: u64,
    company_id: Option<u64>,
) -> Result<(), AppError> {
    let owner = sqlx::query_scalar::<_, u64>("SELECT company_id FROM employees WHERE id = ?")
        .bind(employee_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::validation("employee_id does not exist"))?;

    if Some(owner) != company_id {
        return Err(AppError::validation("employee_id belongs to another company"));
    }
    Ok(())
}

/// Create User
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;
    ensure_can_grant(&auth, payload.role)?;

    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::validation("full_name must not be empty"));
    }

    let email = email_filter::normalize(&payload.email);
    validate_email(&email)?;
    validate_new_password(&payload.password)?;

    // platform administrators belong to no company
    let company_id = match payload.role {
        Role::SuperAdmin => None,
        _ => Some(auth.target_company(payload.company_id)?),
    };

    if let Some(employee_id) = payload.employee_id {
        ensure_employee_in_company(pool.get_ref(), employee_id, company_id).await?;
    }

    if !is_email_available(&email, pool.get_ref()).await {
        return Err(AppError::conflict("Email already registered"));
    }

    let hashed = hash_password(&payload.password)?;

    let result = sqlx::query(
        r#"
        INSERT INTO users (company_id, employee_id, full_name, email, password, role_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(company_id)
    .bind(payload.employee_id)
    .bind(full_name)
    .bind(&email)
    .bind(hashed)
    .bind(payload.role.id())
    .execute(pool.get_ref())
    .await
    .map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::conflict("Email already registered"),
        other => other,
    })?;

    // keep the fast paths in sync with the table
    email_filter::insert(&email);
    email_cache::mark_taken(&email).await;

    let user_id = result.last_insert_id();
    info!(user_id, role = %payload.role, "User created");

    let mut entry = AuditEntry::by(&auth, AuditAction::Create, AuditEntity::User)
        .entity_id(user_id)
        .details(json!({ "email": email, "role": payload.role }));
    if let Some(company_id) = company_id {
        entry = entry.company(company_id);
    }
    entry.record(pool.get_ref()).await;

    let user = fetch_user(pool.get_ref(), user_id).await?;
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

/// List users
#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(UserQuery),
    responses(
        (status = 200, description = "Paginated user list", body = UserPage),
        (status = 403, description = "Forbidden", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UserQuery>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let paging = PageParams {
        page: query.page,
        per_page: query.per_page,
    };

    let mut filters = WhereBuilder::new();
    filters
        .push_opt("company_id = ?", auth.company_scope(query.company_id)?)
        .push_opt("role_id = ?", query.role.map(|r| u64::from(r.id())))
        .push_opt("is_active = ?", query.is_active)
        .search(&["full_name", "email"], query.search.as_deref());
    let where_clause = filters.clause();

    let count_sql = format!("SELECT COUNT(*) FROM users {}", where_clause);
    debug!(sql = %count_sql, bindings = ?filters.values(), "Counting users");

    let total = sqlx::query_scalar::<_, i64>(&count_sql)
        .bind_values(filters.values())
        .fetch_one(pool.get_ref())
        .await?;

    let data_sql = format!(
        "SELECT {USER_COLUMNS} FROM users {} ORDER BY id DESC LIMIT ? OFFSET ?",
        where_clause
    );

    let users = sqlx::query_as::<_, User>(&data_sql)
        .bind_values(filters.values())
        .bind(paging.limit())
        .bind(paging.offset())
        .fetch_all(pool.get_ref())
        .await?;

    let data = users.into_iter().map(UserResponse::from).collect();
    Ok(HttpResponse::Ok().json(paging.wrap::<UserResponse>(data, total)))
}

/// Get User by ID
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserResponse),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let user = fetch_user(pool.get_ref(), path.into_inner()).await?;
    ensure_user_visible(&auth, &user)?;

    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// Update User
#[utoipa::path(
    put,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    body: web::Json<UpdateUser>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let user_id = path.into_inner();
    let current = fetch_user(pool.get_ref(), user_id).await?;
    ensure_user_visible(&auth, &current)?;

    if let Some(role) = body.role {
        ensure_can_grant(&auth, role)?;
        if (role == Role::SuperAdmin) != current.company_id.is_none() {
            return Err(AppError::validation(
                "Role change would move the user between platform and company scope",
            ));
        }
    }
    if body.is_active == Some(false) && user_id == auth.user_id {
        return Err(AppError::validation("You cannot deactivate your own account"));
    }

    let full_name = match &body.full_name {
        Some(name) if name.trim().is_empty() => {
            return Err(AppError::validation("full_name must not be empty"));
        }
        Some(name) => name.trim().to_string(),
        None => current.full_name.clone(),
    };

    let employee_id = match body.employee_id {
        Some(employee_id) => {
            ensure_employee_in_company(pool.get_ref(), employee_id, current.company_id).await?;
            Some(employee_id)
        }
        None => current.employee_id,
    };

    let role_id = body.role.map(Role::id).unwrap_or(current.role_id);
    let is_active = body.is_active.unwrap_or(current.is_active);

    sqlx::query(
        r#"
        UPDATE users
        SET full_name = ?, role_id = ?, employee_id = ?, is_active = ?
        WHERE id = ?
        "#,
    )
    .bind(&full_name)
    .bind(role_id)
    .bind(employee_id)
    .bind(is_active)
    .bind(user_id)
    .execute(pool.get_ref())
    .await?;

    if !is_active {
        revoke_refresh_tokens(pool.get_ref(), user_id).await?;
    }

    let mut entry = AuditEntry::by(&auth, AuditAction::Update, AuditEntity::User)
        .entity_id(user_id)
        .details(json!({ "role_id": role_id, "is_active": is_active, "employee_id": employee_id }));
    if let Some(company_id) = current.company_id {
        entry = entry.company(company_id);
    }
    entry.record(pool.get_ref()).await;

    let user = fetch_user(pool.get_ref(), user_id).await?;
    Ok(HttpResponse::Ok().json(UserResponse::from(user)))
}

/// Deactivate User
#[utoipa::path(
    delete,
    path = "/api/v1/users/{user_id}",
    params(("user_id" = u64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated", body = MessageResponse),
        (status = 400, description = "Cannot deactivate yourself", body = ErrorBody),
        (status = 403, description = "Forbidden", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "User"
)]
pub async fn deactivate_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(MANAGERS)?;

    let user_id = path.into_inner();
    if user_id == auth.user_id {
        return Err(AppError::validation("You cannot deactivate your own account"));
    }

    let user = fetch_user(pool.get_ref(), user_id).await?;
    ensure_user_visible(&auth, &user)?;

    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = ?")
        .bind(user_id)
        .execute(pool.get_ref())
        .await?;
    revoke_refresh_tokens(pool.get_ref(), user_id).await?;

    let mut entry = AuditEntry::by(&auth, AuditAction::Delete, AuditEntity::User).entity_id(user_id);
    if let Some(company_id) = user.company_id {
        entry = entry.company(company_id);
    }
    entry.record(pool.get_ref()).await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("User deactivated")))
}

/// Deactivated accounts must not be able to refresh their way back in.
async fn revoke_refresh_tokens(pool: &MySqlPool, user_id: u64) -> Result<(), AppError> {
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ? AND revoked = FALSE")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::auth::tests::principal;
    use chrono::Utc;

    fn stored_user(company_id: Option<u64>) -> User {
        User {
            id: 5,
            company_id,
            employee_id: None,
            full_name: "Fatou Sarr".to_string(),
            email: "fatou@example.com".to_string(),
            password: String::new(),
            role_id: Role::Cashier.id(),
            is_active: true,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admins_cannot_grant_super_admin() {
        let admin = principal(Role::Admin, Some(1));
        assert!(ensure_can_grant(&admin, Role::SuperAdmin).is_err());
        assert!(ensure_can_grant(&admin, Role::Cashier).is_ok());

        let root = principal(Role::SuperAdmin, None);
        assert!(ensure_can_grant(&root, Role::SuperAdmin).is_ok());
    }

    #[test]
    fn users_of_other_companies_are_hidden() {
        let admin = principal(Role::Admin, Some(1));
        assert!(ensure_user_visible(&admin, &stored_user(Some(1))).is_ok());
        assert!(ensure_user_visible(&admin, &stored_user(Some(2))).is_err());
        assert!(ensure_user_visible(&admin, &stored_user(None)).is_err());

        let root = principal(Role::SuperAdmin, None);
        assert!(ensure_user_visible(&root, &stored_user(None)).is_ok());
    }

    #[test]
    fn email_shape() {
        assert!(validate_email("awa@example.sn").is_ok());
        assert!(validate_email("awa@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a wa@example.com").is_err());
    }

    #[test]
    fn response_hides_the_password_hash() {
        let json = serde_json::to_value(UserResponse::from(stored_user(Some(1)))).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["role"], "CASHIER");
    }
}
