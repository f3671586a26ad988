use crate::{
    auth::{
        auth::AuthUser,
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::{hash_password, validate_new_password, verify_password},
    },
    config::Config,
    error::AppError,
    model::{
        audit_log::{AuditAction, AuditEntity},
        role::EVERYONE,
        user::User,
    },
    models::{Claims, LoginReqDto, MessageResponse, TokenPair, TokenType},
    service::audit::AuditEntry,
    utils::email_filter,
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use sqlx::{Executor, MySql, MySqlPool, Transaction};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

#[derive(Deserialize, ToSchema)]
pub struct ChangePasswordReq {
    pub current_password: String,
    pub new_password: String,
}

async fn find_user_by_email(pool: &MySqlPool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, company_id, employee_id, full_name, email, password, role_id, is_active, last_login_at, created_at
        FROM users
        WHERE email = ?
        "#,
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

async fn find_user_by_id<'e, E>(executor: E, user_id: u64) -> Result<Option<User>, AppError>
where
    E: Executor<'e, Database = MySql>,
{
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT id, company_id, employee_id, full_name, email, password, role_id, is_active, last_login_at, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;
    Ok(user)
}

/// Unknown email, disabled account and wrong password all look the same to the caller.
pub fn check_credentials(user: Option<User>, password: &str) -> Result<User, AppError> {
    let Some(user) = user else {
        info!("Invalid credentials: user not found");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    if !user.is_active {
        info!(user_id = user.id, "Invalid credentials: account disabled");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    if let Err(e) = verify_password(password, &user.password) {
        info!(user_id = user.id, error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    Ok(user)
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

async fn store_refresh_token(
    tx: &mut Transaction<'_, MySql>,
    claims: &Claims,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(claims.user_id)
    .bind(&claims.jti)
    .bind(claims.exp as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Login
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Token pair issued", body = TokenPair),
        (status = 400, description = "Email or password missing", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(pool, config, payload),
    fields(email = %payload.email)
)]
pub async fn login(
    payload: web::Json<LoginReqDto>,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    info!("Login request received");

    // 1️⃣ Basic validation
    let email = email_filter::normalize(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        info!("Validation failed: empty email or password");
        return Err(AppError::validation("Email and password are required"));
    }

    // 2️⃣ Fetch user + 3️⃣ verify password
    debug!("Fetching user from database");
    let user = check_credentials(find_user_by_email(pool.get_ref(), &email).await?, &payload.password)?;
    debug!(user_id = user.id, "Password verified");

    // 4️⃣ Generate tokens
    let subject = TokenSubject::from(&user);
    let access_token = generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)?;

    // 5️⃣ Store refresh token
    debug!(user_id = user.id, jti = %refresh_claims.jti, "Storing refresh token");
    let mut tx = pool.begin().await?;
    store_refresh_token(&mut tx, &refresh_claims).await?;
    tx.commit().await?;

    // 6️⃣ Update last_login_at (non-fatal)
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    AuditEntry::new(user.id, user.company_id, AuditAction::Login, AuditEntity::User)
        .entity_id(user.id)
        .record(pool.get_ref())
        .await;

    info!(user_id = user.id, "Login successful");

    Ok(HttpResponse::Ok().json(TokenPair {
        access_token,
        refresh_token,
    }))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Rotated token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or revoked", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
#[instrument(name = "auth_refresh", skip_all)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> Result<HttpResponse, AppError> {
    let token = bearer_token(&req).ok_or_else(|| AppError::unauthorized("Refresh token required"))?;

    let claims = verify_token(token, &config.jwt_secret)
        .map_err(|_| AppError::unauthorized("Invalid or expired token"))?;

    if claims.token_type != TokenType::Refresh {
        return Err(AppError::unauthorized("Refresh token required"));
    }

    let mut tx = pool.begin().await?;

    // 🔍 find refresh token in DB
    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ? FOR UPDATE",
    )
    .bind(&claims.jti)
    .fetch_optional(&mut *tx)
    .await?;

    let record_id = match record {
        Some((id, user_id, false)) if user_id == claims.user_id => id,
        Some((_, _, true)) => {
            warn!(user_id = claims.user_id, jti = %claims.jti, "Revoked refresh token presented");
            return Err(AppError::unauthorized("Refresh token revoked"));
        }
        _ => return Err(AppError::unauthorized("Unknown refresh token")),
    };

    // the account may have been changed or disabled since the token was issued
    let user = find_user_by_id(&mut *tx, claims.user_id)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::unauthorized("Account disabled"))?;

    // 🔥 revoke old refresh token
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ?")
        .bind(record_id)
        .execute(&mut *tx)
        .await?;

    // 🔄 issue new pair
    let subject = TokenSubject::from(&user);
    let (new_refresh_token, new_claims) =
        generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)?;
    store_refresh_token(&mut tx, &new_claims).await?;

    tx.commit().await?;

    let access_token = generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)?;
    debug!(user_id = user.id, "Refresh token rotated");

    Ok(HttpResponse::Ok().json(TokenPair {
        access_token,
        refresh_token: new_refresh_token,
    }))
}

/// Revoke a refresh token
///
/// Always answers 204, whatever the token.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> HttpResponse {
    // only a valid refresh token can be revoked
    let claims = bearer_token(&req)
        .and_then(|token| verify_token(token, &config.jwt_secret).ok())
        .filter(|claims| claims.token_type == TokenType::Refresh);

    if let Some(claims) = claims {
        if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
            .bind(&claims.jti)
            .execute(pool.get_ref())
            .await
        {
            error!(error = %e, "Failed to revoke refresh token");
        }
    }

    HttpResponse::NoContent().finish()
}

/// Current principal
#[utoipa::path(
    get,
    path = "/api/v1/me",
    responses(
        (status = 200, description = "Authenticated principal", body = AuthUser),
        (status = 401, description = "Unauthorized", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;
    Ok(HttpResponse::Ok().json(auth))
}

/// Change own password
#[utoipa::path(
    put,
    path = "/api/v1/me/password",
    request_body = ChangePasswordReq,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "New password too short", body = ErrorBody),
        (status = 401, description = "Current password wrong", body = ErrorBody)
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
#[instrument(name = "auth_change_password", skip_all, fields(user_id = auth.user_id))]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<ChangePasswordReq>,
) -> Result<HttpResponse, AppError> {
    auth.require_any(EVERYONE)?;

    let user = check_credentials(
        find_user_by_id(pool.get_ref(), auth.user_id).await?,
        &payload.current_password,
    )?;

    validate_new_password(&payload.new_password)?;
    if payload.new_password == payload.current_password {
        return Err(AppError::validation(
            "New password must differ from the current one",
        ));
    }

    let hashed = hash_password(&payload.new_password)?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    // sessions opened with the old password end here
    sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = ? AND revoked = FALSE")
        .bind(user.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!("Password changed");

    AuditEntry::by(&auth, AuditAction::Update, AuditEntity::User)
        .entity_id(user.id)
        .details(serde_json::json!({ "field": "password" }))
        .record(pool.get_ref())
        .await;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::role::Role;
    use chrono::Utc;

    fn stored_user(password: &str, is_active: bool) -> User {
        User {
            id: 11,
            company_id: Some(1),
            employee_id: None,
            full_name: "Ibrahima Fall".to_string(),
            email: "ibrahima@example.com".to_string(),
            password: hash_password(password).unwrap(),
            role_id: Role::Cashier.id(),
            is_active,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn correct_password_logs_in() {
        let user = check_credentials(Some(stored_user("s3cret-pass", true)), "s3cret-pass").unwrap();
        assert_eq!(user.id, 11);
    }

    #[test]
    fn wrong_password_is_unauthorized() {
        let err = check_credentials(Some(stored_user("s3cret-pass", true)), "guess").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == INVALID_CREDENTIALS));
    }

    #[test]
    fn unknown_email_is_unauthorized() {
        let err = check_credentials(None, "whatever").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == INVALID_CREDENTIALS));
    }

    #[test]
    fn disabled_account_is_unauthorized() {
        let err = check_credentials(Some(stored_user("s3cret-pass", false)), "s3cret-pass").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == INVALID_CREDENTIALS));
    }

    #[test]
    fn bearer_token_extraction() {
        let req = actix_web::test::TestRequest::default()
            .insert_header(("Authorization", "Bearer abc.def"))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("abc.def"));

        let req = actix_web::test::TestRequest::default()
            .insert_header(("Authorization", "Token abc"))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);
    }

    // Refresh reloads the account on the connection that holds the token row lock.
    async fn reload_under_lock(tx: &mut Transaction<'_, MySql>, user_id: u64) -> Result<Option<User>, AppError> {
        find_user_by_id(&mut **tx, user_id).await
    }

    #[test]
    fn account_reload_joins_the_refresh_transaction() {
        let _reload = reload_under_lock;
    }
}
