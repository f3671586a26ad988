use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::role::Role;

/// Stored user row, password hash included; never serialized.
#[derive(Debug, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub company_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub role_id: u8,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: u64,
    pub company_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub full_name: String,
    pub email: String,
    pub role: Option<Role>,
    pub is_active: bool,
    #[schema(value_type = Option<String>)]
    pub last_login_at: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            company_id: user.company_id,
            employee_id: user.employee_id,
            full_name: user.full_name,
            email: user.email,
            role: Role::from_id(user.role_id),
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}
