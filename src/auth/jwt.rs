use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::{
    error::AppError,
    model::user::User,
    models::{Claims, TokenType},
};

/// Identity carried inside both token kinds.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub email: String,
    pub role: u8,
    pub company_id: Option<u64>,
    pub employee_id: Option<u64>,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role_id,
            company_id: user.company_id,
            employee_id: user.employee_id,
        }
    }
}

impl From<&Claims> for TokenSubject {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.sub.clone(),
            role: claims.role,
            company_id: claims.company_id,
            employee_id: claims.employee_id,
        }
    }
}

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn build_claims(subject: &TokenSubject, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: subject.user_id,
        sub: subject.email.clone(),
        role: subject.role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        company_id: subject.company_id,
        employee_id: subject.employee_id,
    }
}

pub fn encode_claims(claims: &Claims, secret: &str) -> Result<String, AppError> {
    Ok(encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn generate_access_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<String, AppError> {
    encode_claims(&build_claims(subject, TokenType::Access, ttl), secret)
}

pub fn generate_refresh_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), AppError> {
    let claims = build_claims(subject, TokenType::Refresh, ttl);
    let token = encode_claims(&claims, secret)?;

    Ok((token, claims))
}

/// Checks signature and expiry; the token type is left to the caller.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 7,
            email: "cashier@example.com".to_string(),
            role: 3,
            company_id: Some(1),
            employee_id: None,
        }
    }

    #[test]
    fn access_token_round_trips_the_subject() {
        let token = generate_access_token(&subject(), SECRET, 900).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();

        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "cashier@example.com");
        assert_eq!(claims.company_id, Some(1));
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_token_carries_its_jti() {
        let (token, claims) = generate_refresh_token(&subject(), SECRET, 3600).unwrap();
        let decoded = verify_token(&token, SECRET).unwrap();

        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.token_type, TokenType::Refresh);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), SECRET, 900).unwrap();
        assert!(verify_token(&token, "another-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut claims = build_claims(&subject(), TokenType::Refresh, 0);
        // beyond the default 60s leeway
        claims.exp = now() - 3600;
        let token = encode_claims(&claims, SECRET).unwrap();

        assert!(verify_token(&token, SECRET).is_err());
    }

    #[test]
    fn every_token_gets_a_fresh_jti() {
        let (_, a) = generate_refresh_token(&subject(), SECRET, 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(), SECRET, 60).unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
