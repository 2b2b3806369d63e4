use crate::models::{Claims, TokenType};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error};
use uuid::Uuid;

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

fn build_claims(user_id: u64, email: &str, role: &str, ttl: usize, token_type: TokenType) -> Claims {
    Claims {
        user_id,
        sub: email.to_string(),
        role: role.to_string(),
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
    }
}

pub fn generate_access_token(
    user_id: u64,
    email: &str,
    role: &str,
    secret: &str,
    ttl: usize,
) -> Result<String, Error> {
    let claims = build_claims(user_id, email, role, ttl, TokenType::Access);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

pub fn generate_refresh_token(
    user_id: u64,
    email: &str,
    role: &str,
    secret: &str,
    ttl: usize,
) -> Result<(String, Claims), Error> {
    let claims = build_claims(user_id, email, role, ttl, TokenType::Refresh);

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok((token, claims))
}

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

    #[test]
    fn access_tokens_verify_with_the_same_secret() {
        let token = generate_access_token(7, "jane@company.com", "manager", "s3cret", 900).unwrap();
        let claims = verify_token(&token, "s3cret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "jane@company.com");
        assert_eq!(claims.role, "manager");
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn a_different_secret_is_rejected() {
        let token = generate_access_token(7, "jane@company.com", "hr", "s3cret", 900).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn refresh_tokens_carry_a_fresh_jti() {
        let (token, claims) = generate_refresh_token(1, "a@b.co", "employee", "k", 60).unwrap();
        let (_, other) = generate_refresh_token(1, "a@b.co", "employee", "k", 60).unwrap();
        assert_ne!(claims.jti, other.jti);
        assert_eq!(verify_token(&token, "k").unwrap().token_type, TokenType::Refresh);
    }
}
