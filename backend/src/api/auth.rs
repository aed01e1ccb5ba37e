//! Bearer-token authentication and role guards.

use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Captain,
    Restaurant,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "USER",
            Role::Captain => "CAPTAIN",
            Role::Restaurant => "RESTAURANT",
            Role::Admin => "ADMIN",
        })
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "CAPTAIN" => Ok(Role::Captain),
            "RESTAURANT" => Ok(Role::Restaurant),
            "ADMIN" => Ok(Role::Admin),
            other => Err(anyhow::anyhow!("invalid role: {}", other)),
        }
    }
}

/// Token payload. `typ` distinguishes access from refresh tokens; only
/// access tokens authenticate API calls.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub jti: String,
    pub typ: String,
    pub exp: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

/// Extracts and verifies the bearer token from request headers.
pub fn authenticate(headers: &HeaderMap, secret: &str) -> AppResult<AuthContext> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
    verify_token(token, secret)
}

pub fn verify_token(token: &str, secret: &str) -> AppResult<AuthContext> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| AppError::Unauthorized(format!("invalid token: {e}")))?;

    if data.claims.typ != "access" {
        return Err(AppError::Unauthorized("not an access token".into()));
    }

    let user_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| AppError::Unauthorized("invalid subject".into()))?;
    let role = data
        .claims
        .role
        .parse()
        .map_err(|_| AppError::Unauthorized("unknown role".into()))?;

    Ok(AuthContext { user_id, role })
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub fn require_role(ctx: &AuthContext, allowed: &[Role]) -> AppResult<()> {
    if allowed.contains(&ctx.role) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role {} not allowed",
            ctx.role
        )))
    }
}
