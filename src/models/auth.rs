// src/models/auth.rs
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i32,
    pub escritorio_id: i32,
    pub email: String,
    pub nome: String,
    pub password_hash: String,
    pub is_active: bool,
    pub is_superuser: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i32,
    pub escritorio_id: i32,
    pub email: String,
    pub nome: String,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// JWT payload: user plus the tenant every store call is scoped by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub escritorio_id: i32,
    pub email: String,
    pub exp: usize,
}

/// The tenant/user pair threaded through every pipeline call. Built from the
/// verified JWT, never from request data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub user_id: i32,
    pub escritorio_id: i32,
}

impl From<&Claims> for TenantContext {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.sub,
            escritorio_id: claims.escritorio_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub nome: String,
    pub password: String,
    pub nome_escritorio: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}
