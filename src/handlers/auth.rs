// src/handlers/auth.rs
use crate::models::auth::*;
use crate::AppState;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post, Router},
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde_json::json;
use sqlx::{FromRow, Row};
use std::sync::Arc;

pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/verify", get(verify_token))
}

/// Registration creates the tenant (escritório) and its first user in one
/// transaction.
async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Validate input
    if payload.email.is_empty() || payload.nome.is_empty() || payload.password.is_empty() {
        return Err(bad_request("E-mail, nome e senha são obrigatórios"));
    }
    if payload.nome_escritorio.trim().is_empty() {
        return Err(bad_request("O nome do escritório é obrigatório"));
    }
    if payload.password.len() < 6 {
        return Err(bad_request("A senha precisa de pelo menos 6 caracteres"));
    }

    // Check if user already exists
    let existing_user = sqlx::query("SELECT id FROM users WHERE email = $1")
        .bind(&payload.email)
        .fetch_optional(&state.db_pool)
        .await;

    match existing_user {
        Ok(Some(_)) => {
            return Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    success: false,
                    message: "Já existe um usuário com este e-mail".to_string(),
                }),
            ));
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Database error checking existing user: {}", e);
            return Err(internal_error());
        }
    }

    // Hash the password
    let password_hash = match hash(&payload.password, DEFAULT_COST) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!("Error hashing password: {}", e);
            return Err(internal_error());
        }
    };

    let mut tx = match state.db_pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::error!("Error opening transaction: {}", e);
            return Err(internal_error());
        }
    };

    let escritorio_id: i32 = match sqlx::query(
        "INSERT INTO escritorios (nome, created_at, updated_at) VALUES ($1, NOW(), NOW()) RETURNING id",
    )
    .bind(payload.nome_escritorio.trim())
    .fetch_one(&mut *tx)
    .await
    {
        Ok(row) => row.get(0),
        Err(e) => {
            tracing::error!("Error creating escritorio: {}", e);
            return Err(internal_error());
        }
    };

    let user_row = sqlx::query(
        "INSERT INTO users (escritorio_id, email, nome, password_hash, is_active, is_superuser, created_at, updated_at)
         VALUES ($1, $2, $3, $4, true, false, NOW(), NOW())
         RETURNING id, escritorio_id, email, nome, password_hash, is_active, is_superuser, created_at, updated_at",
    )
    .bind(escritorio_id)
    .bind(&payload.email)
    .bind(&payload.nome)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await;

    let user = match user_row {
        Ok(row) => match User::from_row(&row) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error converting row to User: {}", e);
                return Err(internal_error());
            }
        },
        Err(e) => {
            tracing::error!("Error inserting user: {}", e);
            return Err(internal_error());
        }
    };

    if let Err(e) = tx.commit().await {
        tracing::error!("Error committing registration: {}", e);
        return Err(internal_error());
    }

    let token = generate_jwt_token(&user)?;
    tracing::info!("👤 Registered user {} for escritorio {}", user.email, escritorio_id);

    Ok(Json(AuthResponse {
        success: true,
        token,
        user: user_response(user),
    }))
}

async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, (StatusCode, Json<ErrorResponse>)> {
    let user_row = sqlx::query(
        "SELECT id, escritorio_id, email, nome, password_hash, is_active, is_superuser, created_at, updated_at
         FROM users WHERE email = $1 AND is_active = true",
    )
    .bind(&payload.email)
    .fetch_optional(&state.db_pool)
    .await;

    let user = match user_row {
        Ok(Some(row)) => match User::from_row(&row) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Error converting row to User: {}", e);
                return Err(internal_error());
            }
        },
        Ok(None) => return Err(invalid_credentials()),
        Err(e) => {
            tracing::error!("Database error during login: {}", e);
            return Err(internal_error());
        }
    };

    match verify(&payload.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return Err(invalid_credentials()),
        Err(e) => {
            tracing::error!("Error verifying password: {}", e);
            return Err(internal_error());
        }
    }

    let token = generate_jwt_token(&user)?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user: user_response(user),
    }))
}

async fn verify_token(
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = match token {
        Some(token) => token,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    success: false,
                    message: "Missing or malformed Authorization header".to_string(),
                }),
            ));
        }
    };

    match verify_jwt_token(token) {
        Ok(claims) => Ok(Json(json!({
            "success": true,
            "user_id": claims.sub,
            "escritorio_id": claims.escritorio_id,
            "email": claims.email,
        }))),
        Err(_) => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                success: false,
                message: "Invalid or expired token".to_string(),
            }),
        )),
    }
}

fn generate_jwt_token(user: &User) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());

    let claims = Claims {
        sub: user.id,
        escritorio_id: user.escritorio_id,
        email: user.email.clone(),
        exp: (Utc::now() + Duration::days(7)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Error generating JWT: {}", e);
        internal_error()
    })
}

pub fn verify_jwt_token(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "default_secret".to_string());
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn user_response(user: User) -> UserResponse {
    UserResponse {
        id: user.id,
        escritorio_id: user.escritorio_id,
        email: user.email,
        nome: user.nome,
        is_active: user.is_active,
        created_at: user.created_at,
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            success: false,
            message: message.to_string(),
        }),
    )
}

fn invalid_credentials() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            success: false,
            message: "E-mail ou senha inválidos".to_string(),
        }),
    )
}

fn internal_error() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            success: false,
            message: "Internal server error".to_string(),
        }),
    )
}
