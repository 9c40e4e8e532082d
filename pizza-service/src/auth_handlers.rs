use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, Json};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use common_http_errors::{ApiError, ApiResult};
use common_security::Role;

use crate::app::{db_error, is_unique_violation, AppState};
use crate::session::CurrentUser;
use crate::tokens::TokenSubject;
use crate::user_handlers::{load_user, User, UserRole};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (name, email, password) = match (request.name, request.email, request.password) {
        (Some(name), Some(email), Some(password))
            if !name.trim().is_empty() && !email.trim().is_empty() && !password.is_empty() =>
        {
            (name, email, password)
        }
        _ => {
            return Err(ApiError::bad_request(
                "name, email, and password are required",
            ))
        }
    };

    let password_hash = hash_password(&password)?;
    let user_id = Uuid::new_v4();

    let mut tx = state.db.begin().await.map_err(db_error)?;

    sqlx::query("INSERT INTO users (id, name, email, password_hash) VALUES ($1, $2, $3, $4)")
        .bind(user_id)
        .bind(&name)
        .bind(&email)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::conflict("user already exists")
            } else {
                db_error(err)
            }
        })?;

    // Everyone starts as a diner.
    sqlx::query("INSERT INTO user_roles (user_id, role, object_id) VALUES ($1, $2, NULL)")
        .bind(user_id)
        .bind(Role::Diner.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit().await.map_err(db_error)?;

    let user = User {
        id: user_id,
        name,
        email,
        roles: vec![UserRole {
            role: Role::Diner,
            object_id: None,
        }],
    };

    let issued = state
        .token_signer
        .issue(&TokenSubject {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            roles: user.role_names(),
        })
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        user,
        token: issued.token,
    }))
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: Uuid,
    password_hash: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let row = sqlx::query_as::<_, CredentialRow>(
        "SELECT id, password_hash FROM users WHERE email = $1",
    )
    .bind(&request.email)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?;

    // Unknown account and bad password fail identically.
    let Some(row) = row else {
        return Err(ApiError::Unauthorized);
    };

    let parsed = PasswordHash::new(&row.password_hash).map_err(|err| {
        warn!(user_id = %row.id, error = %err, "stored password hash is unreadable");
        ApiError::Unauthorized
    })?;
    if Argon2::default()
        .verify_password(request.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(ApiError::Unauthorized);
    }

    let user = load_user(&state.db, row.id)
        .await
        .map_err(db_error)?
        .ok_or(ApiError::Unauthorized)?;

    let issued = state
        .token_signer
        .issue(&TokenSubject {
            user_id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            roles: user.role_names(),
        })
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(AuthResponse {
        user,
        token: issued.token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
) -> ApiResult<Json<MessageResponse>> {
    state
        .token_signer
        .revoke(&current.token)
        .await
        .map_err(db_error)?;
    Ok(Json(MessageResponse {
        message: "logout successful",
    }))
}

pub(crate) fn hash_password(password: &str) -> Result<String, ApiError> {
    if password.trim().is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::internal(format!("failed to hash password: {err}")))
}
