use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use common_http_errors::{ApiError, ApiResult};
use common_security::{authorize, Action, Decision, Relationship, Role};

use crate::app::{db_error, is_unique_violation, AppState};
use crate::auth_handlers::hash_password;
use crate::session::CurrentUser;
use crate::tokens::TokenSubject;

pub(crate) const DEFAULT_PAGE_SIZE: i64 = 10;
pub(crate) const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<UserRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRole {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<Uuid>,
}

impl User {
    pub fn role_names(&self) -> Vec<String> {
        self.roles
            .iter()
            .map(|entry| entry.role.as_str().to_string())
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
}

pub(crate) async fn load_user(pool: &PgPool, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
    let Some(row) = sqlx::query_as::<_, UserRow>("SELECT id, name, email FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let mut roles = load_roles(pool, &[user_id]).await?;
    Ok(Some(User {
        id: row.id,
        name: row.name,
        email: row.email,
        roles: roles.remove(&user_id).unwrap_or_default(),
    }))
}

pub(crate) async fn load_roles(
    pool: &PgPool,
    user_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<UserRole>>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct RoleRow {
        user_id: Uuid,
        role: String,
        object_id: Option<Uuid>,
    }

    let rows = sqlx::query_as::<_, RoleRow>(
        "SELECT user_id, role, object_id FROM user_roles WHERE user_id = ANY($1) ORDER BY role, object_id",
    )
    .bind(user_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<UserRole>> = HashMap::new();
    for row in rows {
        grouped.entry(row.user_id).or_default().push(UserRole {
            role: Role::parse(&row.role),
            object_id: row.object_id,
        });
    }
    Ok(grouped)
}

/// Expands the `*` wildcard and wraps the filter for substring matching.
pub(crate) fn name_pattern(filter: Option<&str>) -> String {
    let raw = filter.unwrap_or("*").trim();
    let raw = if raw.is_empty() { "*" } else { raw };
    format!("%{}%", raw.replace('*', "%"))
}

pub async fn me(current: CurrentUser) -> Json<User> {
    Json(current.user)
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct UserListResponse {
    pub users: Vec<User>,
    pub more: bool,
}

pub async fn list_users(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> ApiResult<Json<UserListResponse>> {
    if authorize(&current.actor, Action::ListUsers, Relationship::None) != Decision::Granted {
        return Err(ApiError::forbidden("unauthorized"));
    }

    let page = query.page.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let pattern = name_pattern(query.name.as_deref());

    // Fetch one row beyond the page to learn whether another page exists.
    let mut rows = sqlx::query_as::<_, UserRow>(
        "SELECT id, name, email FROM users WHERE name ILIKE $1 ORDER BY created_at, id LIMIT $2 OFFSET $3",
    )
    .bind(&pattern)
    .bind(limit + 1)
    .bind(page * limit)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);

    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let mut roles = load_roles(&state.db, &ids).await.map_err(db_error)?;
    let users = rows
        .into_iter()
        .map(|row| User {
            roles: roles.remove(&row.id).unwrap_or_default(),
            id: row.id,
            name: row.name,
            email: row.email,
        })
        .collect();

    Ok(Json(UserListResponse { users, more }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct UserTokenResponse {
    pub user: User,
    pub token: String,
}

pub async fn update_user(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<Uuid>,
    Json(update): Json<UpdateUserRequest>,
) -> ApiResult<Json<UserTokenResponse>> {
    let relationship = if current.user.id == user_id {
        Relationship::SelfUser
    } else {
        Relationship::None
    };
    if authorize(&current.actor, Action::UpdateUser, relationship) != Decision::Granted {
        return Err(ApiError::forbidden("unauthorized"));
    }

    let existing = load_user(&state.db, user_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("unknown user"))?;

    let name = match update.name {
        Some(value) if !value.trim().is_empty() => value,
        _ => existing.name.clone(),
    };
    let email = match update.email {
        Some(value) if !value.trim().is_empty() => value,
        _ => existing.email.clone(),
    };
    let password_hash = match update.password {
        Some(value) if !value.trim().is_empty() => Some(hash_password(&value)?),
        _ => None,
    };

    sqlx::query(
        "UPDATE users SET name = $1, email = $2, password_hash = COALESCE($3, password_hash) WHERE id = $4",
    )
    .bind(&name)
    .bind(&email)
    .bind(password_hash.as_deref())
    .bind(user_id)
    .execute(&state.db)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::conflict("user already exists")
        } else {
            db_error(err)
        }
    })?;

    // Claims changed, so every previously issued token dies here and the
    // caller gets a fresh one for the updated record.
    state
        .token_signer
        .revoke_all_for(user_id)
        .await
        .map_err(db_error)?;

    let user = load_user(&state.db, user_id)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::internal("user disappeared during update"))?;

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

    Ok(Json(UserTokenResponse {
        user,
        token: issued.token,
    }))
}
