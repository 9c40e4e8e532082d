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
use crate::auth_handlers::MessageResponse;
use crate::session::CurrentUser;
use crate::user_handlers::{name_pattern, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FranchiseAdmin {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Store {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct Franchise {
    pub id: Uuid,
    pub name: String,
    /// Admin identities are embedded only for callers allowed to see them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admins: Option<Vec<FranchiseAdmin>>,
    pub stores: Vec<Store>,
}

#[derive(sqlx::FromRow)]
struct FranchiseRow {
    id: Uuid,
    name: String,
}

async fn load_stores(
    pool: &PgPool,
    franchise_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Store>>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct StoreRow {
        id: Uuid,
        franchise_id: Uuid,
        name: String,
    }

    let rows = sqlx::query_as::<_, StoreRow>(
        "SELECT id, franchise_id, name FROM stores WHERE franchise_id = ANY($1) ORDER BY created_at, id",
    )
    .bind(franchise_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<Store>> = HashMap::new();
    for row in rows {
        grouped.entry(row.franchise_id).or_default().push(Store {
            id: row.id,
            name: row.name,
        });
    }
    Ok(grouped)
}

async fn load_admins(
    pool: &PgPool,
    franchise_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<FranchiseAdmin>>, sqlx::Error> {
    #[derive(sqlx::FromRow)]
    struct AdminRow {
        franchise_id: Uuid,
        id: Uuid,
        name: String,
        email: String,
    }

    let rows = sqlx::query_as::<_, AdminRow>(
        "SELECT fa.franchise_id, u.id, u.name, u.email
         FROM franchise_admins fa
         JOIN users u ON u.id = fa.user_id
         WHERE fa.franchise_id = ANY($1)
         ORDER BY fa.franchise_id, fa.position",
    )
    .bind(franchise_ids)
    .fetch_all(pool)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<FranchiseAdmin>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.franchise_id)
            .or_default()
            .push(FranchiseAdmin {
                id: row.id,
                name: row.name,
                email: row.email,
            });
    }
    Ok(grouped)
}

async fn assemble_franchises(
    pool: &PgPool,
    rows: Vec<FranchiseRow>,
    include_admins: bool,
) -> Result<Vec<Franchise>, sqlx::Error> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let mut stores = load_stores(pool, &ids).await?;
    let mut admins = if include_admins {
        Some(load_admins(pool, &ids).await?)
    } else {
        None
    };

    Ok(rows
        .into_iter()
        .map(|row| Franchise {
            stores: stores.remove(&row.id).unwrap_or_default(),
            admins: admins
                .as_mut()
                .map(|map| map.remove(&row.id).unwrap_or_default()),
            id: row.id,
            name: row.name,
        })
        .collect())
}

async fn is_franchise_operator(
    pool: &PgPool,
    franchise_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let (operator,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM franchise_admins WHERE franchise_id = $1 AND user_id = $2)",
    )
    .bind(franchise_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(operator)
}

#[derive(Debug, Deserialize)]
pub struct ListFranchisesQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct FranchiseListResponse {
    pub franchises: Vec<Franchise>,
    pub more: bool,
}

pub async fn list_franchises(
    State(state): State<AppState>,
    caller: Option<CurrentUser>,
    Query(query): Query<ListFranchisesQuery>,
) -> ApiResult<Json<FranchiseListResponse>> {
    let include_admins = caller
        .as_ref()
        .map(|current| current.actor.is_admin())
        .unwrap_or(false);

    let page = query.page.unwrap_or(0).max(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let pattern = name_pattern(query.name.as_deref());

    let mut rows = sqlx::query_as::<_, FranchiseRow>(
        "SELECT id, name FROM franchises WHERE name ILIKE $1 ORDER BY created_at, id LIMIT $2 OFFSET $3",
    )
    .bind(&pattern)
    .bind(limit + 1)
    .bind(page * limit)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let more = rows.len() as i64 > limit;
    rows.truncate(limit as usize);

    let franchises = assemble_franchises(&state.db, rows, include_admins)
        .await
        .map_err(db_error)?;

    Ok(Json(FranchiseListResponse { franchises, more }))
}

#[derive(Debug, Deserialize)]
pub struct AdminRef {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFranchiseRequest {
    pub name: String,
    #[serde(default)]
    pub admins: Vec<AdminRef>,
}

pub async fn create_franchise(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<CreateFranchiseRequest>,
) -> ApiResult<Json<Franchise>> {
    if authorize(&current.actor, Action::CreateFranchise, Relationship::None) != Decision::Granted
    {
        return Err(ApiError::forbidden("unable to create a franchise"));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::bad_request("franchise name is required"));
    }

    let franchise_id = Uuid::new_v4();
    let mut tx = state.db.begin().await.map_err(db_error)?;

    sqlx::query("INSERT INTO franchises (id, name) VALUES ($1, $2)")
        .bind(franchise_id)
        .bind(&request.name)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ApiError::conflict("a franchise with that name already exists")
            } else {
                db_error(err)
            }
        })?;

    // Resolve every admin email before anything is visible; one unknown
    // email aborts the whole creation.
    let mut admins = Vec::with_capacity(request.admins.len());
    for (position, admin) in request.admins.iter().enumerate() {
        let row = sqlx::query_as::<_, FranchiseAdmin>(
            "SELECT id, name, email FROM users WHERE email = $1",
        )
        .bind(&admin.email)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(user) = row else {
            return Err(ApiError::not_found(format!(
                "unknown user for franchise admin {}",
                admin.email
            )));
        };

        if admins.iter().any(|existing: &FranchiseAdmin| existing.id == user.id) {
            continue;
        }

        sqlx::query(
            "INSERT INTO franchise_admins (franchise_id, user_id, position) VALUES ($1, $2, $3)",
        )
        .bind(franchise_id)
        .bind(user.id)
        .bind(position as i32)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query("INSERT INTO user_roles (user_id, role, object_id) VALUES ($1, $2, $3)")
            .bind(user.id)
            .bind(Role::Franchisee.as_str())
            .bind(franchise_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        admins.push(user);
    }

    tx.commit().await.map_err(db_error)?;

    Ok(Json(Franchise {
        id: franchise_id,
        name: request.name,
        admins: Some(admins),
        stores: Vec::new(),
    }))
}

pub async fn list_user_franchises(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Franchise>>> {
    let relationship = if current.user.id == user_id {
        Relationship::SelfUser
    } else {
        Relationship::None
    };

    match authorize(&current.actor, Action::ListUserFranchises, relationship) {
        Decision::Granted => {}
        // Visibility mismatch answers with an empty set, not a denial.
        Decision::Masked => return Ok(Json(Vec::new())),
        Decision::Denied => return Err(ApiError::forbidden("unauthorized")),
    }

    let rows = sqlx::query_as::<_, FranchiseRow>(
        "SELECT f.id, f.name
         FROM franchises f
         JOIN franchise_admins fa ON fa.franchise_id = f.id
         WHERE fa.user_id = $1
         ORDER BY f.created_at, f.id",
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let franchises = assemble_franchises(&state.db, rows, true)
        .await
        .map_err(db_error)?;
    Ok(Json(franchises))
}

pub async fn delete_franchise(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(franchise_id): Path<Uuid>,
) -> ApiResult<Json<MessageResponse>> {
    if authorize(&current.actor, Action::DeleteFranchise, Relationship::None) != Decision::Granted
    {
        return Err(ApiError::forbidden("unable to delete a franchise"));
    }

    let mut tx = state.db.begin().await.map_err(db_error)?;

    sqlx::query("DELETE FROM user_roles WHERE role = $1 AND object_id = $2")
        .bind(Role::Franchisee.as_str())
        .bind(franchise_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

    let result = sqlx::query("DELETE FROM franchises WHERE id = $1")
        .bind(franchise_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("franchise not found"));
    }

    tx.commit().await.map_err(db_error)?;

    Ok(Json(MessageResponse {
        message: "franchise deleted",
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStoreRequest {
    pub name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCreated {
    pub id: Uuid,
    pub franchise_id: Uuid,
    pub name: String,
}

pub async fn create_store(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(franchise_id): Path<Uuid>,
    Json(request): Json<CreateStoreRequest>,
) -> ApiResult<Json<StoreCreated>> {
    let relationship = if is_franchise_operator(&state.db, franchise_id, current.user.id)
        .await
        .map_err(db_error)?
    {
        Relationship::FranchiseOperator
    } else {
        Relationship::None
    };
    if authorize(&current.actor, Action::CreateStore, relationship) != Decision::Granted {
        return Err(ApiError::forbidden("unable to create a store"));
    }

    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM franchises WHERE id = $1)")
            .bind(franchise_id)
            .fetch_one(&state.db)
            .await
            .map_err(db_error)?;
    if !exists {
        return Err(ApiError::not_found("franchise not found"));
    }

    let store_id = Uuid::new_v4();
    sqlx::query("INSERT INTO stores (id, franchise_id, name) VALUES ($1, $2, $3)")
        .bind(store_id)
        .bind(franchise_id)
        .bind(&request.name)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    Ok(Json(StoreCreated {
        id: store_id,
        franchise_id,
        name: request.name,
    }))
}

pub async fn delete_store(
    State(state): State<AppState>,
    current: CurrentUser,
    Path((franchise_id, store_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<MessageResponse>> {
    let relationship = if is_franchise_operator(&state.db, franchise_id, current.user.id)
        .await
        .map_err(db_error)?
    {
        Relationship::FranchiseOperator
    } else {
        Relationship::None
    };
    if authorize(&current.actor, Action::DeleteStore, relationship) != Decision::Granted {
        return Err(ApiError::forbidden("unable to delete a store"));
    }

    // Scoped to the franchise in the path; a store id under some other
    // franchise is not found, never silently removed.
    let result = sqlx::query("DELETE FROM stores WHERE id = $1 AND franchise_id = $2")
        .bind(store_id)
        .bind(franchise_id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("store not found"));
    }

    Ok(Json(MessageResponse {
        message: "store deleted",
    }))
}
