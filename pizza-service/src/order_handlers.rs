use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Query, State},
    Json,
};
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use common_http_errors::{ApiError, ApiResult};
use common_security::{authorize, Action, Decision, Relationship};

use crate::app::{db_error, AppState};
use crate::factory::{FactoryDiner, FactoryError, FactoryItem, FactoryOrder, FulfillmentRequest};
use crate::session::CurrentUser;

pub(crate) const ORDERS_PER_PAGE: i64 = 10;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MenuItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub image: String,
    pub price: BigDecimal,
}

async fn fetch_menu(pool: &PgPool) -> Result<Vec<MenuItem>, sqlx::Error> {
    sqlx::query_as::<_, MenuItem>(
        "SELECT id, title, description, image, price FROM menu_items ORDER BY seq",
    )
    .fetch_all(pool)
    .await
}

pub async fn get_menu(State(state): State<AppState>) -> ApiResult<Json<Vec<MenuItem>>> {
    let menu = fetch_menu(&state.db).await.map_err(db_error)?;
    Ok(Json(menu))
}

#[derive(Debug, Deserialize)]
pub struct AddMenuItemRequest {
    pub title: String,
    pub description: String,
    pub image: String,
    pub price: BigDecimal,
}

pub async fn add_menu_item(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<AddMenuItemRequest>,
) -> ApiResult<Json<Vec<MenuItem>>> {
    if authorize(&current.actor, Action::AddMenuItem, Relationship::None) != Decision::Granted {
        return Err(ApiError::forbidden("unable to add menu item"));
    }
    if request.title.trim().is_empty() {
        return Err(ApiError::bad_request("menu item title is required"));
    }
    if request.price <= BigDecimal::zero() {
        return Err(ApiError::bad_request("price must be a positive amount"));
    }

    sqlx::query(
        "INSERT INTO menu_items (id, title, description, image, price) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.image)
    .bind(&request.price)
    .execute(&state.db)
    .await
    .map_err(db_error)?;

    let menu = fetch_menu(&state.db).await.map_err(db_error)?;
    Ok(Json(menu))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub menu_id: Uuid,
    pub description: String,
    pub price: BigDecimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub franchise_id: Uuid,
    pub store_id: Uuid,
    pub date: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderRequest {
    pub franchise_id: Uuid,
    pub store_id: Uuid,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Serialize)]
pub struct OrderPlacedResponse {
    pub order: Order,
    pub jwt: String,
    #[serde(
        rename = "followLinkToEndChaos",
        skip_serializing_if = "Option::is_none"
    )]
    pub follow_link_to_end_chaos: Option<String>,
}

pub async fn create_order(
    State(state): State<AppState>,
    current: CurrentUser,
    Json(request): Json<NewOrderRequest>,
) -> ApiResult<Json<OrderPlacedResponse>> {
    if authorize(&current.actor, Action::PlaceOrder, Relationship::None) != Decision::Granted {
        return Err(ApiError::forbidden("unauthorized"));
    }
    if request.items.is_empty() {
        return Err(ApiError::bad_request("order requires at least one item"));
    }

    let (store_ok,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM stores WHERE id = $1 AND franchise_id = $2)",
    )
    .bind(request.store_id)
    .bind(request.franchise_id)
    .fetch_one(&state.db)
    .await
    .map_err(db_error)?;
    if !store_ok {
        return Err(ApiError::not_found("store not found"));
    }

    let menu_ids: Vec<Uuid> = request.items.iter().map(|item| item.menu_id).collect();
    let known: HashSet<Uuid> = sqlx::query_as::<_, (Uuid,)>(
        "SELECT id FROM menu_items WHERE id = ANY($1)",
    )
    .bind(&menu_ids)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?
    .into_iter()
    .map(|(id,)| id)
    .collect();
    if let Some(missing) = menu_ids.iter().find(|id| !known.contains(id)) {
        return Err(ApiError::bad_request(format!("unknown menu item {missing}")));
    }

    let order_id = Uuid::new_v4();
    let fulfillment = FulfillmentRequest {
        diner: FactoryDiner {
            id: current.user.id,
            name: current.user.name.clone(),
            email: current.user.email.clone(),
        },
        order: FactoryOrder {
            id: order_id,
            franchise_id: request.franchise_id,
            store_id: request.store_id,
            items: request
                .items
                .iter()
                .map(|item| FactoryItem {
                    menu_id: item.menu_id,
                    description: item.description.clone(),
                    price: item.price.clone(),
                })
                .collect(),
        },
    };

    let receipt = match state.factory.fulfill(&fulfillment).await {
        Ok(receipt) => receipt,
        Err(FactoryError::Rejected { report_url }) => {
            return Err(ApiError::Fulfillment { report_url });
        }
        Err(FactoryError::Unreachable(reason)) => {
            warn!(order_id = %order_id, reason = %reason, "factory call failed");
            return Err(ApiError::Fulfillment { report_url: None });
        }
    };

    // The factory accepted; only now does the order exist anywhere.
    let mut tx = state.db.begin().await.map_err(db_error)?;
    let (created_at,): (DateTime<Utc>,) = sqlx::query_as(
        "INSERT INTO orders (id, diner_id, franchise_id, store_id) VALUES ($1, $2, $3, $4) RETURNING created_at",
    )
    .bind(order_id)
    .bind(current.user.id)
    .bind(request.franchise_id)
    .bind(request.store_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(db_error)?;

    for (position, item) in request.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, menu_id, description, price, position) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(item.menu_id)
        .bind(&item.description)
        .bind(&item.price)
        .bind(position as i32)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    }

    tx.commit().await.map_err(db_error)?;

    Ok(Json(OrderPlacedResponse {
        order: Order {
            id: order_id,
            franchise_id: request.franchise_id,
            store_id: request.store_id,
            date: created_at,
            items: request.items,
        },
        jwt: receipt.jwt,
        follow_link_to_end_chaos: receipt.report_url,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub page: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResponse {
    pub diner_id: Uuid,
    pub orders: Vec<Order>,
    pub page: i64,
}

pub async fn list_orders(
    State(state): State<AppState>,
    current: CurrentUser,
    Query(query): Query<ListOrdersQuery>,
) -> ApiResult<Json<OrderListResponse>> {
    if authorize(&current.actor, Action::ListOrders, Relationship::None) != Decision::Granted {
        return Err(ApiError::forbidden("unauthorized"));
    }

    let page = query.page.unwrap_or(0).max(0);

    #[derive(sqlx::FromRow)]
    struct OrderRow {
        id: Uuid,
        franchise_id: Uuid,
        store_id: Uuid,
        created_at: DateTime<Utc>,
    }

    let rows = sqlx::query_as::<_, OrderRow>(
        "SELECT id, franchise_id, store_id, created_at FROM orders WHERE diner_id = $1 ORDER BY created_at, id LIMIT $2 OFFSET $3",
    )
    .bind(current.user.id)
    .bind(ORDERS_PER_PAGE)
    .bind(page * ORDERS_PER_PAGE)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    #[derive(sqlx::FromRow)]
    struct ItemRow {
        order_id: Uuid,
        menu_id: Uuid,
        description: String,
        price: BigDecimal,
    }

    let order_ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
    let item_rows = sqlx::query_as::<_, ItemRow>(
        "SELECT order_id, menu_id, description, price FROM order_items WHERE order_id = ANY($1) ORDER BY order_id, position",
    )
    .bind(&order_ids)
    .fetch_all(&state.db)
    .await
    .map_err(db_error)?;

    let mut grouped: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    for row in item_rows {
        grouped.entry(row.order_id).or_default().push(OrderItem {
            menu_id: row.menu_id,
            description: row.description,
            price: row.price,
        });
    }

    let orders = rows
        .into_iter()
        .map(|row| Order {
            items: grouped.remove(&row.id).unwrap_or_default(),
            id: row.id,
            franchise_id: row.franchise_id,
            store_id: row.store_id,
            date: row.created_at,
        })
        .collect();

    Ok(Json(OrderListResponse {
        diner_id: current.user.id,
        orders,
        page,
    }))
}
