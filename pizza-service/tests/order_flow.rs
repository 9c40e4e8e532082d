mod support;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use uuid::Uuid;

use pizza_service::factory::StubFactory;
use support::{build_app, login_admin, register_diner, request, Session, TestDatabase};

fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Admin builds a franchise (owned by `owner`), one store, and one menu
/// item; returns (franchiseId, storeId, menuId).
async fn setup_storefront(
    app: &Router,
    admin: &Session,
    owner: &Session,
) -> Result<(String, String, String)> {
    let (status, body) = request(
        app,
        Method::POST,
        "/api/franchise",
        Some(&admin.token),
        Some(json!({ "name": unique_name("Fr"), "admins": [{ "email": owner.email }] })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "franchise create failed: {body}");
    let franchise_id = body["id"].as_str().context("franchise id")?.to_string();

    let (status, body) = request(
        app,
        Method::POST,
        &format!("/api/franchise/{franchise_id}/store"),
        Some(&owner.token),
        Some(json!({ "name": unique_name("S") })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "store create failed: {body}");
    let store_id = body["id"].as_str().context("store id")?.to_string();

    let (status, body) = request(
        app,
        Method::PUT,
        "/api/order/menu",
        Some(&admin.token),
        Some(json!({
            "title": unique_name("M"),
            "description": "test pizza",
            "image": "pizza9.png",
            "price": 0.05
        })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "menu add failed: {body}");
    let menu = body.as_array().context("menu array")?;
    let menu_id = menu
        .last()
        .and_then(|item| item["id"].as_str())
        .context("menu id")?
        .to_string();

    Ok((franchise_id, store_id, menu_id))
}

fn order_body(franchise_id: &str, store_id: &str, menu_id: &str) -> Value {
    json!({
        "franchiseId": franchise_id,
        "storeId": store_id,
        "items": [{ "menuId": menu_id, "description": "test pizza", "price": 0.05 }]
    })
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn menu_is_public_and_admin_mutable() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::rejecting("http://factory/report")),
    );

    let (status, body) = request(&app, Method::GET, "/api/order/menu", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_array());

    let diner = register_diner(&app, "menu diner").await?;
    let (status, _) = request(
        &app,
        Method::PUT,
        "/api/order/menu",
        Some(&diner.token),
        Some(json!({
            "title": "Student",
            "description": "test",
            "image": "pizza9.png",
            "price": 0.0001
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = login_admin(&app, &db.pool_clone()).await?;
    let title = unique_name("T");
    let (status, body) = request(
        &app,
        Method::PUT,
        "/api/order/menu",
        Some(&admin.token),
        Some(json!({
            "title": title,
            "description": "desc",
            "image": "pizza9.png",
            "price": 0.0001
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let menu = body.as_array().expect("menu array");
    assert!(!menu.is_empty());
    // Append-only: the new item lands at the end.
    assert_eq!(menu.last().expect("last")["title"], title.as_str());
    Ok(())
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn menu_item_price_must_be_positive() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::rejecting("http://factory/report")),
    );

    let admin = login_admin(&app, &db.pool_clone()).await?;
    let (status, _) = request(
        &app,
        Method::PUT,
        "/api/order/menu",
        Some(&admin.token),
        Some(json!({
            "title": "Free pizza",
            "description": "suspicious",
            "image": "pizza9.png",
            "price": 0
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn orders_require_authentication() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::rejecting("http://factory/report")),
    );

    let (status, _) = request(&app, Method::GET, "/api/order", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = request(
        &app,
        Method::POST,
        "/api/order",
        None,
        Some(order_body(
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
        )),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn factory_failure_leaves_no_order_behind() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::rejecting("http://factory/report")),
    );

    let diner = register_diner(&app, "unlucky diner").await?;
    let admin = login_admin(&app, &db.pool_clone()).await?;
    let (franchise_id, store_id, menu_id) = setup_storefront(&app, &admin, &diner).await?;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/order",
        Some(&diner.token),
        Some(order_body(&franchise_id, &store_id, &menu_id)),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to fulfill order at factory");
    assert_eq!(body["reportUrl"], "http://factory/report");

    // Nothing was persisted.
    let (status, body) = request(&app, Method::GET, "/api/order", Some(&diner.token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"].as_array().expect("orders").len(), 0);
    Ok(())
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn successful_order_persists_exactly_once() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::succeeding("factory-jwt", "http://factory/report")),
    );

    let diner = register_diner(&app, "hungry diner").await?;
    let admin = login_admin(&app, &db.pool_clone()).await?;
    let (franchise_id, store_id, menu_id) = setup_storefront(&app, &admin, &diner).await?;

    let (status, body) = request(
        &app,
        Method::POST,
        "/api/order",
        Some(&diner.token),
        Some(order_body(&franchise_id, &store_id, &menu_id)),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jwt"], "factory-jwt");
    assert_eq!(body["followLinkToEndChaos"], "http://factory/report");
    let order_id = body["order"]["id"].as_str().expect("order id").to_string();
    assert_eq!(body["order"]["franchiseId"], franchise_id.as_str());
    assert_eq!(body["order"]["storeId"], store_id.as_str());

    let (status, body) = request(&app, Method::GET, "/api/order", Some(&diner.token), None)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dinerId"], diner.user_id.to_string());
    let orders = body["orders"].as_array().expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], order_id.as_str());
    assert_eq!(orders[0]["items"].as_array().expect("items").len(), 1);
    assert_eq!(orders[0]["items"][0]["menuId"], menu_id.as_str());
    Ok(())
}

#[tokio::test]
#[cfg_attr(
    not(feature = "integration"),
    ignore = "enable with --features integration (requires Postgres via PIZZA_TEST_DATABASE_URL)"
)]
async fn order_validates_store_and_items() -> Result<()> {
    let Some(db) = TestDatabase::setup().await? else {
        return Ok(());
    };
    let app = build_app(
        db.pool_clone(),
        Arc::new(StubFactory::succeeding("factory-jwt", "http://factory/report")),
    );

    let diner = register_diner(&app, "careful diner").await?;
    let admin = login_admin(&app, &db.pool_clone()).await?;
    let (franchise_id, store_id, menu_id) = setup_storefront(&app, &admin, &diner).await?;

    // Store under a different franchise is not found.
    let (status, _) = request(
        &app,
        Method::POST,
        "/api/order",
        Some(&diner.token),
        Some(order_body(&Uuid::new_v4().to_string(), &store_id, &menu_id)),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // An order needs at least one item.
    let (status, body) = request(
        &app,
        Method::POST,
        "/api/order",
        Some(&diner.token),
        Some(json!({ "franchiseId": franchise_id, "storeId": store_id, "items": [] })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "order requires at least one item");

    // No order snuck through.
    let (_, body) = request(&app, Method::GET, "/api/order", Some(&diner.token), None)
        .await?;
    assert_eq!(body["orders"].as_array().expect("orders").len(), 0);
    Ok(())
}
