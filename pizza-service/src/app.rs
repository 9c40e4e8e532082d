use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method, StatusCode,
};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use sqlx::PgPool;
use tower_http::cors::{AllowOrigin, CorsLayer};

use common_auth::JwtVerifier;
use common_http_errors::ApiError;

use crate::config::ServiceConfig;
use crate::factory::PizzaFactory;
use crate::tokens::TokenSigner;
use crate::{auth_handlers, docs, franchise_handlers, order_handlers, user_handlers};

pub static PIZZA_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static HTTP_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let v = IntCounterVec::new(
        Opts::new(
            "http_errors_total",
            "Count of HTTP error responses emitted (status >= 400)",
        ),
        &["service", "code", "status"],
    )
    .unwrap();
    PIZZA_REGISTRY.register(Box::new(v.clone())).ok();
    v
});

pub async fn http_error_metrics(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let resp = next.run(req).await;
    let status = resp.status();
    if status.as_u16() >= 400 {
        let code = resp
            .headers()
            .get("X-Error-Code")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown");
        HTTP_ERRORS_TOTAL
            .with_label_values(&["pizza-service", code, status.as_str()])
            .inc();
    }
    resp
}

pub async fn health() -> &'static str {
    "ok"
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub token_signer: Arc<TokenSigner>,
    pub factory: Arc<dyn PizzaFactory>,
    pub config: Arc<ServiceConfig>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}

pub(crate) fn db_error(err: sqlx::Error) -> ApiError {
    tracing::error!(error = %err, "database query failed");
    ApiError::internal("database error")
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

async fn metrics() -> (StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = PIZZA_REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).to_string())
}

pub fn build_router(state: AppState) -> Router {
    let allowed_origins = [
        "http://localhost:3000",
        "http://localhost:5173",
    ];
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            ACCEPT,
            CONTENT_TYPE,
            HeaderName::from_static("authorization"),
        ]);

    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route(
            "/api/auth",
            post(auth_handlers::register)
                .put(auth_handlers::login)
                .delete(auth_handlers::logout),
        )
        .route("/api/user/me", get(user_handlers::me))
        .route("/api/user", get(user_handlers::list_users))
        .route("/api/user/:user_id", put(user_handlers::update_user))
        .route(
            "/api/franchise",
            get(franchise_handlers::list_franchises).post(franchise_handlers::create_franchise),
        )
        .route(
            "/api/franchise/:franchise_id",
            get(franchise_handlers::list_user_franchises)
                .delete(franchise_handlers::delete_franchise),
        )
        .route(
            "/api/franchise/:franchise_id/store",
            post(franchise_handlers::create_store),
        )
        .route(
            "/api/franchise/:franchise_id/store/:store_id",
            delete(franchise_handlers::delete_store),
        )
        .route(
            "/api/order/menu",
            get(order_handlers::get_menu).put(order_handlers::add_menu_item),
        )
        .route(
            "/api/order",
            get(order_handlers::list_orders).post(order_handlers::create_order),
        )
        .route("/api/docs", get(docs::docs))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(http_error_metrics))
}
