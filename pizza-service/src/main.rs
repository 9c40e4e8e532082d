use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;

use common_auth::{JwtConfig, JwtVerifier};
use pizza_service::app::{build_router, AppState};
use pizza_service::config::load_config;
use pizza_service::factory::{HttpFactory, PizzaFactory};
use pizza_service::tokens::TokenSigner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(load_config()?);

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    let jwt_verifier = Arc::new(JwtVerifier::with_secret(
        JwtConfig::new(config.jwt.issuer.clone(), config.jwt.audience.clone()),
        config.jwt.kid.clone(),
        config.jwt.secret.as_bytes(),
    ));
    let token_signer = Arc::new(TokenSigner::new(db.clone(), config.jwt.clone()));
    let factory: Arc<dyn PizzaFactory> = Arc::new(HttpFactory::new(&config.factory)?);

    let state = AppState {
        db,
        jwt_verifier,
        token_signer,
        factory,
        config,
    };
    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));

    info!(%addr, "starting pizza-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
