#![allow(dead_code)]

use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use rand_core::OsRng;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tower::util::ServiceExt;
use uuid::Uuid;

use common_auth::{JwtConfig, JwtVerifier};
use pizza_service::config::{FactorySettings, JwtSettings, ServiceConfig};
use pizza_service::factory::PizzaFactory;
use pizza_service::tokens::TokenSigner;
use pizza_service::{app::build_router, AppState};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

pub struct TestDatabase {
    pool: PgPool,
}

impl TestDatabase {
    /// Connects to the database named by PIZZA_TEST_DATABASE_URL and replays
    /// the migrations. Returns None (and a notice) when no database is
    /// configured so suites skip instead of failing.
    pub async fn setup() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("PIZZA_TEST_DATABASE_URL") else {
            eprintln!(
                "Skipping pizza-service integration tests: set PIZZA_TEST_DATABASE_URL to run them.",
            );
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("failed to connect to PIZZA_TEST_DATABASE_URL")?;

        run_migrations(&pool).await?;

        Ok(Some(Self { pool }))
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let mut entries = std::fs::read_dir(&migrations_dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();

    for path in entries {
        let sql = std::fs::read_to_string(&path)?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    Ok(())
}

/// A pool that never connects. Enough for routes that reject before
/// touching the database.
pub fn lazy_pool() -> PgPool {
    PgPoolOptions::new()
        .connect_lazy("postgres://localhost/unused")
        .expect("lazy pool")
}

pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        jwt: JwtSettings {
            issuer: "pizza-service".to_string(),
            audience: "pizza-diner".to_string(),
            secret: TEST_JWT_SECRET.to_string(),
            kid: "primary".to_string(),
            ttl_seconds: 3600,
        },
        factory: FactorySettings {
            base_url: "http://localhost:1".to_string(),
            api_key: None,
            timeout_seconds: 2,
        },
    }
}

/// In-process app wired exactly like main(), with the factory swapped for
/// whatever the test needs.
pub fn build_app(pool: PgPool, factory: Arc<dyn PizzaFactory>) -> Router {
    let config = Arc::new(test_config());
    let jwt_verifier = Arc::new(JwtVerifier::with_secret(
        JwtConfig::new(config.jwt.issuer.clone(), config.jwt.audience.clone()),
        config.jwt.kid.clone(),
        config.jwt.secret.as_bytes(),
    ));
    let token_signer = Arc::new(TokenSigner::new(pool.clone(), config.jwt.clone()));

    build_router(AppState {
        db: pool,
        jwt_verifier,
        token_signer,
        factory,
        config,
    })
}

/// One JSON request through the router; returns status plus parsed body
/// (Null when the body is empty).
pub async fn request(
    router: &Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&value)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

pub fn unique_email(prefix: &str) -> String {
    format!("{prefix}_{}@test.com", Uuid::new_v4().simple())
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: Uuid,
    pub email: String,
    pub password: String,
    pub token: String,
}

pub async fn register_diner(router: &Router, name: &str) -> Result<Session> {
    let email = unique_email("diner");
    let password = "pass123".to_string();

    let (status, body) = request(
        router,
        Method::POST,
        "/api/auth",
        None,
        Some(json!({ "name": name, "email": email, "password": password })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "register failed: {status} {body}");

    Ok(Session {
        user_id: parse_id(&body["user"]["id"])?,
        email,
        password,
        token: body["token"]
            .as_str()
            .context("register response missing token")?
            .to_string(),
    })
}

pub async fn login(router: &Router, email: &str, password: &str) -> Result<Session> {
    let (status, body) = request(
        router,
        Method::PUT,
        "/api/auth",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await?;
    anyhow::ensure!(status == StatusCode::OK, "login failed: {status} {body}");

    Ok(Session {
        user_id: parse_id(&body["user"]["id"])?,
        email: email.to_string(),
        password: password.to_string(),
        token: body["token"]
            .as_str()
            .context("login response missing token")?
            .to_string(),
    })
}

/// Admins are seeded out of band (there is no bootstrap route).
pub async fn seed_admin(pool: &PgPool) -> Result<(Uuid, String, String)> {
    let user_id = Uuid::new_v4();
    let email = unique_email("admin");
    let password = "toomanysecrets".to_string();

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash password: {err}"))?
        .to_string();

    sqlx::query("INSERT INTO users (id, name, email, password_hash) VALUES ($1, $2, $3, $4)")
        .bind(user_id)
        .bind("Admin")
        .bind(&email)
        .bind(&password_hash)
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO user_roles (user_id, role, object_id) VALUES ($1, 'admin', NULL)")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok((user_id, email, password))
}

pub async fn login_admin(router: &Router, pool: &PgPool) -> Result<Session> {
    let (_, email, password) = seed_admin(pool).await?;
    login(router, &email, &password).await
}

pub fn parse_id(value: &Value) -> Result<Uuid> {
    Ok(Uuid::parse_str(
        value.as_str().context("expected string id")?,
    )?)
}
