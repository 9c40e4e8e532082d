use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub issuer: String,
    pub audience: String,
    pub secret: String,
    pub kid: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct FactorySettings {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Upper bound on the synchronous fulfillment call. There is no retry:
    /// the factory contract is not known to be idempotent.
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub jwt: JwtSettings,
    pub factory: FactorySettings,
}

pub fn load_config() -> Result<ServiceConfig> {
    let secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "pizza-service".to_string());
    let audience = env::var("JWT_AUDIENCE").unwrap_or_else(|_| "pizza-diner".to_string());
    let kid = env::var("JWT_KID").unwrap_or_else(|_| "primary".to_string());
    let ttl_seconds = env::var("TOKEN_TTL_SECONDS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(86_400);

    let base_url = env::var("FACTORY_URL")
        .ok()
        .and_then(|value| normalize_optional(&value))
        .map(|value| value.trim_end_matches('/').to_string())
        .unwrap_or_else(|| "http://localhost:8083".to_string());
    let api_key = env::var("FACTORY_API_KEY")
        .ok()
        .and_then(|value| normalize_optional(&value));
    let timeout_seconds = env::var("FACTORY_TIMEOUT_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(10);

    Ok(ServiceConfig {
        jwt: JwtSettings {
            issuer,
            audience,
            secret,
            kid,
            ttl_seconds,
        },
        factory: FactorySettings {
            base_url,
            api_key,
            timeout_seconds,
        },
    })
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
