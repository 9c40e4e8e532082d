use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::JwtSettings;

/// Signs bearer tokens and keeps the registry of live ones. A token only
/// authenticates while its hash is present in `auth_tokens`; logout and
/// user updates revoke rows, which kills the token regardless of `exp`.
pub struct TokenSigner {
    pool: PgPool,
    settings: JwtSettings,
    encoding_key: EncodingKey,
}

pub struct TokenSubject {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
}

pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AccessClaims<'a> {
    sub: String,
    name: &'a str,
    email: &'a str,
    roles: &'a [String],
    iss: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    jti: String,
}

impl TokenSigner {
    pub fn new(pool: PgPool, settings: JwtSettings) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        Self {
            pool,
            settings,
            encoding_key,
        }
    }

    /// Sign a token without touching the registry. Callers almost always
    /// want [`issue`](Self::issue) instead.
    pub fn sign(&self, subject: &TokenSubject) -> Result<IssuedToken> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.settings.ttl_seconds);

        let claims = AccessClaims {
            sub: subject.user_id.to_string(),
            name: &subject.name,
            email: &subject.email,
            roles: &subject.roles,
            iss: &self.settings.issuer,
            aud: &self.settings.audience,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some(self.settings.kid.clone());

        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|err| anyhow!("Failed to sign access token: {err}"))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Sign a token and register its hash so it authenticates.
    pub async fn issue(&self, subject: &TokenSubject) -> Result<IssuedToken> {
        let issued = self.sign(subject)?;
        sqlx::query("INSERT INTO auth_tokens (token_hash, user_id) VALUES ($1, $2)")
            .bind(hash_token(&issued.token))
            .bind(subject.user_id)
            .execute(&self.pool)
            .await
            .map_err(|err| anyhow!("Failed to register token: {err}"))?;
        Ok(issued)
    }

    /// Resolve a presented token to its registered user, if any.
    pub async fn registered_user(&self, token: &str) -> Result<Option<Uuid>, sqlx::Error> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM auth_tokens WHERE token_hash = $1")
                .bind(hash_token(token))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    /// Drop exactly the presented token. Returns whether it was registered.
    pub async fn revoke(&self, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE token_hash = $1")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop every live token for a user. Runs when the record changes so
    /// stale claims cannot keep authenticating.
    pub async fn revoke_all_for(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM auth_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
