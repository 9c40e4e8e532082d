use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts};

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};
use crate::verifier::JwtVerifier;

/// Verified bearer credential: the decoded claims plus the exact token
/// string as presented, which callers need to check against the server-side
/// token registry.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?.to_owned();
        let verifier = Arc::<JwtVerifier>::from_ref(state);
        let claims = verifier.verify(&token)?;
        Ok(Self { claims, token })
    }
}

/// Pulls the token out of `Authorization: Bearer <token>`. The scheme is
/// matched case-insensitively.
fn bearer_token(parts: &Parts) -> AuthResult<&str> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthorization)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthorization)?;

    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthorization)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::InvalidAuthorization);
    }
    Ok(token)
}
