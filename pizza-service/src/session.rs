use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use common_auth::AuthContext;
use common_http_errors::ApiError;
use common_security::Actor;

use crate::app::{db_error, AppState};
use crate::user_handlers::{load_user, User};

/// The authenticated caller. Verifies the bearer JWT, requires its hash to
/// still be registered, and loads the user plus role rows fresh from the
/// database so revocations and role changes take effect immediately.
pub struct CurrentUser {
    pub user: User,
    pub actor: Actor,
    pub token: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);

        let auth = <AuthContext as FromRequestParts<AppState>>::from_request_parts(parts, &app)
            .await
            .map_err(|_| ApiError::Unauthorized)?;

        let registered = app
            .token_signer
            .registered_user(&auth.token)
            .await
            .map_err(db_error)?;
        let Some(user_id) = registered else {
            return Err(ApiError::Unauthorized);
        };
        if user_id != auth.claims.subject {
            return Err(ApiError::Unauthorized);
        }

        let Some(user) = load_user(&app.db, user_id).await.map_err(db_error)? else {
            return Err(ApiError::Unauthorized);
        };

        let actor = Actor::new(
            user.id,
            user.roles.iter().map(|entry| entry.role.clone()).collect(),
        );

        Ok(Self {
            user,
            actor,
            token: auth.token,
        })
    }
}
