use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Verified token claims, shaped for the storefront: who the caller is and
/// which roles were current when the token was signed.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub subject: Uuid,
    pub name: String,
    pub email: String,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub issued_at: Option<DateTime<Utc>>,
    pub issuer: String,
    pub audience: Vec<String>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|value| value == role)
    }
}

/// Wire layout of the payload, kept separate from [`Claims`] so field
/// presence and timestamp decoding are validated in one place.
#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    sub: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    roles: Vec<String>,
    exp: i64,
    #[serde(default)]
    iat: Option<i64>,
    iss: String,
    #[serde(default)]
    aud: Option<AudienceRepr>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

fn seconds_to_datetime(field: &'static str, value: i64) -> AuthResult<DateTime<Utc>> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| AuthError::InvalidClaim(field, value.to_string()))
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(repr: ClaimsRepr) -> AuthResult<Self> {
        let subject = Uuid::parse_str(&repr.sub)
            .map_err(|_| AuthError::InvalidClaim("sub", repr.sub.clone()))?;

        let expires_at = seconds_to_datetime("exp", repr.exp)?;
        let issued_at = repr
            .iat
            .map(|iat| seconds_to_datetime("iat", iat))
            .transpose()?;

        let audience = match repr.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Self {
            subject,
            name: repr.name,
            email: repr.email,
            roles: repr.roles,
            expires_at,
            issued_at,
            issuer: repr.iss,
            audience,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        let repr: ClaimsRepr = serde_json::from_value(value)
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        Claims::try_from(repr)
    }
}
