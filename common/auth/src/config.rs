/// Clock skew tolerated when validating `exp`, in seconds.
pub const DEFAULT_LEEWAY_SECONDS: u32 = 30;

/// Expectations the verifier enforces against every presented token.
///
/// The storefront signs its own tokens, so issuer and audience are fixed
/// strings chosen at startup rather than discovered from a provider.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub leeway_seconds: u32,
}

impl JwtConfig {
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            leeway_seconds: DEFAULT_LEEWAY_SECONDS,
        }
    }
}
