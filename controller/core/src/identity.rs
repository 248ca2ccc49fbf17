use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Resolves a bearer token to the identity it was issued for.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn resolve_bearer_token(&self, token: &str) -> Result<User>;
}

/// An authenticated caller. `login` is the identity recorded as a ShortLink's
/// owner or co-owner.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub login: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Extracts the token from an `Authorization` header value, accepting both the
/// `Bearer <t>` and `token <t>` forms.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.map(str::trim).unwrap_or_default();
    let is_scheme = |s: &str| s == "Bearer" || s == "token";
    let token = match header.split_once(char::is_whitespace) {
        Some((scheme, rest)) if is_scheme(scheme) => rest.trim(),
        None if is_scheme(header) => "",
        _ => header,
    };
    if token.is_empty() {
        return Err(Error::Unauthenticated("no credentials provided".to_string()));
    }
    Ok(token)
}
