//! Resolution of authenticated users from bearer tokens.

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::collections::HashMap;

/// Maps a bearer token to the user it belongs to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Return the user id for `token`, or `None` if the token is not recognized.
    async fn user_id(&self, token: &str) -> Option<String>;
}

/// Identity provider over a fixed token table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenIdentity {
    tokens: HashMap<String, String>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenIdentity {
    async fn user_id(&self, token: &str) -> Option<String> {
        self.tokens.get(token).cloned()
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the authenticated user of a request, if any.
pub async fn authenticated_user(
    provider: &dyn IdentityProvider,
    headers: &HeaderMap,
) -> Option<String> {
    match bearer_token(headers) {
        Some(token) => provider.user_id(token).await,
        None => None,
    }
}
