//! Bearer tokens for the provider APIs.
//!
//! Minting tokens (OAuth consent, device flow, refresh) happens outside this crate.
//! A fetcher only asks a [`TokenProvider`] for the current token.

use async_trait::async_trait;

use crate::error::SourceError;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, SourceError>;
}

/// A token handed over once, e.g. from configuration
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn bearer_token(&self) -> Result<String, SourceError> {
        if self.0.trim().is_empty() {
            return Err(SourceError::MissingToken("token is empty".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// Reads the token from an environment variable on every call, so a token
/// refreshed by an external helper is picked up without a restart
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn bearer_token(&self) -> Result<String, SourceError> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SourceError::MissingToken(format!("{} is not set", self.var)))
    }
}
