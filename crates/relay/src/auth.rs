use async_trait::async_trait;
use std::collections::HashMap;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::errors::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum PermissionTier {
    Basic,
    Pro,
    Admin,
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq)]
pub struct Caller {
    pub identity: String,
    pub tier: PermissionTier,
}

/// Resolves a bearer token into a caller
#[async_trait]
pub trait AuthResolver: Send + Sync {
    async fn resolve(&self, bearer_token: Option<&str>) -> Result<Caller, AuthError>;
}

/// Resolver backed by a fixed token table, configured as `token:identity:tier` triples
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    callers: HashMap<String, Caller>,
}

impl StaticTokenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token<T, I>(mut self, token: T, identity: I, tier: PermissionTier) -> Self
    where
        T: Into<String>,
        I: Into<String>,
    {
        self.callers.insert(
            token.into(),
            Caller {
                identity: identity.into(),
                tier,
            },
        );
        self
    }

    /// Parse a comma separated `token:identity:tier` list. The tier defaults to basic.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let mut resolver = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let token = parts.next().unwrap_or_default();
            let identity = parts
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| anyhow::anyhow!("auth token entry is missing an identity"))?;
            let tier = match parts.next() {
                Some(tier) => PermissionTier::from_str(tier)
                    .map_err(|_| anyhow::anyhow!("unknown permission tier '{}'", tier))?,
                None => PermissionTier::Basic,
            };
            resolver = resolver.with_token(token, identity, tier);
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

#[async_trait]
impl AuthResolver for StaticTokenResolver {
    async fn resolve(&self, bearer_token: Option<&str>) -> Result<Caller, AuthError> {
        let token = bearer_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Unauthenticated)?;
        self.callers
            .get(token)
            .cloned()
            .ok_or(AuthError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_known_token() {
        let resolver = StaticTokenResolver::new().with_token("t1", "alice", PermissionTier::Pro);
        let caller = resolver.resolve(Some("t1")).await.unwrap();
        assert_eq!(caller.identity, "alice");
        assert_eq!(caller.tier, PermissionTier::Pro);
    }

    #[tokio::test]
    async fn test_resolve_missing_or_unknown() {
        let resolver = StaticTokenResolver::new().with_token("t1", "alice", PermissionTier::Pro);
        assert_eq!(resolver.resolve(None).await, Err(AuthError::Unauthenticated));
        assert_eq!(resolver.resolve(Some("  ")).await, Err(AuthError::Unauthenticated));
        assert_eq!(resolver.resolve(Some("t2")).await, Err(AuthError::Unauthenticated));
    }

    #[test]
    fn test_parse_spec() {
        let resolver = StaticTokenResolver::parse("abc:alice:admin, def:bob").unwrap();
        assert_eq!(resolver.len(), 2);
        assert_eq!(resolver.callers["abc"].tier, PermissionTier::Admin);
        assert_eq!(resolver.callers["def"].tier, PermissionTier::Basic);

        assert!(StaticTokenResolver::parse("abc").is_err());
        assert!(StaticTokenResolver::parse("abc:alice:owner").is_err());
        assert!(StaticTokenResolver::parse("").unwrap().is_empty());
    }
}
