use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use futures::future::BoxFuture;
use thiserror::Error;

/// License failures surfaced before any instance operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    #[error("access token is required")]
    Missing,
    #[error("access token is not licensed for this instance")]
    Invalid,
    #[error("license authority unavailable: {0}")]
    Unavailable(String),
}

/// Capability allowing license validation to be skipped.
///
/// Only [`crate::config::Config`] mints this, and only when development
/// routes are explicitly enabled. Request data can never produce one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BypassGrant {
    _private: (),
}

impl BypassGrant {
    pub(crate) fn issue() -> Self {
        Self { _private: () }
    }
}

/// Caller credentials presented at the gateway boundary.
#[derive(Debug, Clone)]
pub enum Access {
    /// Regular caller, validated against the token authority.
    Token(String),
    /// Trusted development caller holding a bypass grant.
    Bypass { token: String, grant: BypassGrant },
}

impl Access {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    pub fn bypassed(token: impl Into<String>, grant: BypassGrant) -> Self {
        Self::Bypass {
            token: token.into(),
            grant,
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, Self::Bypass { .. })
    }

    pub fn raw_token(&self) -> &str {
        match self {
            Self::Token(token) | Self::Bypass { token, .. } => token,
        }
    }
}

/// Errors reported by an authorization backend.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct AuthorityError(pub String);

/// External source deciding whether a token may drive an instance.
pub trait TokenAuthority: Send + Sync {
    fn authorize<'a>(
        &'a self,
        token: &'a str,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, AuthorityError>>;
}

#[derive(Clone, PartialEq, Eq)]
enum TokenScope {
    AnyInstance,
    Instances(HashSet<String>),
}

/// Token authority backed by a fixed token table.
///
/// Format: `token=inst1|inst2;token2=*`. An empty table rejects every token.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StaticTokenAuthority {
    grants: HashMap<String, TokenScope>,
}

impl StaticTokenAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a token table, rejecting entries without a token or scope.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut authority = Self::new();

        for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((token, scope)) = entry.split_once('=') else {
                return Err(format!("missing '=' in entry {entry:?}"));
            };
            let token = token.trim();
            let scope = scope.trim();
            if token.is_empty() || scope.is_empty() {
                return Err(format!("empty token or scope in entry {entry:?}"));
            }

            if scope == "*" {
                authority.allow_any(token);
                continue;
            }
            for instance_id in scope.split('|').map(str::trim).filter(|id| !id.is_empty()) {
                authority.allow(token, instance_id);
            }
        }

        Ok(authority)
    }

    pub fn allow(&mut self, token: &str, instance_id: &str) {
        let scope = self
            .grants
            .entry(token.to_owned())
            .or_insert_with(|| TokenScope::Instances(HashSet::new()));
        if let TokenScope::Instances(instances) = scope {
            instances.insert(instance_id.to_owned());
        }
    }

    pub fn allow_any(&mut self, token: &str) {
        self.grants.insert(token.to_owned(), TokenScope::AnyInstance);
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    fn permits(&self, token: &str, instance_id: &str) -> bool {
        match self.grants.get(token) {
            Some(TokenScope::AnyInstance) => true,
            Some(TokenScope::Instances(instances)) => instances.contains(instance_id),
            None => false,
        }
    }
}

impl fmt::Debug for StaticTokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuthority")
            .field("tokens", &self.grants.len())
            .finish()
    }
}

impl TokenAuthority for StaticTokenAuthority {
    fn authorize<'a>(
        &'a self,
        token: &'a str,
        instance_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, AuthorityError>> {
        Box::pin(async move { Ok(self.permits(token, instance_id)) })
    }
}

/// Checks caller access before any instance operation proceeds.
#[derive(Clone)]
pub struct LicenseValidator {
    authority: Arc<dyn TokenAuthority>,
}

impl LicenseValidator {
    pub fn new(authority: Arc<dyn TokenAuthority>) -> Self {
        Self { authority }
    }

    pub async fn validate(&self, access: &Access, instance_id: &str) -> Result<(), LicenseError> {
        let token = match access {
            Access::Bypass { .. } => {
                tracing::warn!(instance = instance_id, "license validation bypassed");
                return Ok(());
            }
            Access::Token(token) => token.trim(),
        };

        if token.is_empty() {
            return Err(LicenseError::Missing);
        }

        match self.authority.authorize(token, instance_id).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(instance = instance_id, "license rejected");
                Err(LicenseError::Invalid)
            }
            Err(error) => Err(LicenseError::Unavailable(error.to_string())),
        }
    }
}
