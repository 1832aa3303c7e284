//! Opaque credential capability.
//!
//! The runtime never acquires credentials itself; it asks an injected
//! [`CredentialProvider`] to resolve an [`crate::AuthenticationStrategyKey`]
//! into a [`Credential`] when a pool opens a new connection.

use async_trait::async_trait;
use meridian_error::{ErrorCode, MeridianError, Result};
use secrecy::SecretString;

use crate::key::AuthenticationStrategyKey;

/// A resolved credential. The secret material is held behind
/// `secrecy::SecretString` so it never leaks through Debug/serde.
pub struct Credential {
    principal: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Resolves an authentication strategy into a concrete credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, strategy: &AuthenticationStrategyKey) -> Result<Credential>;
}

/// Provider backed by a fixed principal/secret pair.
///
/// Suitable for development setups and tests; production embedders supply
/// a vault-backed implementation.
pub struct StaticCredentialProvider {
    principal: String,
    secret: String,
}

impl StaticCredentialProvider {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn resolve(&self, strategy: &AuthenticationStrategyKey) -> Result<Credential> {
        match strategy {
            // The strategy's own username wins over the configured principal.
            AuthenticationStrategyKey::UserNamePassword { username, .. } => {
                Ok(Credential::new(username.clone(), self.secret.clone()))
            }
            AuthenticationStrategyKey::Anonymous => {
                Ok(Credential::new(self.principal.clone(), ""))
            }
            AuthenticationStrategyKey::ApiToken { .. }
            | AuthenticationStrategyKey::Kerberos { .. }
            | AuthenticationStrategyKey::OAuth { .. } => Err(MeridianError::new(
                ErrorCode::CredentialResolution,
                format!(
                    "Static credential provider cannot resolve {:?} strategies",
                    strategy
                ),
            )
            .with_hint("Supply a vault-backed CredentialProvider")),
        }
    }
}
