//! Secret resolution for compose environment values.
//!
//! Values of the form `vault://...` are resolved through a collaborator
//! before a task record is persisted; the backing vault client is injected
//! at startup.

use async_trait::async_trait;

pub const SECRET_SCHEME: &str = "vault://";

pub fn is_secret_reference(value: &str) -> bool {
    value.starts_with(SECRET_SCHEME)
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, reference: &str) -> anyhow::Result<String>;
}

/// Used when no vault is configured. Any secret reference is a hard
/// translation error instead of a task launched with the raw reference.
pub struct DenyAllSecrets;

#[async_trait]
impl SecretStore for DenyAllSecrets {
    async fn resolve(&self, reference: &str) -> anyhow::Result<String> {
        anyhow::bail!("no secret store configured, cannot resolve {reference}")
    }
}
