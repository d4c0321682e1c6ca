//! Credential backend selection, read from the `[credentials]` config table.

use serde::{Deserialize, Serialize};

use super::pass::{PassConfig, PassCredentialStore};
use super::{CredentialStore, MemoryCredentialStore};

/// Which credential backend to use.
///
/// ```toml
/// [credentials]
/// backend = "pass"
/// path = "health/mutuelle-generale"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CredentialConfig {
    /// Password-store (pass) backend.
    Pass {
        #[serde(flatten)]
        config: PassConfig,
    },
    /// Keep credentials for this process only; interactive login every run.
    Memory,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        CredentialConfig::Memory
    }
}

impl CredentialConfig {
    pub fn build(&self) -> Box<dyn CredentialStore> {
        match self {
            CredentialConfig::Pass { config } => Box::new(PassCredentialStore::new(config.clone())),
            CredentialConfig::Memory => Box::new(MemoryCredentialStore::new()),
        }
    }
}
