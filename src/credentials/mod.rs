//! Credential storage for the portal login.
//!
//! The connector needs two keys, `login` and `password`. Backends map those
//! logical keys to wherever they keep secrets.
//!
//! # Configuration
//!
//! ```toml
//! [credentials]
//! backend = "pass"
//! path = "health/mutuelle-generale"
//!
//! [credentials.fields]
//! login = "adherent"
//! ```

mod config;
mod memory;
mod pass;

pub use config::CredentialConfig;
pub use memory::MemoryCredentialStore;
pub use pass::{PassConfig, PassCredentialStore};

use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;

/// A key-value store for credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Retrieve a credential by key; `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<SecretString>>;

    /// Store a credential captured during interactive login.
    async fn set(&self, key: &str, value: SecretString) -> Result<()>;
}
