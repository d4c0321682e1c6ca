//! In-process credential store, for tests and hosts that persist credentials themselves.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::CredentialStore;

#[derive(Default)]
pub struct MemoryCredentialStore {
    values: Mutex<HashMap<String, SecretString>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a key.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values
            .get_mut()
            .insert(key.to_string(), SecretString::from(value.to_string()));
        self
    }

    /// Plain-text view of a stored value.
    pub async fn get_plain(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .await
            .get(key)
            .map(|v| v.expose_secret().to_string())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: SecretString) -> Result<()> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}
