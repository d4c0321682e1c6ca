//! Password-store (pass) credential backend.
//!
//! The entry's first line is the portal password; other lines are
//! `field: value` pairs, e.g. `login: 123456789`.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::CredentialStore;

/// Logical key stored on the entry's first line.
const FIRST_LINE_KEY: &str = "password";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassConfig {
    /// The pass entry path (e.g., "health/mutuelle-generale").
    pub path: String,

    /// Logical key → field name in the entry. Unmapped keys are used as-is.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

pub struct PassCredentialStore {
    config: PassConfig,
}

impl PassCredentialStore {
    pub fn new(config: PassConfig) -> Self {
        Self { config }
    }

    fn field_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.config.fields.get(key).map(String::as_str).unwrap_or(key)
    }

    fn read_entry(&self) -> Result<Option<PassEntry>> {
        let output = Command::new("pass")
            .arg("show")
            .arg(&self.config.path)
            .output()
            .context("Failed to run pass command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("is not in the password store") {
                return Ok(None);
            }
            anyhow::bail!("pass show failed: {}", stderr.trim());
        }

        let content = String::from_utf8(output.stdout).context("Invalid UTF-8 in pass output")?;
        Ok(Some(PassEntry::parse(&content)))
    }

    fn write_entry(&self, entry: &PassEntry) -> Result<()> {
        let mut child = Command::new("pass")
            .args(["insert", "--multiline", "--force"])
            .arg(&self.config.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .context("Failed to spawn pass command")?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(entry.render().as_bytes())
                .context("Failed to write to pass stdin")?;
        }

        let status = child.wait().context("Failed to wait for pass command")?;
        if !status.success() {
            anyhow::bail!("pass insert failed for {}", self.config.path);
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PassCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<SecretString>> {
        let field = self.field_name(key);
        Ok(self
            .read_entry()?
            .and_then(|entry| entry.get(field).map(|v| SecretString::from(v.to_string()))))
    }

    async fn set(&self, key: &str, value: SecretString) -> Result<()> {
        let field = self.field_name(key).to_string();
        let mut entry = self.read_entry()?.unwrap_or_default();
        entry.set(&field, value.expose_secret());
        self.write_entry(&entry)
    }
}

/// Parsed pass entry.
#[derive(Debug, Default, PartialEq, Eq)]
struct PassEntry {
    first_line: Option<String>,
    fields: BTreeMap<String, String>,
}

impl PassEntry {
    fn parse(content: &str) -> Self {
        let mut lines = content.lines();
        let first_line = lines.next().map(str::to_string);
        let fields = lines
            .filter_map(|line| line.split_once(": "))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self { first_line, fields }
    }

    fn get(&self, field: &str) -> Option<&str> {
        if field == FIRST_LINE_KEY {
            return self.first_line.as_deref();
        }
        self.fields.get(field).map(String::as_str)
    }

    fn set(&mut self, field: &str, value: &str) {
        if field == FIRST_LINE_KEY {
            self.first_line = Some(value.to_string());
        } else {
            self.fields.insert(field.to_string(), value.to_string());
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.first_line.as_deref().unwrap_or_default());
        out.push('\n');
        for (key, value) in &self.fields {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_line_is_the_password() {
        let entry = PassEntry::parse("s3cret\nlogin: 123456789\nurl: https://adherent.example\n");
        assert_eq!(entry.get("password"), Some("s3cret"));
        assert_eq!(entry.get("login"), Some("123456789"));
        assert_eq!(entry.get("missing"), None);
    }

    #[test]
    fn set_then_render_keeps_fields() {
        let mut entry = PassEntry::default();
        entry.set("password", "pw");
        entry.set("login", "a@b.fr");
        let reparsed = PassEntry::parse(&entry.render());
        assert_eq!(reparsed, entry);
    }

    #[test]
    fn field_mapping_applies_to_logical_keys() {
        let mut fields = BTreeMap::new();
        fields.insert("login".to_string(), "adherent".to_string());
        let store = PassCredentialStore::new(PassConfig {
            path: "health/mg".to_string(),
            fields,
        });
        assert_eq!(store.field_name("login"), "adherent");
        assert_eq!(store.field_name("password"), "password");
    }
}
