//! Local record of the last run per source account.
//!
//! Read when a run starts to plan an incremental fetch, written when it ends.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::models::LastRun;

pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    /// Uses `~/.cache/mutuelle-sync/runs/` by default.
    pub fn new() -> Result<Self> {
        let dir = dirs::cache_dir()
            .context("Could not find cache directory")?
            .join("mutuelle-sync")
            .join("runs");
        Self::with_path(dir)
    }

    pub fn with_path(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create run state dir: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn state_file(&self, account: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(account)))
    }

    pub fn get(&self, account: &str) -> Result<Option<LastRun>> {
        let path = self.state_file(account);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run state: {}", path.display()))?;
        let last: LastRun = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run state: {}", path.display()))?;
        Ok(Some(last))
    }

    pub fn set(&self, account: &str, last: &LastRun) -> Result<()> {
        let path = self.state_file(account);
        let content = serde_json::to_string_pretty(last).context("Failed to serialize run state")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write run state: {}", path.display()))?;
        debug!(outcome = %last.outcome, "run state recorded");
        Ok(())
    }

    /// All recorded accounts with their last run, sorted by account.
    pub fn list(&self) -> Result<Vec<(String, LastRun)>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list run states: {}", self.dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<LastRun>(&content) {
                Ok(last) => runs.push((stem.to_string(), last)),
                Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable run state"),
            }
        }
        runs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(runs)
    }

    pub fn delete(&self, account: &str) -> Result<()> {
        let path = self.state_file(account);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete run state: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Filesystem-safe form of an account identifier (an email, usually).
pub fn file_stem(account: &str) -> String {
    account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') { c } else { '_' })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[test]
    fn round_trips_last_run() -> Result<()> {
        let dir = TempDir::new()?;
        let store = RunStateStore::with_path(dir.path())?;
        assert!(store.get("a@b.fr")?.is_none());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        store.set("a@b.fr", &LastRun::failure(at, "timed out"))?;
        let last = store.get("a@b.fr")?.unwrap();
        assert_eq!(last, LastRun::failure(at, "timed out"));

        store.set("a@b.fr", &LastRun::success(at))?;
        assert_eq!(store.list()?, vec![("a@b.fr".to_string(), LastRun::success(at))]);

        store.delete("a@b.fr")?;
        assert!(store.get("a@b.fr")?.is_none());
        Ok(())
    }

    #[test]
    fn file_stem_blocks_path_traversal() {
        assert_eq!(file_stem("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(file_stem("jean.dupont@example.fr"), "jean.dupont@example.fr");
        assert_eq!(file_stem("a b/c"), "a_b_c");
    }
}
