use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::models::{Bill, Document, Identity, Qualification};
use crate::run_state::file_stem;

use super::Sink;

/// JSON file-based sink.
///
/// Directory structure:
/// ```text
/// data/
///   {account}/
///     identity.json
///     documents.jsonl
///     bills.jsonl
///     files/
///       2023-05_lamutuellegenerale.pdf
/// ```
pub struct JsonFileSink {
    base_path: PathBuf,
}

/// Index line written to `documents.jsonl` for each saved file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRecord {
    key: String,
    filename: String,
    qualification: Qualification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_url: Option<String>,
}

impl JsonFileSink {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.base_path.join(file_stem(account))
    }

    fn identity_file(&self, account: &str) -> PathBuf {
        self.account_dir(account).join("identity.json")
    }

    fn documents_file(&self, account: &str) -> PathBuf {
        self.account_dir(account).join("documents.jsonl")
    }

    fn bills_file(&self, account: &str) -> PathBuf {
        self.account_dir(account).join("bills.jsonl")
    }

    pub fn file_path(&self, account: &str, filename: &str) -> PathBuf {
        self.account_dir(account).join("files").join(file_stem(filename))
    }

    pub async fn read_identity(&self, account: &str) -> Result<Option<Identity>> {
        let path = self.identity_file(account);
        match fs::read_to_string(&path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON from {:?}", path))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read file"),
        }
    }

    pub async fn read_bills(&self, account: &str) -> Result<Vec<Bill>> {
        self.read_jsonl(&self.bills_file(account)).await
    }

    /// Whether the file at `path` holds exactly `content`.
    async fn has_content(&self, path: &Path, content: &[u8]) -> Result<bool> {
        match fs::read(path).await {
            Ok(existing) => Ok(existing == content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create directory")?;
        }
        Ok(())
    }

    /// Lines that fail to parse are skipped with a warning.
    async fn read_jsonl<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Vec<T>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to open file"),
        };

        let mut lines = BufReader::new(file).lines();
        let mut items = Vec::new();
        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(item) => items.push(item),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping invalid JSONL line"),
            }
        }
        Ok(items)
    }

    async fn append_jsonl<T: Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        self.ensure_dir(path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context("Failed to open file for append")?;

        for item in items {
            let line = serde_json::to_string(item).context("Failed to serialize item")?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for JsonFileSink {
    async fn save_identity(&self, identity: &Identity) -> Result<()> {
        let path = self.identity_file(identity.source_account_identifier());
        self.ensure_dir(&path).await?;
        let content = serde_json::to_string_pretty(identity).context("Failed to serialize JSON")?;
        fs::write(&path, content)
            .await
            .context("Failed to write file")?;
        Ok(())
    }

    async fn save_documents(&self, account: &str, documents: &[Document]) -> Result<usize> {
        let index = self.documents_file(account);
        let mut seen: HashSet<String> = self
            .read_jsonl::<DocumentRecord>(&index)
            .await?
            .into_iter()
            .map(|r| r.key)
            .collect();

        let mut records = Vec::new();
        let mut replaced = 0;
        for doc in documents {
            let key = doc.dedup_key();
            let path = self.file_path(account, &doc.filename);
            if !seen.insert(key.clone()) {
                if self.has_content(&path, &doc.content).await? {
                    debug!(filename = %doc.filename, "document already saved");
                    continue;
                }
                fs::write(&path, &doc.content)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(filename = %doc.filename, "document replaced");
                replaced += 1;
                continue;
            }
            self.ensure_dir(&path).await?;
            fs::write(&path, &doc.content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            records.push(DocumentRecord {
                key,
                filename: doc.filename.clone(),
                qualification: doc.qualification,
                source_url: doc.source_url.clone(),
            });
        }

        self.append_jsonl(&index, &records).await?;
        Ok(records.len() + replaced)
    }

    async fn save_bills(&self, account: &str, bills: &[Bill]) -> Result<usize> {
        let path = self.bills_file(account);
        let mut seen: HashSet<String> = self
            .read_bills(account)
            .await?
            .iter()
            .map(Bill::dedup_key)
            .collect();

        let fresh: Vec<&Bill> = bills
            .iter()
            .filter(|b| seen.insert(b.dedup_key()))
            .collect();
        self.append_jsonl(&path, &fresh).await?;
        Ok(fresh.len())
    }
}
