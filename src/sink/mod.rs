//! Destinations for what a run collects.

mod json_file;
mod memory;

pub use json_file::JsonFileSink;
pub use memory::MemorySink;

use anyhow::Result;

use crate::models::{Bill, Document, Identity};

/// Sink for identities, statement files and bills.
///
/// Saving is idempotent: bills are skipped when their vendor reference and
/// act index were already saved for the account. A document whose dedup key
/// was already saved is skipped when its content is unchanged and replaced
/// otherwise.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn save_identity(&self, identity: &Identity) -> Result<()>;

    /// Returns how many documents were written, new or replaced.
    async fn save_documents(&self, account: &str, documents: &[Document]) -> Result<usize>;

    /// Returns how many bills were newly saved.
    async fn save_bills(&self, account: &str, bills: &[Bill]) -> Result<usize>;
}
