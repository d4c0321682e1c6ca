//! In-memory sink for testing.

use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::models::{Bill, Document, Identity};

use super::Sink;

#[derive(Default)]
pub struct MemorySink {
    identities: Mutex<HashMap<String, Identity>>,
    documents: Mutex<HashMap<String, Vec<Document>>>,
    bills: Mutex<HashMap<String, Vec<Bill>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn identity(&self, account: &str) -> Option<Identity> {
        self.identities.lock().await.get(account).cloned()
    }

    pub async fn documents(&self, account: &str) -> Vec<Document> {
        self.documents.lock().await.get(account).cloned().unwrap_or_default()
    }

    pub async fn bills(&self, account: &str) -> Vec<Bill> {
        self.bills.lock().await.get(account).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn save_identity(&self, identity: &Identity) -> Result<()> {
        let mut identities = self.identities.lock().await;
        identities.insert(identity.source_account_identifier().to_string(), identity.clone());
        Ok(())
    }

    async fn save_documents(&self, account: &str, documents: &[Document]) -> Result<usize> {
        let mut all = self.documents.lock().await;
        let saved = all.entry(account.to_string()).or_default();
        let mut added = 0;
        for doc in documents {
            match saved.iter_mut().find(|d| d.dedup_key() == doc.dedup_key()) {
                Some(existing) if existing.content == doc.content => continue,
                Some(existing) => *existing = doc.clone(),
                None => saved.push(doc.clone()),
            }
            added += 1;
        }
        Ok(added)
    }

    async fn save_bills(&self, account: &str, bills: &[Bill]) -> Result<usize> {
        let mut all = self.bills.lock().await;
        let saved = all.entry(account.to_string()).or_default();
        let mut added = 0;
        for bill in bills {
            if saved.iter().any(|b| b.dedup_key() == bill.dedup_key()) {
                continue;
            }
            saved.push(bill.clone());
            added += 1;
        }
        Ok(added)
    }
}
