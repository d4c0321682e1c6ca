use serde::{Deserialize, Serialize};
use std::fmt;

/// Qualification label attached to every saved file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qualification {
    HealthInvoice,
    HealthInsuranceCard,
}

impl Qualification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Qualification::HealthInvoice => "health_invoice",
            Qualification::HealthInsuranceCard => "health_insurance_card",
        }
    }
}

impl fmt::Display for Qualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file handed to the sink, e.g. a monthly reimbursement statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub filename: String,
    pub qualification: Qualification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip)]
    pub content: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, qualification: Qualification, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            qualification,
            source_url: None,
            content,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    /// Deduplication key: filename, plus the source URL when known.
    pub fn dedup_key(&self) -> String {
        match &self.source_url {
            Some(url) => format!("{}|{url}", self.filename),
            None => self.filename.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_includes_source_url_when_present() {
        let doc = Document::new("a.pdf", Qualification::HealthInvoice, Vec::new());
        assert_eq!(doc.dedup_key(), "a.pdf");
        let doc = doc.with_source_url("https://x/edition/1");
        assert_eq!(doc.dedup_key(), "a.pdf|https://x/edition/1");
    }
}
