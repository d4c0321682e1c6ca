use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub const VENDOR: &str = "La Mutuelle Générale";

/// One reimbursed act. Every act of a month shares that month's statement file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub vendor: String,
    /// Reimbursement identifier from the portal.
    pub vendor_ref: String,
    /// Position of the act inside its reimbursement.
    pub act_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary: Option<String>,
    /// Payment date of the reimbursement.
    pub date: NaiveDate,
    pub care_date: NaiveDate,
    /// Amount spent by the member for this act.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<Decimal>,
    /// Amount refunded by the insurer for this act.
    pub amount: Decimal,
    /// Total refunded for the whole reimbursement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_amount: Option<Decimal>,
    pub is_third_party_payer: bool,
    pub is_refund: bool,
    pub currency: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

impl Bill {
    /// Key identifying this act across runs.
    pub fn dedup_key(&self) -> String {
        format!("{}#{}", self.vendor_ref, self.act_index)
    }
}
