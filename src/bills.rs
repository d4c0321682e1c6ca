//! Bill assembly: joins the intercepted bill list, per-reimbursement details
//! and monthly PDF statements with the month-groups rendered on the page.
//!
//! The bill list has no month identifier. Entries are attached to a
//! month-group by matching their care date against the group's label
//! ("Mai 2023" → `2023-05`). Within a group, the n-th matched entry is
//! expanded by clicking the n-th chevron of that group. Every selected group
//! yields its statement, even when no entry matches it.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ConnectorError;
use crate::format::statement_filename;
use crate::interception::{InterceptionRegistry, PayloadTag};
use crate::models::{Bill, Document, Qualification, VENDOR};
use crate::months::{parse_month_label, MonthKey};
use crate::normalize::{deserialize_amount_opt, deserialize_date_opt};
use crate::planner::FetchPlan;
use crate::portal::{selectors, Portal};

/// One reimbursement as listed in the bill list payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillListEntry {
    #[serde(deserialize_with = "deserialize_id")]
    pub id_remboursement: String,
    #[serde(default, deserialize_with = "deserialize_date_opt")]
    pub date_soins: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_date_opt")]
    pub date_remboursement: Option<NaiveDate>,
    #[serde(default)]
    pub beneficiaire: Option<Beneficiary>,
    #[serde(default, deserialize_with = "deserialize_amount_opt")]
    pub montant_rembourse: Option<Decimal>,
    #[serde(default)]
    pub tiers_payant: bool,
    #[serde(default)]
    pub libelle: Option<String>,
}

impl BillListEntry {
    /// Whether this entry's care date falls in `month`.
    pub fn is_in(&self, month: MonthKey) -> bool {
        self.date_soins.is_some_and(|d| month.contains(d))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Beneficiary {
    Name(String),
    Person {
        #[serde(default)]
        prenom: Option<String>,
        #[serde(default)]
        nom: Option<String>,
    },
}

impl Beneficiary {
    pub fn display_name(&self) -> Option<String> {
        let name = match self {
            Beneficiary::Name(name) => name.trim().to_string(),
            Beneficiary::Person { prenom, nom } => [prenom, nom]
                .into_iter()
                .flatten()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
        };
        (!name.is_empty()).then_some(name)
    }
}

/// Detail of one reimbursement, loaded when its chevron is expanded.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillDetail {
    #[serde(default, deserialize_with = "deserialize_id_opt")]
    pub id_remboursement: Option<String>,
    #[serde(default, deserialize_with = "deserialize_date_opt")]
    pub date_virement: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_amount_opt")]
    pub montant_total_rembourse: Option<Decimal>,
    #[serde(default)]
    pub tiers_payant: Option<bool>,
    #[serde(default)]
    pub actes: Vec<Act>,
}

/// One line item of a reimbursement.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Act {
    #[serde(default, deserialize_with = "deserialize_date_opt")]
    pub date_soins: Option<NaiveDate>,
    #[serde(default)]
    pub libelle: Option<String>,
    #[serde(default)]
    pub beneficiaire: Option<Beneficiary>,
    #[serde(default, deserialize_with = "deserialize_amount_opt")]
    pub montant_depense: Option<Decimal>,
    #[serde(default, deserialize_with = "deserialize_amount_opt")]
    pub montant_rembourse: Option<Decimal>,
}

/// A consolidated monthly statement as intercepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PdfEdition {
    contenu: String,
    #[serde(default)]
    url: Option<String>,
}

/// Everything produced for one month-group.
#[derive(Debug, Clone)]
pub struct MonthStatement {
    pub month: MonthKey,
    pub label: String,
    pub document: Document,
    pub bills: Vec<Bill>,
}

/// Parse the bill list payload: either `{"remboursements": [...]}` or a bare array.
pub fn parse_bill_list(payload: &Value) -> Result<Vec<BillListEntry>> {
    let entries = match payload {
        Value::Array(_) => payload.clone(),
        Value::Object(map) => map.get("remboursements").cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    };
    if entries.is_null() {
        return Err(invalid(PayloadTag::BillList, "missing remboursements list"));
    }
    serde_json::from_value(entries).map_err(|e| invalid(PayloadTag::BillList, e))
}

/// Entries of `list` whose care date falls in `month`, in list order.
pub fn entries_for_month(list: &[BillListEntry], month: MonthKey) -> Vec<&BillListEntry> {
    list.iter().filter(|entry| entry.is_in(month)).collect()
}

/// Build one bill per act, merging the detail over the list entry.
pub fn bills_for_entry(
    entry: &BillListEntry,
    detail: &BillDetail,
    filename: &str,
    file_url: Option<&str>,
) -> Result<Vec<Bill>> {
    let vendor_ref = detail
        .id_remboursement
        .clone()
        .unwrap_or_else(|| entry.id_remboursement.clone());
    let shared_beneficiary = entry.beneficiaire.as_ref().and_then(Beneficiary::display_name);
    let group_amount = detail.montant_total_rembourse.or(entry.montant_rembourse);
    let is_third_party_payer = detail.tiers_payant.unwrap_or(entry.tiers_payant);

    let mut bills = Vec::with_capacity(detail.actes.len());
    for (act_index, act) in detail.actes.iter().enumerate() {
        let care_date = act
            .date_soins
            .or(entry.date_soins)
            .ok_or_else(|| invalid(PayloadTag::BillDetail, format!("{vendor_ref}: act without care date")))?;
        let amount = act.montant_rembourse.ok_or_else(|| {
            invalid(PayloadTag::BillDetail, format!("{vendor_ref}: act without refunded amount"))
        })?;
        let date = match detail.date_virement.or(entry.date_remboursement) {
            Some(date) => date,
            None => {
                warn!(vendor_ref = %vendor_ref, "no payment date, using care date");
                care_date
            }
        };

        bills.push(Bill {
            vendor: VENDOR.to_string(),
            vendor_ref: vendor_ref.clone(),
            act_index,
            beneficiary: act
                .beneficiaire
                .as_ref()
                .and_then(Beneficiary::display_name)
                .or_else(|| shared_beneficiary.clone()),
            date,
            care_date,
            original_amount: act.montant_depense,
            amount,
            group_amount,
            is_third_party_payer,
            is_refund: true,
            currency: "EUR".to_string(),
            kind: "health_costs".to_string(),
            subtype: act.libelle.clone().or_else(|| entry.libelle.clone()),
            filename: filename.to_string(),
            file_url: file_url.map(str::to_string),
        });
    }
    Ok(bills)
}

/// Drives the reimbursements page and assembles monthly statements.
pub struct BillAssembler<'a, P: Portal + ?Sized> {
    portal: &'a P,
    registry: &'a InterceptionRegistry,
    timeout: Duration,
    element_timeout: Duration,
}

impl<'a, P: Portal + ?Sized> BillAssembler<'a, P> {
    pub fn new(portal: &'a P, registry: &'a InterceptionRegistry, timeout: Duration) -> Self {
        Self {
            portal,
            registry,
            timeout,
            element_timeout: timeout,
        }
    }

    pub fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    /// Open the reimbursements page and read the bill list, once per run.
    pub async fn open(&self) -> Result<Vec<BillListEntry>> {
        self.registry.clear(PayloadTag::BillList);
        self.portal.click(selectors::REIMBURSEMENTS_LINK).await?;
        self.portal
            .wait_for_element(selectors::MONTH_GROUP, self.element_timeout)
            .await?;
        let payload = self
            .registry
            .await_and_reset(PayloadTag::BillList, self.timeout)
            .await?;
        let list = parse_bill_list(&payload)?;
        info!(entries = list.len(), "bill list intercepted");
        Ok(list)
    }

    /// Assemble the month-groups selected by `plan`, most recent first.
    pub async fn assemble(&self, list: &[BillListEntry], plan: FetchPlan) -> Result<Vec<MonthStatement>> {
        let labels = self.portal.texts(selectors::MONTH_GROUP_LABEL).await?;
        let count = plan.month_count(labels.len());
        info!(available = labels.len(), selected = count, "month-groups");

        let mut seen = HashSet::new();
        let mut statements = Vec::new();
        for (group_index, label) in labels.iter().take(count).enumerate() {
            statements.push(self.assemble_month(group_index, label, list, &mut seen).await?);
        }
        Ok(statements)
    }

    async fn assemble_month(
        &self,
        group_index: usize,
        label: &str,
        list: &[BillListEntry],
        seen: &mut HashSet<String>,
    ) -> Result<MonthStatement> {
        let month = parse_month_label(label)
            .with_context(|| format!("Month-group #{group_index} has an unexpected label"))?;

        let (content, source_url) = self.download_statement(group_index).await?;
        let filename = statement_filename(month);
        let mut document = Document::new(filename.clone(), Qualification::HealthInvoice, content);
        if let Some(url) = &source_url {
            document = document.with_source_url(url.clone());
        }

        let matched = entries_for_month(list, month);
        if matched.is_empty() {
            debug!(month = %month, "no bill list entries for month-group");
        }
        let mut bills = Vec::new();
        for (entry_index, entry) in matched.into_iter().enumerate() {
            self.registry.clear(PayloadTag::BillDetail);
            self.portal
                .click_within(selectors::MONTH_GROUP, group_index, selectors::DETAIL_CHEVRON, entry_index)
                .await?;
            let payload = self
                .registry
                .await_and_reset(PayloadTag::BillDetail, self.timeout)
                .await?;
            let detail: BillDetail = serde_json::from_value(payload)
                .map_err(|e| invalid(PayloadTag::BillDetail, e))?;

            for bill in bills_for_entry(entry, &detail, &filename, source_url.as_deref())? {
                if seen.insert(bill.dedup_key()) {
                    bills.push(bill);
                } else {
                    debug!(key = %bill.dedup_key(), "act already emitted");
                }
            }
        }

        self.registry.clear(PayloadTag::PdfEdition);
        self.registry.clear(PayloadTag::BillDetail);
        info!(month = %month, bills = bills.len(), file = %filename, "month-group assembled");

        Ok(MonthStatement {
            month,
            label: label.to_string(),
            document,
            bills,
        })
    }

    async fn download_statement(&self, group_index: usize) -> Result<(Vec<u8>, Option<String>)> {
        self.registry.clear(PayloadTag::PdfEdition);
        self.portal
            .click_within(selectors::MONTH_GROUP, group_index, selectors::MONTH_PDF_BUTTON, 0)
            .await?;
        let payload = self
            .registry
            .await_and_reset(PayloadTag::PdfEdition, self.timeout)
            .await?;
        decode_pdf(PayloadTag::PdfEdition, payload)
    }
}

/// Decode a `{contenu, url?}` PDF payload into its bytes and source URL.
pub fn decode_pdf(tag: PayloadTag, payload: Value) -> Result<(Vec<u8>, Option<String>)> {
    let edition: PdfEdition = serde_json::from_value(payload).map_err(|e| invalid(tag, e))?;
    let content = base64::engine::general_purpose::STANDARD
        .decode(edition.contenu.trim())
        .map_err(|e| invalid(tag, e))?;
    if content.is_empty() {
        return Err(invalid(tag, "empty document"));
    }
    Ok((content, edition.url))
}

fn invalid(tag: PayloadTag, reason: impl ToString) -> anyhow::Error {
    ConnectorError::InvalidPayload {
        tag,
        reason: reason.to_string(),
    }
    .into()
}

fn id_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(value).ok_or_else(|| serde::de::Error::custom("missing reimbursement id"))
}

fn deserialize_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(id_from_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn sample_list() -> Vec<BillListEntry> {
        parse_bill_list(&json!({
            "remboursements": [
                { "idRemboursement": "R1", "dateSoins": "2023-05-10", "dateRemboursement": "2023-05-20",
                  "beneficiaire": { "prenom": "Jean", "nom": "Dupont" }, "montantRembourse": "25,00",
                  "tiersPayant": false, "libelle": "Consultation" },
                { "idRemboursement": 2, "dateSoins": "2023-06-01", "montantRembourse": 10 }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn bill_list_accepts_wrapped_and_bare_arrays() {
        assert_eq!(sample_list().len(), 2);
        assert_eq!(sample_list()[1].id_remboursement, "2");
        let bare = parse_bill_list(&json!([{ "idRemboursement": "X", "dateSoins": "01/02/2024" }])).unwrap();
        assert_eq!(bare[0].date_soins, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(parse_bill_list(&json!({ "autre": [] })).is_err());
    }

    #[test]
    fn month_label_join_selects_only_matching_care_dates() {
        let list = sample_list();
        let may = parse_month_label("Mai 2023").unwrap();
        let selected = entries_for_month(&list, may);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id_remboursement, "R1");
    }

    #[test]
    fn one_bill_per_act_sharing_the_statement() {
        let list = sample_list();
        let detail: BillDetail = serde_json::from_value(json!({
            "idRemboursement": "R1",
            "dateVirement": "2023-05-22",
            "actes": [
                { "dateSoins": "2023-05-10", "libelle": "Consultation", "montantDepense": "30,00", "montantRembourse": "20,00" },
                { "libelle": "Pharmacie", "montantDepense": 8.5, "montantRembourse": 5 }
            ]
        }))
        .unwrap();

        let bills = bills_for_entry(&list[0], &detail, "2023-05_x.pdf", Some("https://x/edition")).unwrap();
        assert_eq!(bills.len(), 2);
        assert!(bills.iter().all(|b| b.filename == "2023-05_x.pdf"));
        assert!(bills.iter().all(|b| b.date == NaiveDate::from_ymd_opt(2023, 5, 22).unwrap()));
        assert_eq!(bills[0].amount, dec("20"));
        assert_eq!(bills[1].amount, dec("5"));
        assert_eq!(bills[1].original_amount, Some(dec("8.5")));
        assert_eq!(bills[1].care_date, NaiveDate::from_ymd_opt(2023, 5, 10).unwrap());
        assert_eq!(bills[0].group_amount, Some(dec("25")));
        assert_eq!(bills[0].beneficiary.as_deref(), Some("Jean Dupont"));
        assert_ne!(bills[0].dedup_key(), bills[1].dedup_key());
    }

    #[test]
    fn act_without_refund_is_invalid() {
        let list = sample_list();
        let detail: BillDetail =
            serde_json::from_value(json!({ "actes": [{ "dateSoins": "2023-05-10" }] })).unwrap();
        let err = bills_for_entry(&list[0], &detail, "f.pdf", None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::InvalidPayload { tag: PayloadTag::BillDetail, .. })
        ));
    }

    #[test]
    fn payment_date_falls_back_to_list_then_care_date() {
        let list = sample_list();
        let detail: BillDetail =
            serde_json::from_value(json!({ "actes": [{ "montantRembourse": 1 }] })).unwrap();
        let bills = bills_for_entry(&list[0], &detail, "f.pdf", None).unwrap();
        assert_eq!(bills[0].date, NaiveDate::from_ymd_opt(2023, 5, 20).unwrap());
        assert_eq!(bills[0].vendor_ref, "R1");

        let bills = bills_for_entry(&list[1], &detail, "f.pdf", None).unwrap();
        assert_eq!(bills[0].date, NaiveDate::from_ymd_opt(2023, 6, 1).unwrap());
    }

    #[test]
    fn pdf_payload_decodes_content_and_url() {
        let (content, url) = decode_pdf(
            PayloadTag::PdfEdition,
            json!({ "contenu": "JVBERi0=", "url": "https://x/edition/1" }),
        )
        .unwrap();
        assert_eq!(content, b"%PDF-");
        assert_eq!(url.as_deref(), Some("https://x/edition/1"));

        assert!(decode_pdf(PayloadTag::AttestationPdf, json!({ "contenu": "" })).is_err());
        assert!(decode_pdf(PayloadTag::PdfEdition, json!({ "contenu": "not base64!" })).is_err());
    }
}
