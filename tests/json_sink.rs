use anyhow::Result;
use chrono::NaiveDate;
use mutuelle_sync::models::{
    Address, Bill, Document, Identity, PersonName, Qualification, VENDOR,
};
use mutuelle_sync::sink::{JsonFileSink, Sink};
use rust_decimal::Decimal;
use tempfile::TempDir;

fn bill(vendor_ref: &str, act_index: usize) -> Bill {
    Bill {
        vendor: VENDOR.to_string(),
        vendor_ref: vendor_ref.to_string(),
        act_index,
        beneficiary: None,
        date: NaiveDate::from_ymd_opt(2023, 5, 20).unwrap(),
        care_date: NaiveDate::from_ymd_opt(2023, 5, 10).unwrap(),
        original_amount: None,
        amount: Decimal::new(1250, 2),
        group_amount: None,
        is_third_party_payer: false,
        is_refund: true,
        currency: "EUR".to_string(),
        kind: "health_costs".to_string(),
        subtype: None,
        filename: "2023-05_lamutuellegenerale.pdf".to_string(),
        file_url: None,
    }
}

#[tokio::test]
async fn identity_is_written_under_the_account() -> Result<()> {
    let dir = TempDir::new()?;
    let sink = JsonFileSink::new(dir.path());
    let identity = Identity {
        email: "a@b.fr".to_string(),
        birth_date: NaiveDate::from_ymd_opt(1980, 1, 1),
        name: PersonName {
            given_name: Some("A".to_string()),
            family_name: Some("B".to_string()),
        },
        address: vec![Address {
            post_code: Some("75001".to_string()),
            city: Some("Paris".to_string()),
            formatted_address: "75001 Paris ".to_string(),
            ..Default::default()
        }],
        phone: Vec::new(),
    };

    sink.save_identity(&identity).await?;

    let raw = std::fs::read_to_string(sink.account_dir("a@b.fr").join("identity.json"))?;
    assert!(raw.contains("\"birthDate\": \"1980-01-01\""));
    assert!(raw.contains("\"formattedAddress\": \"75001 Paris \""));
    assert!(!raw.contains("phone"));
    assert_eq!(sink.read_identity("a@b.fr").await?, Some(identity));
    Ok(())
}

#[tokio::test]
async fn documents_are_written_once_across_sink_instances() -> Result<()> {
    let dir = TempDir::new()?;
    let doc = Document::new(
        "2023-05_lamutuellegenerale.pdf",
        Qualification::HealthInvoice,
        b"%PDF-1".to_vec(),
    )
    .with_source_url("https://x/edition/05");

    let first = JsonFileSink::new(dir.path());
    assert_eq!(first.save_documents("a@b.fr", &[doc.clone()]).await?, 1);
    let path = first.file_path("a@b.fr", &doc.filename);
    assert_eq!(std::fs::read(&path)?, b"%PDF-1");

    let second = JsonFileSink::new(dir.path());
    assert_eq!(second.save_documents("a@b.fr", &[doc.clone()]).await?, 0);

    // Same filename from another source document is a different file record.
    let other = Document::new(doc.filename.clone(), Qualification::HealthInvoice, b"%PDF-2".to_vec())
        .with_source_url("https://x/edition/05-bis");
    assert_eq!(second.save_documents("a@b.fr", &[other]).await?, 1);
    Ok(())
}

#[tokio::test]
async fn bills_are_appended_without_duplicates() -> Result<()> {
    let dir = TempDir::new()?;
    let sink = JsonFileSink::new(dir.path());

    assert_eq!(sink.save_bills("a@b.fr", &[bill("R1", 0), bill("R1", 1)]).await?, 2);
    assert_eq!(sink.save_bills("a@b.fr", &[bill("R1", 1), bill("R2", 0), bill("R2", 0)]).await?, 1);

    let keys: Vec<String> = sink.read_bills("a@b.fr").await?.iter().map(Bill::dedup_key).collect();
    assert_eq!(keys, vec!["R1#0", "R1#1", "R2#0"]);

    let raw = std::fs::read_to_string(sink.account_dir("a@b.fr").join("bills.jsonl"))?;
    assert!(raw.lines().all(|l| l.contains("\"type\":\"health_costs\"")));
    Ok(())
}

#[tokio::test]
async fn invalid_bill_lines_are_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let sink = JsonFileSink::new(dir.path());
    sink.save_bills("a@b.fr", &[bill("R1", 0)]).await?;

    let path = sink.account_dir("a@b.fr").join("bills.jsonl");
    let mut raw = std::fs::read_to_string(&path)?;
    raw.push_str("{not json}\n");
    std::fs::write(&path, raw)?;

    assert_eq!(sink.read_bills("a@b.fr").await?.len(), 1);
    assert_eq!(sink.save_bills("a@b.fr", &[bill("R1", 0)]).await?, 0);
    Ok(())
}

#[test]
fn account_dirs_cannot_escape_the_data_dir() {
    let sink = JsonFileSink::new("/data");
    let dir = sink.account_dir("../../etc");
    assert!(dir.starts_with("/data"));
    assert!(!dir.components().any(|c| matches!(c, std::path::Component::ParentDir)));
}
