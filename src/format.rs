//! Output filenames.

use chrono::{Datelike, NaiveDate};

use crate::months::MonthKey;

const FILE_VENDOR: &str = "lamutuellegenerale";

/// Filename of the consolidated statement for one month.
///
/// Depends on the month only, so a re-checked month keeps its file.
pub fn statement_filename(month: MonthKey) -> String {
    format!("{month}_{FILE_VENDOR}.pdf")
}

/// Filename of the membership card, one per calendar year.
pub fn attestation_filename(today: NaiveDate) -> String {
    format!("{}_{FILE_VENDOR}_attestation_tiers_payant.pdf", today.year())
}
