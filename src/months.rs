//! Calendar-month helpers: French month labels and month arithmetic.

use std::fmt;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use regex::Regex;

/// A calendar month, the join key between DOM month-groups and bill entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// `yyyy-MM` prefix matched against ISO care dates.
    pub fn prefix(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        MonthKey::of(date) == *self
    }

    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix())
    }
}

const FRENCH_MONTHS: [&str; 12] = [
    "janvier",
    "fevrier",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "aout",
    "septembre",
    "octobre",
    "novembre",
    "decembre",
];

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\p{L}+)\.?\s+(\d{4})\s*$").expect("month label regex is valid")
    })
}

fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'û' | 'ù' | 'ü' => 'u',
            'à' | 'â' => 'a',
            'ô' => 'o',
            'î' | 'ï' => 'i',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Parse a month-group label such as "Mai 2023" or "février 2024".
pub fn parse_month_label(label: &str) -> Result<MonthKey> {
    let caps = label_regex()
        .captures(label)
        .with_context(|| format!("Unrecognized month label: {label:?}"))?;
    let name = fold_accents(&caps[1].to_lowercase());
    let index = FRENCH_MONTHS
        .iter()
        .position(|m| *m == name)
        .with_context(|| format!("Unknown month name in label: {label:?}"))?;
    let year: i32 = caps[2]
        .parse()
        .with_context(|| format!("Invalid year in label: {label:?}"))?;
    Ok(MonthKey {
        year,
        month: index as u32 + 1,
    })
}

/// Number of calendar-month boundaries between `earlier` and `later`.
///
/// January 31st to February 1st counts as one month. Returns 0 when `later`
/// precedes `earlier`.
pub fn months_between(later: NaiveDate, earlier: NaiveDate) -> u32 {
    let diff = MonthKey::of(later).ordinal() - MonthKey::of(earlier).ordinal();
    u32::try_from(diff.max(0)).unwrap_or(u32::MAX)
}
