//! Incremental fetch planning from the previous run's metadata.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::clock::PORTAL_TZ;
use crate::models::{LastRun, RunOutcome};
use crate::months::months_between;

/// Default age after which an incremental run is no longer trusted.
pub const DEFAULT_FULL_FETCH_AFTER: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Facts about the previous run, derived once when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub last_execution: Option<DateTime<Utc>>,
    pub last_outcome: Option<RunOutcome>,
    pub force_full_fetch: bool,
}

impl RunContext {
    /// Derive the context from the stored last run.
    ///
    /// A full fetch is forced when nothing was recorded, when the last run is
    /// at least `full_fetch_after` old, or when it failed.
    pub fn derive(last: Option<&LastRun>, now: DateTime<Utc>, full_fetch_after: Duration) -> Self {
        let Some(last) = last else {
            return Self {
                last_execution: None,
                last_outcome: None,
                force_full_fetch: true,
            };
        };

        let age = (now - last.at).to_std().unwrap_or(Duration::ZERO);
        let force_full_fetch = age >= full_fetch_after || last.outcome == RunOutcome::Failure;

        Self {
            last_execution: Some(last.at),
            last_outcome: Some(last.outcome),
            force_full_fetch,
        }
    }

    /// Force a backfill regardless of history (e.g. `--full`).
    pub fn forcing_full_fetch(mut self) -> Self {
        self.force_full_fetch = true;
        self
    }
}

/// How many month-groups to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FetchPlan {
    /// Every month-group rendered on the page.
    Full,
    /// Only the most recent `months` month-groups.
    Recent { months: u32 },
}

impl FetchPlan {
    pub fn for_context(ctx: &RunContext, now: DateTime<Utc>) -> Self {
        let plan = match ctx.last_execution {
            Some(last) if !ctx.force_full_fetch => {
                let months = months_between(
                    now.with_timezone(&PORTAL_TZ).date_naive(),
                    last.with_timezone(&PORTAL_TZ).date_naive(),
                );
                // +1 re-checks the current month for late entries.
                FetchPlan::Recent {
                    months: months.saturating_add(1),
                }
            }
            _ => FetchPlan::Full,
        };
        info!(plan = ?plan, last_execution = ?ctx.last_execution, "fetch plan");
        plan
    }

    /// Number of month-groups to process out of `available`.
    pub fn month_count(&self, available: usize) -> usize {
        match self {
            FetchPlan::Full => available,
            FetchPlan::Recent { months } => {
                usize::try_from(*months).map_or(available, |m| m.min(available))
            }
        }
    }
}
