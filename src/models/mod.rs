//! Normalized records produced by the connector.

mod bill;
mod document;
mod identity;
mod run;

pub use bill::{Bill, VENDOR};
pub use document::{Document, Qualification};
pub use identity::{Address, Identity, PersonName, Phone, PhoneKind};
pub use run::{LastRun, RunOutcome};
