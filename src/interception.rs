//! Per-session registry of intercepted network payloads.
//!
//! The browser host pushes every JSON body whose URL matches a [`PayloadTag`]
//! pattern into that tag's channel. The control flow waits on a channel with
//! [`InterceptionRegistry::await_payload`], which consumes the oldest entry.
//! Before triggering a page action whose response it needs, the control flow
//! calls [`InterceptionRegistry::clear`] so a leftover body from an earlier
//! action cannot satisfy the wait.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ConnectorError;

/// Source of an intercepted payload, keyed by URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadTag {
    PersonalInfo,
    BillList,
    BillDetail,
    PdfEdition,
    AttestationPdf,
}

impl PayloadTag {
    pub const ALL: [PayloadTag; 5] = [
        PayloadTag::PersonalInfo,
        PayloadTag::BillList,
        PayloadTag::BillDetail,
        PayloadTag::PdfEdition,
        PayloadTag::AttestationPdf,
    ];

    /// URL fragment identifying responses for this tag.
    pub fn url_pattern(&self) -> &'static str {
        match self {
            PayloadTag::PersonalInfo => "/moncompte/infosPersonnelles",
            PayloadTag::BillList => "/remboursements/liste",
            PayloadTag::BillDetail => "/remboursements/detail",
            PayloadTag::PdfEdition => "/remboursements/edition",
            PayloadTag::AttestationPdf => "/attestation",
        }
    }

    /// Tag whose pattern matches `url`, if any.
    pub fn for_url(url: &str) -> Option<PayloadTag> {
        PayloadTag::ALL
            .into_iter()
            .find(|tag| url.contains(tag.url_pattern()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadTag::PersonalInfo => "personalInfo",
            PayloadTag::BillList => "billList",
            PayloadTag::BillDetail => "billDetail",
            PayloadTag::PdfEdition => "pdf",
            PayloadTag::AttestationPdf => "attestationPdf",
        }
    }
}

impl fmt::Display for PayloadTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Channel {
    queue: Mutex<VecDeque<Value>>,
    notify: Notify,
}

/// Named channels, one per [`PayloadTag`], owned by a single session.
pub struct InterceptionRegistry {
    channels: HashMap<PayloadTag, Channel>,
}

impl InterceptionRegistry {
    pub fn new() -> Self {
        let channels = PayloadTag::ALL
            .into_iter()
            .map(|tag| (tag, Channel::default()))
            .collect();
        Self { channels }
    }

    fn channel(&self, tag: PayloadTag) -> &Channel {
        // Every tag gets a channel in `new`.
        &self.channels[&tag]
    }

    /// Append a payload and wake the waiter, if any.
    pub fn push(&self, tag: PayloadTag, payload: Value) {
        let channel = self.channel(tag);
        let depth = {
            let mut queue = lock(&channel.queue);
            queue.push_back(payload);
            queue.len()
        };
        if depth > 1 {
            warn!(tag = %tag, depth, "more than one pending intercepted payload");
        } else {
            debug!(tag = %tag, "payload intercepted");
        }
        channel.notify.notify_one();
    }

    /// Route a response by URL. Returns the tag it was stored under.
    pub fn push_for_url(&self, url: &str, payload: Value) -> Option<PayloadTag> {
        let tag = PayloadTag::for_url(url)?;
        self.push(tag, payload);
        Some(tag)
    }

    /// Remove and return the oldest pending payload.
    pub fn take(&self, tag: PayloadTag) -> Option<Value> {
        lock(&self.channel(tag).queue).pop_front()
    }

    /// Drop every pending payload for `tag`; returns how many were dropped.
    pub fn clear(&self, tag: PayloadTag) -> usize {
        let mut queue = lock(&self.channel(tag).queue);
        let dropped = queue.len();
        queue.clear();
        if dropped > 0 {
            debug!(tag = %tag, dropped, "cleared stale intercepted payloads");
        }
        dropped
    }

    pub fn pending(&self, tag: PayloadTag) -> usize {
        lock(&self.channel(tag).queue).len()
    }

    /// Wait for the next payload on `tag`, consuming it.
    ///
    /// Fails with [`ConnectorError::InterceptionTimeout`] once `timeout` elapses.
    pub async fn await_payload(&self, tag: PayloadTag, timeout: Duration) -> Result<Value> {
        let channel = self.channel(tag);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.take(tag) {
                return Ok(payload);
            }
            if tokio::time::timeout_at(deadline, channel.notify.notified())
                .await
                .is_err()
            {
                // A push can land between the last check and the deadline.
                if let Some(payload) = self.take(tag) {
                    return Ok(payload);
                }
                return Err(ConnectorError::InterceptionTimeout { tag }.into());
            }
        }
    }

    /// Like [`await_payload`](Self::await_payload), then drop anything else
    /// queued behind it so the next step starts from an empty channel.
    pub async fn await_and_reset(&self, tag: PayloadTag, timeout: Duration) -> Result<Value> {
        let payload = self.await_payload(tag, timeout).await?;
        self.clear(tag);
        Ok(payload)
    }
}

impl Default for InterceptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // A poisoned queue still holds valid JSON values.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
