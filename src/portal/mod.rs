//! The browser host the connector drives.
//!
//! [`Portal`] exposes the small set of primitives the connector needs from a
//! browser-automation runtime. [`ChromePortal`] implements them on top of
//! Chromium; tests use a scripted in-memory implementation.

#[cfg(feature = "chrome")]
mod chrome;
pub mod selectors;

#[cfg(feature = "chrome")]
pub use chrome::{ChromePortal, ChromeSettings};

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::error::ConnectorError;

/// Interval between DOM checks while waiting for an element.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Browser-automation primitives.
#[async_trait]
pub trait Portal: Send + Sync {
    /// Navigate and wait for the document to load.
    async fn goto(&self, url: &str) -> Result<()>;

    async fn reload(&self) -> Result<()>;

    /// Whether at least one element matches `selector`.
    async fn is_present(&self, selector: &str) -> Result<bool>;

    async fn click(&self, selector: &str) -> Result<()> {
        self.click_nth(selector, 0).await
    }

    /// Click the `index`-th element matching `selector`.
    async fn click_nth(&self, selector: &str, index: usize) -> Result<()>;

    /// Click the `index`-th `selector` match inside the `scope_index`-th
    /// element matching `scope`.
    async fn click_within(
        &self,
        scope: &str,
        scope_index: usize,
        selector: &str,
        index: usize,
    ) -> Result<()>;

    /// Replace the value of an input.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Visible text of every element matching `selector`, in document order.
    async fn texts(&self, selector: &str) -> Result<Vec<String>>;

    /// Run `script` in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Run `script` in every document loaded from now on.
    async fn add_init_script(&self, script: &str) -> Result<()>;

    /// Override the client identification string.
    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    /// Show or hide the browser to the end user.
    async fn set_visible(&self, visible: bool) -> Result<()>;

    /// Interval used by the default polling waits.
    fn poll_interval(&self) -> Duration {
        DEFAULT_POLL_INTERVAL
    }

    /// Wait until `selector` is present.
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> Result<()> {
        wait_for_any(self, &[selector], Some(timeout)).await.map(|_| ())
    }
}

/// Wait until one of `selectors` is present; returns the index of the first
/// one found. `None` waits forever.
pub async fn wait_for_any<P: Portal + ?Sized>(
    portal: &P,
    selectors: &[&str],
    timeout: Option<Duration>,
) -> Result<usize> {
    let deadline = timeout.map(|t| Instant::now() + t);
    loop {
        for (i, selector) in selectors.iter().enumerate() {
            if portal.is_present(selector).await? {
                return Ok(i);
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ConnectorError::ElementTimeout {
                selector: selectors.join(", "),
            }
            .into());
        }
        tokio::time::sleep(portal.poll_interval()).await;
    }
}

/// Click `trigger` then wait for `target` to appear.
pub async fn click_and_wait<P: Portal + ?Sized>(
    portal: &P,
    trigger: &str,
    target: &str,
    timeout: Duration,
) -> Result<()> {
    portal.click(trigger).await?;
    portal.wait_for_element(target, timeout).await
}
