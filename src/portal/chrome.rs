//! Chromium-backed portal with network response interception.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams, RequestId,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Portal, DEFAULT_POLL_INTERVAL};
use crate::interception::{InterceptionRegistry, PayloadTag};

/// How Chromium is launched.
#[derive(Debug, Clone)]
pub struct ChromeSettings {
    /// Explicit executable; looked up on PATH and in common locations otherwise.
    pub chrome_path: Option<String>,
    pub headless: bool,
    /// Profile directory so cookies survive between runs.
    pub profile_dir: PathBuf,
    pub poll_interval: Duration,
}

impl ChromeSettings {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            chrome_path: None,
            headless: false,
            profile_dir: profile_dir.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A single Chromium tab feeding intercepted payloads into a registry.
pub struct ChromePortal {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    intercept_task: JoinHandle<()>,
    headless: bool,
    visible: AtomicBool,
    poll_interval: Duration,
}

impl ChromePortal {
    /// Launch the browser and register interception before any navigation.
    pub async fn launch(settings: &ChromeSettings, registry: Arc<InterceptionRegistry>) -> Result<Self> {
        let (browser, mut handler) = launch_browser(settings).await?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser.new_page("about:blank").await?;
        let intercept_task = start_interception(&page, registry).await?;

        Ok(Self {
            browser,
            page,
            handler_task,
            intercept_task,
            headless: settings.headless,
            visible: AtomicBool::new(false),
            poll_interval: settings.poll_interval,
        })
    }

    /// Close the browser and stop background tasks.
    pub async fn close(mut self) -> Result<()> {
        self.intercept_task.abort();
        self.browser.close().await.ok();
        self.handler_task.abort();
        Ok(())
    }
}

#[async_trait]
impl Portal for ChromePortal {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.page
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.page.reload().await.context("Failed to reload page")?;
        Ok(())
    }

    async fn is_present(&self, selector: &str) -> Result<bool> {
        // find_elements errors while the document is being replaced.
        Ok(self
            .page
            .find_elements(selector)
            .await
            .map(|els| !els.is_empty())
            .unwrap_or(false))
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<()> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("Failed to query {selector:?}"))?;
        let element = elements
            .get(index)
            .with_context(|| format!("No element #{index} for {selector:?} ({} found)", elements.len()))?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to click {selector:?} #{index}"))?;
        Ok(())
    }

    async fn click_within(
        &self,
        scope: &str,
        scope_index: usize,
        selector: &str,
        index: usize,
    ) -> Result<()> {
        let scopes = self
            .page
            .find_elements(scope)
            .await
            .with_context(|| format!("Failed to query {scope:?}"))?;
        let container = scopes.get(scope_index).with_context(|| {
            format!("No element #{scope_index} for {scope:?} ({} found)", scopes.len())
        })?;
        let elements = container
            .find_elements(selector)
            .await
            .with_context(|| format!("Failed to query {selector:?} in {scope:?} #{scope_index}"))?;
        let element = elements.get(index).with_context(|| {
            format!(
                "No element #{index} for {selector:?} in {scope:?} #{scope_index} ({} found)",
                elements.len()
            )
        })?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to click {selector:?} #{index} in {scope:?} #{scope_index}"))?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
             el.value = {val}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
            sel = serde_json::to_string(selector)?,
            val = serde_json::to_string(value)?,
        );
        match self.evaluate(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => anyhow::bail!("No input matches {selector:?}"),
        }
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .with_context(|| format!("Failed to query {selector:?}"))?;
        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            texts.push(element.inner_text().await?.unwrap_or_default().trim().to_string());
        }
        Ok(texts)
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("Failed to evaluate script in page")?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn add_init_script(&self, script: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script.to_string()))
            .await
            .context("Failed to install init script")?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
            .await
            .context("Failed to override user agent")?;
        Ok(())
    }

    async fn set_visible(&self, visible: bool) -> Result<()> {
        if visible && self.headless {
            anyhow::bail!("Interactive login needs a visible browser; set portal.headless = false");
        }
        let was_visible = self.visible.swap(visible, Ordering::SeqCst);
        if visible && !was_visible {
            println!("\n========================================");
            println!("Complete the login in the browser window.");
            println!("The connector resumes once you are logged in.");
            println!("========================================\n");
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

async fn launch_browser(
    settings: &ChromeSettings,
) -> Result<(Browser, chromiumoxide::handler::Handler)> {
    let chrome_path = match &settings.chrome_path {
        Some(path) => path.clone(),
        None => find_chrome().context(
            "Chrome/Chromium not found. Install Chrome or Chromium, or set portal.chrome_path.",
        )?,
    };
    std::fs::create_dir_all(&settings.profile_dir).with_context(|| {
        format!("Failed to create profile dir: {}", settings.profile_dir.display())
    })?;

    let mut builder = BrowserConfig::builder()
        .chrome_executable(chrome_path)
        .viewport(None)
        .user_data_dir(&settings.profile_dir)
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check");
    if !settings.headless {
        builder = builder.with_head();
    }
    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

    let (browser, handler) = Browser::launch(config)
        .await
        .context("Failed to launch browser")?;
    info!(headless = settings.headless, "browser launched");

    Ok((browser, handler))
}

/// Enable the Network domain and push matching response bodies into `registry`.
async fn start_interception(page: &Page, registry: Arc<InterceptionRegistry>) -> Result<JoinHandle<()>> {
    page.execute(EnableParams::default())
        .await
        .context("Failed to enable network events")?;

    let mut responses = page.event_listener::<EventResponseReceived>().await?;
    let mut finished = page.event_listener::<EventLoadingFinished>().await?;
    let page = page.clone();

    Ok(tokio::spawn(async move {
        // Bodies are only readable once loading has finished.
        let mut pending: HashMap<String, (PayloadTag, String)> = HashMap::new();
        loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    if let Some(tag) = PayloadTag::for_url(&event.response.url) {
                        pending.insert(
                            event.request_id.inner().clone(),
                            (tag, event.response.url.clone()),
                        );
                    }
                }
                Some(event) = finished.next() => {
                    let Some((tag, url)) = pending.remove(event.request_id.inner()) else {
                        continue;
                    };
                    match read_body(&page, event.request_id.clone(), tag).await {
                        Ok(payload) => registry.push(tag, payload),
                        Err(err) => warn!(tag = %tag, url = %url, error = %err, "failed to read intercepted body"),
                    }
                }
                else => break,
            }
        }
    }))
}

async fn read_body(page: &Page, request_id: RequestId, tag: PayloadTag) -> Result<Value> {
    let response = page
        .execute(GetResponseBodyParams::new(request_id))
        .await
        .context("Failed to fetch response body")?;
    let body = if response.result.base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(&response.result.body)
            .context("Invalid base64 response body")?
    } else {
        response.result.body.clone().into_bytes()
    };

    match serde_json::from_slice(&body) {
        Ok(value) => Ok(value),
        // Raw PDF responses are wrapped in the same shape as JSON editions.
        Err(_) if matches!(tag, PayloadTag::PdfEdition | PayloadTag::AttestationPdf) => Ok(json!({
            "contenu": base64::engine::general_purpose::STANDARD.encode(&body),
        })),
        Err(err) => Err(err).context("Intercepted body is not JSON"),
    }
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| std::path::Path::new(candidate).exists())
        .map(str::to_string)
}
