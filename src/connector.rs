//! One connector run: authenticate, extract the identity, then fetch the
//! reimbursement statements selected by the fetch plan.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{AuthCoordinator, AuthSession, AuthSettings};
use crate::bills::{decode_pdf, BillAssembler};
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::credentials::CredentialStore;
use crate::format::attestation_filename;
use crate::identity::{extract_identity, phones_from_cards, ContactCard};
use crate::interception::{InterceptionRegistry, PayloadTag};
use crate::models::{Bill, Document, Identity, LastRun, Qualification};
use crate::planner::{FetchPlan, RunContext, DEFAULT_FULL_FETCH_AFTER};
use crate::portal::{click_and_wait, selectors, Portal};
use crate::run_state::RunStateStore;
use crate::sink::Sink;

/// Timeouts and switches for a run.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    pub auth: AuthSettings,
    pub interception_timeout: Duration,
    pub element_timeout: Duration,
    pub full_fetch_after: Duration,
    pub attestation: bool,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            interception_timeout: Duration::from_secs(30),
            element_timeout: Duration::from_secs(30),
            full_fetch_after: DEFAULT_FULL_FETCH_AFTER,
            attestation: false,
        }
    }
}

impl ConnectorSettings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            auth: AuthSettings {
                login_url: config.portal.login_url.clone(),
                user_agent: config.portal.user_agent.clone(),
                element_timeout: config.timeouts.element,
                auto_login_timeout: config.timeouts.auto_login,
                user_agent_reset_timeout: config.timeouts.user_agent_reset,
            },
            interception_timeout: config.timeouts.interception,
            element_timeout: config.timeouts.element,
            full_fetch_after: config.fetch.full_fetch_after,
            attestation: config.fetch.attestation,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Fetch every month-group whatever the last run says.
    pub force_full_fetch: bool,
    /// Stop after the identity is saved.
    pub identity_only: bool,
}

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<FetchPlan>,
    /// Month-groups assembled, as `yyyy-MM`.
    pub months: Vec<String>,
    pub documents_saved: usize,
    pub bills_saved: usize,
    pub attestation_saved: bool,
}

impl RunReport {
    fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            plan: None,
            months: Vec::new(),
            documents_saved: 0,
            bills_saved: 0,
            attestation_saved: false,
        }
    }
}

/// Runs the portal flow for one browser session.
pub struct Connector<P: Portal> {
    portal: P,
    registry: Arc<InterceptionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    sink: Arc<dyn Sink>,
    run_state: RunStateStore,
    clock: Arc<dyn Clock>,
    settings: ConnectorSettings,
}

impl<P: Portal> Connector<P> {
    /// `registry` must be the one the portal feeds intercepted responses into.
    pub fn new(
        portal: P,
        registry: Arc<InterceptionRegistry>,
        credentials: Arc<dyn CredentialStore>,
        sink: Arc<dyn Sink>,
        run_state: RunStateStore,
    ) -> Self {
        Self {
            portal,
            registry,
            credentials,
            sink,
            run_state,
            clock: Arc::new(SystemClock),
            settings: ConnectorSettings::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: ConnectorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    pub fn into_portal(self) -> P {
        self.portal
    }

    /// Run the whole flow and record its outcome for the next run's planner.
    ///
    /// Failures before the account identifier is known cannot be keyed to an
    /// account and are only returned.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let started = self.clock.now();
        let has_account = !self.run_state.list()?.is_empty();

        self.authenticate(has_account).await?;
        let identity = self.fetch_identity().await?;
        let account = identity.source_account_identifier().to_string();
        self.sink
            .save_identity(&identity)
            .await
            .context("Failed to save identity")?;
        info!(account = %account, "identity saved");

        if options.identity_only {
            return Ok(RunReport::new(account));
        }

        let last = self.run_state.get(&account)?;
        let result = self.fetch_statements(&account, last.as_ref(), options).await;

        let outcome = match &result {
            Ok(_) => LastRun::success(started),
            Err(err) => LastRun::failure(started, format!("{err:#}")),
        };
        if let Err(err) = self.run_state.set(&account, &outcome) {
            warn!(error = %err, "failed to record run state");
        }
        result
    }

    /// Log in interactively and save the submitted credentials.
    pub async fn login(&self) -> Result<AuthSession> {
        let mut auth = self.auth_coordinator();
        auth.login_interactively().await?;
        Ok(auth.into_session())
    }

    pub async fn authenticate(&self, has_account: bool) -> Result<AuthSession> {
        let mut auth = self.auth_coordinator();
        auth.ensure_authenticated(has_account).await?;
        Ok(auth.into_session())
    }

    fn auth_coordinator(&self) -> AuthCoordinator<'_, P> {
        AuthCoordinator::new(&self.portal, self.credentials.as_ref(), self.settings.auth.clone())
    }

    /// Open the personal information page and build the identity.
    ///
    /// The first personal information payload of the session is used, even
    /// if it arrived before the page was opened.
    pub async fn fetch_identity(&self) -> Result<Identity> {
        click_and_wait(
            &self.portal,
            selectors::PERSONAL_INFO_LINK,
            selectors::PERSONAL_INFO_BANNER,
            self.settings.element_timeout,
        )
        .await?;
        let payload = self
            .registry
            .await_and_reset(PayloadTag::PersonalInfo, self.settings.interception_timeout)
            .await?;

        let cards = match serde_json::from_value::<Vec<ContactCard>>(
            self.portal.evaluate(selectors::SCRAPE_CARDS_SCRIPT).await?,
        ) {
            Ok(cards) => cards,
            Err(err) => {
                warn!(error = %err, "could not read contact cards");
                Vec::new()
            }
        };

        extract_identity(&payload, phones_from_cards(&cards))
    }

    async fn fetch_statements(
        &self,
        account: &str,
        last: Option<&LastRun>,
        options: RunOptions,
    ) -> Result<RunReport> {
        let now = self.clock.now();
        let mut ctx = RunContext::derive(last, now, self.settings.full_fetch_after);
        if options.force_full_fetch {
            ctx = ctx.forcing_full_fetch();
        }
        let plan = FetchPlan::for_context(&ctx, now);

        let assembler = BillAssembler::new(&self.portal, &self.registry, self.settings.interception_timeout)
            .with_element_timeout(self.settings.element_timeout);
        let list = assembler.open().await?;
        let statements = assembler.assemble(&list, plan).await?;

        let documents: Vec<Document> = statements.iter().map(|s| s.document.clone()).collect();
        let bills: Vec<Bill> = statements.iter().flat_map(|s| s.bills.iter().cloned()).collect();

        let mut report = RunReport::new(account);
        report.plan = Some(plan);
        report.months = statements.iter().map(|s| s.month.to_string()).collect();
        report.documents_saved = self
            .sink
            .save_documents(account, &documents)
            .await
            .context("Failed to save statements")?;
        report.bills_saved = self
            .sink
            .save_bills(account, &bills)
            .await
            .context("Failed to save bills")?;
        info!(
            months = report.months.len(),
            documents = report.documents_saved,
            bills = report.bills_saved,
            "statements saved"
        );

        if self.settings.attestation {
            let attestation = self.fetch_attestation().await?;
            report.attestation_saved = self.sink.save_documents(account, &[attestation]).await? > 0;
        }

        Ok(report)
    }

    /// Download the third-party payment card for the current year.
    pub async fn fetch_attestation(&self) -> Result<Document> {
        click_and_wait(
            &self.portal,
            selectors::ATTESTATION_LINK,
            selectors::ATTESTATION_DOWNLOAD,
            self.settings.element_timeout,
        )
        .await?;
        self.registry.clear(PayloadTag::AttestationPdf);
        self.portal.click(selectors::ATTESTATION_DOWNLOAD).await?;
        let payload = self
            .registry
            .await_and_reset(PayloadTag::AttestationPdf, self.settings.interception_timeout)
            .await?;

        let (content, source_url) = decode_pdf(PayloadTag::AttestationPdf, payload)?;
        let filename = attestation_filename(self.clock.today());
        info!(file = %filename, "attestation downloaded");
        let document = Document::new(filename, Qualification::HealthInsuranceCard, content);
        Ok(match source_url {
            Some(url) => document.with_source_url(url),
            None => document,
        })
    }
}
