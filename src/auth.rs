//! Login coordination.
//!
//! Automated login with saved credentials is tried first. If it does not
//! reach the logout marker, the login form is shown to the user and the
//! coordinator waits, without a timeout, for the session to become
//! authenticated. Whatever the user typed is captured on submit and saved.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
use crate::error::ConnectorError;
use crate::portal::{selectors, wait_for_any, Portal};

pub const LOGIN_KEY: &str = "login";
pub const PASSWORD_KEY: &str = "password";

/// Login credentials. The identifier is an adherent number or an email.
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: SecretString,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    /// Load saved credentials; `None` if either half is missing.
    pub async fn load(store: &dyn CredentialStore) -> Result<Option<Self>> {
        let Some(identifier) = store.get(LOGIN_KEY).await? else {
            return Ok(None);
        };
        let Some(secret) = store.get(PASSWORD_KEY).await? else {
            return Ok(None);
        };
        Ok(Some(Self {
            identifier: identifier.expose_secret().to_string(),
            secret,
        }))
    }

    pub async fn save(&self, store: &dyn CredentialStore) -> Result<()> {
        store
            .set(LOGIN_KEY, SecretString::from(self.identifier.clone()))
            .await?;
        store.set(PASSWORD_KEY, self.secret.clone()).await
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    AnonymousUnknown,
    FormPresented,
    CredentialsSubmitted,
    LoginError,
    AuthenticatedSession,
}

/// Session state threaded through the login flow.
#[derive(Debug)]
pub struct AuthSession {
    state: AuthState,
    credentials: Option<Credentials>,
    history: Vec<AuthState>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self {
            state: AuthState::AnonymousUnknown,
            credentials: None,
            history: vec![AuthState::AnonymousUnknown],
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Every state entered, in order.
    pub fn history(&self) -> &[AuthState] {
        &self.history
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::AuthenticatedSession
    }

    fn transition(&mut self, next: AuthState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "auth state");
            self.state = next;
            self.history.push(next);
        }
    }

    fn submitted(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
        self.transition(AuthState::CredentialsSubmitted);
    }

    /// The portal refused the last submission; its credentials are dropped.
    fn rejected(&mut self) {
        self.credentials = None;
        self.transition(AuthState::LoginError);
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Timeouts used while logging in.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub login_url: String,
    pub user_agent: String,
    pub element_timeout: Duration,
    pub auto_login_timeout: Duration,
    pub user_agent_reset_timeout: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            login_url: selectors::LOGIN_FORM_URL.to_string(),
            user_agent: selectors::MOBILE_USER_AGENT.to_string(),
            element_timeout: Duration::from_secs(30),
            auto_login_timeout: Duration::from_secs(30),
            user_agent_reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmittedLogin {
    login: String,
    password: String,
}

/// Drives the login state machine against a [`Portal`].
pub struct AuthCoordinator<'a, P: Portal + ?Sized> {
    portal: &'a P,
    store: &'a dyn CredentialStore,
    settings: AuthSettings,
    session: AuthSession,
}

impl<'a, P: Portal + ?Sized> AuthCoordinator<'a, P> {
    pub fn new(portal: &'a P, store: &'a dyn CredentialStore, settings: AuthSettings) -> Self {
        Self {
            portal,
            store,
            settings,
            session: AuthSession::new(),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn into_session(self) -> AuthSession {
        self.session
    }

    /// Make sure the browser holds an authenticated session.
    ///
    /// `has_account` is false on the first run for a connector instance; any
    /// session left in the browser profile is then logged out first.
    pub async fn ensure_authenticated(&mut self, has_account: bool) -> Result<()> {
        info!("ensuring authentication");
        self.prepare().await?;

        if !has_account {
            self.ensure_not_authenticated().await?;
        }
        if !self.portal.is_present(selectors::PASSWORD_INPUT).await? {
            self.navigate_to_login_form().await?;
        }
        self.recover_unsupported_browser().await?;

        if self.check_authenticated().await? {
            self.session.transition(AuthState::AuthenticatedSession);
            info!("already authenticated");
            return Ok(());
        }

        if let Some(credentials) = Credentials::load(self.store).await? {
            match self.auto_login(credentials).await {
                Ok(()) => return Ok(()),
                Err(err) => match err.downcast_ref::<ConnectorError>() {
                    Some(e) if e.is_recoverable() => {
                        warn!(error = %e, "falling back to interactive login");
                    }
                    _ => return Err(err),
                },
            }
        }

        self.show_login_form_and_wait().await
    }

    /// Log out any existing session and wait for the user to log in by hand.
    ///
    /// Saved credentials are not tried; the submitted ones replace them.
    pub async fn login_interactively(&mut self) -> Result<()> {
        self.prepare().await?;
        self.ensure_not_authenticated().await?;
        self.recover_unsupported_browser().await?;
        self.show_login_form_and_wait().await
    }

    async fn prepare(&self) -> Result<()> {
        self.portal.add_init_script(selectors::CAPTURE_LOGIN_SCRIPT).await?;
        self.portal.set_user_agent(&self.settings.user_agent).await
    }

    /// Log out any existing session so a new account can log in.
    pub async fn ensure_not_authenticated(&mut self) -> Result<()> {
        self.navigate_to_login_form().await?;
        if self.check_authenticated().await? {
            info!("logging out previous session");
            self.portal.click(selectors::LOGOUT_LINK).await?;
            self.portal
                .wait_for_element(selectors::PASSWORD_INPUT, self.settings.element_timeout)
                .await?;
            self.session.transition(AuthState::FormPresented);
        }
        Ok(())
    }

    /// Go to the login page and wait for either the form or the logout marker.
    pub async fn navigate_to_login_form(&mut self) -> Result<()> {
        self.portal.goto(&self.settings.login_url).await?;
        let found = wait_for_any(
            self.portal,
            &[
                selectors::PASSWORD_INPUT,
                selectors::LOGOUT_LINK,
                selectors::UNSUPPORTED_BROWSER,
            ],
            Some(self.settings.element_timeout),
        )
        .await?;
        if found == 0 {
            self.session.transition(AuthState::FormPresented);
        }
        Ok(())
    }

    pub async fn check_authenticated(&self) -> Result<bool> {
        self.portal.is_present(selectors::LOGOUT_LINK).await
    }

    /// Work around the portal wrongly flagging the browser as unsupported.
    ///
    /// The user agent is set again and the page reloaded, once. The marker
    /// must be gone and the form or session visible within the reset timeout.
    async fn recover_unsupported_browser(&mut self) -> Result<()> {
        if !self.portal.is_present(selectors::UNSUPPORTED_BROWSER).await? {
            return Ok(());
        }
        warn!("portal reports an unsupported browser, resetting user agent");
        self.portal.set_user_agent(&self.settings.user_agent).await?;
        self.portal.reload().await?;

        let deadline = Instant::now() + self.settings.user_agent_reset_timeout;
        loop {
            if !self.portal.is_present(selectors::UNSUPPORTED_BROWSER).await? {
                if self.portal.is_present(selectors::PASSWORD_INPUT).await? {
                    self.session.transition(AuthState::FormPresented);
                    return Ok(());
                }
                if self.check_authenticated().await? {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ConnectorError::UserAgentResetTimeout.into());
            }
            tokio::time::sleep(self.portal.poll_interval()).await;
        }
    }

    /// Fill and submit the form with saved credentials.
    ///
    /// Errors with [`ConnectorError::AutoLoginFailure`] when the login error
    /// element shows up or the logout marker never does.
    pub async fn auto_login(&mut self, credentials: Credentials) -> Result<()> {
        info!("attempting automated login");
        self.portal
            .wait_for_element(selectors::PASSWORD_INPUT, self.settings.element_timeout)
            .await?;
        self.portal
            .fill(selectors::USERNAME_INPUT, &credentials.identifier)
            .await?;
        self.portal
            .fill(selectors::PASSWORD_INPUT, credentials.secret.expose_secret())
            .await?;
        self.portal.click(selectors::LOGIN_SUBMIT).await?;
        self.session.submitted(credentials);
        // The submit listener fired too; its copy is not needed.
        self.take_submitted().await?;

        let outcome = wait_for_any(
            self.portal,
            &[selectors::LOGOUT_LINK, selectors::LOGIN_ERROR],
            Some(self.settings.auto_login_timeout),
        )
        .await;
        match outcome {
            Ok(0) => {
                self.session.transition(AuthState::AuthenticatedSession);
                info!("automated login succeeded");
                Ok(())
            }
            Ok(_) => {
                self.session.rejected();
                Err(ConnectorError::AutoLoginFailure {
                    reason: "login error displayed".to_string(),
                }
                .into())
            }
            Err(err) => match err.downcast_ref::<ConnectorError>() {
                Some(ConnectorError::ElementTimeout { .. }) => {
                    self.session.rejected();
                    Err(ConnectorError::AutoLoginFailure {
                        reason: "no authenticated marker before timeout".to_string(),
                    }
                    .into())
                }
                _ => Err(err),
            },
        }
    }

    /// Show the browser and wait, without timeout, for the user to log in.
    pub async fn show_login_form_and_wait(&mut self) -> Result<()> {
        info!("waiting for interactive login");
        self.portal.set_visible(true).await?;
        if self.portal.is_present(selectors::PASSWORD_INPUT).await? {
            self.session.transition(AuthState::FormPresented);
        }

        let mut error_shown = false;
        loop {
            if let Some(credentials) = self.take_submitted().await? {
                info!("login form submitted");
                self.session.submitted(credentials);
                error_shown = false;
            }
            if self.check_authenticated().await? {
                break;
            }
            let has_error = self.portal.is_present(selectors::LOGIN_ERROR).await?;
            if has_error && !error_shown {
                info!("login error displayed, waiting for the user to retry");
                self.session.rejected();
            }
            error_shown = has_error;
            tokio::time::sleep(self.portal.poll_interval()).await;
        }

        self.session.transition(AuthState::AuthenticatedSession);
        self.portal.set_visible(false).await?;

        match self.session.credentials() {
            Some(credentials) => {
                credentials.save(self.store).await?;
                info!("credentials saved");
            }
            None => warn!("login submission was not captured, saved credentials left unchanged"),
        }
        Ok(())
    }

    async fn take_submitted(&self) -> Result<Option<Credentials>> {
        let value = self
            .portal
            .evaluate(selectors::TAKE_SUBMITTED_LOGIN_SCRIPT)
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        match serde_json::from_value::<SubmittedLogin>(value) {
            Ok(submitted) if !submitted.login.is_empty() && !submitted.password.is_empty() => {
                Ok(Some(Credentials::new(submitted.login, submitted.password)))
            }
            Ok(_) => Ok(None),
            Err(err) => {
                warn!(error = %err, "ignoring malformed login capture");
                Ok(None)
            }
        }
    }
}
