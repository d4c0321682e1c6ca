//! Typed connector failures.
//!
//! These travel inside `anyhow::Error`; callers that need to branch on a
//! specific failure use `err.downcast_ref::<ConnectorError>()`.

use crate::interception::PayloadTag;

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// An expected network response never arrived.
    #[error("timed out waiting for intercepted {tag} payload")]
    InterceptionTimeout { tag: PayloadTag },

    /// The "unsupported browser" workaround did not converge.
    #[error("login form still reports an unsupported browser after resetting the user agent")]
    UserAgentResetTimeout,

    /// Automated credential submission never reached the authenticated marker.
    #[error("automated login failed: {reason}")]
    AutoLoginFailure { reason: String },

    /// Identity extraction yielded no account identifier; the site layout changed.
    #[error("no source account identifier found in personal information, the connector needs fixing")]
    MissingSourceIdentifier,

    #[error("timed out waiting for element {selector:?}")]
    ElementTimeout { selector: String },

    #[error("unexpected {tag} payload: {reason}")]
    InvalidPayload { tag: PayloadTag, reason: String },
}

impl ConnectorError {
    /// Whether the run can continue after this failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ConnectorError::AutoLoginFailure { .. })
    }
}
