//! Local authentication lock settings and the presenter seam.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::ApplicationState;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication could not start: {0}")]
    Unavailable(String),
    #[error("Authentication failed: {0}")]
    Failed(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Presents the passcode/fingerprint prompt.
///
/// Completion is reported back through
/// [`crate::lifecycle::LifecycleGate::authentication_succeeded`].
pub trait Authenticator: Send + Sync {
    fn begin_authentication(&self, props: &AuthenticationProps) -> AuthResult<()>;
}

/// User-chosen lock configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AuthenticationSettings {
    pub passcode: bool,
    pub fingerprint: bool,
    /// Also lock when returning from the background, not only on launch
    pub lock_on_resume: bool,
}

impl AuthenticationSettings {
    pub const fn has_lock(&self) -> bool {
        self.passcode || self.fingerprint
    }

    /// What the gate must ask for when entering `state`
    pub fn props_for(&self, state: ApplicationState) -> AuthenticationProps {
        let applies = match state {
            ApplicationState::Launching => true,
            ApplicationState::Resuming => self.lock_on_resume,
            _ => false,
        };
        if !applies || !self.has_lock() {
            return AuthenticationProps::default();
        }

        let title = match (self.passcode, self.fingerprint) {
            (true, true) => "Authentication Required",
            (true, false) => "Enter Passcode",
            _ => "Fingerprint Required",
        };
        AuthenticationProps {
            title: title.to_string(),
            passcode: self.passcode,
            fingerprint: self.fingerprint,
        }
    }
}

/// Requirements handed to the authenticator for one presentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticationProps {
    pub title: String,
    pub passcode: bool,
    pub fingerprint: bool,
}

impl AuthenticationProps {
    pub const fn is_required(&self) -> bool {
        self.passcode || self.fingerprint
    }
}
