//! Authentication gate over editing entry points.
//!
//! Once the gate becomes visible it latches: later phase changes can only
//! add requirements, and only a successful authentication hides it again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ApplicationLifecycle, ApplicationState};
use crate::auth::{AuthError, AuthenticationProps, AuthenticationSettings, Authenticator};
use crate::error::{Error, Result};
use crate::observer::Subscription;

struct GateState {
    phase: ApplicationState,
    props: AuthenticationProps,
    visible: bool,
    authenticator: Option<Arc<dyn Authenticator>>,
    begin_on_attach: bool,
    presentations: usize,
}

pub struct LifecycleGate {
    lifecycle: Arc<ApplicationLifecycle>,
    settings: AuthenticationSettings,
    state: Mutex<GateState>,
    subscription: Mutex<Option<Subscription<ApplicationState>>>,
}

impl std::fmt::Debug for LifecycleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("LifecycleGate")
            .field("phase", &state.phase)
            .field("visible", &state.visible)
            .field("presentations", &state.presentations)
            .finish_non_exhaustive()
    }
}

impl LifecycleGate {
    /// Create the gate for the current phase and start following transitions
    pub fn install(
        lifecycle: Arc<ApplicationLifecycle>,
        settings: AuthenticationSettings,
    ) -> Arc<Self> {
        let phase = lifecycle.state();
        let props = settings.props_for(phase);
        let gate = Arc::new(Self {
            lifecycle: Arc::clone(&lifecycle),
            settings,
            state: Mutex::new(GateState {
                phase,
                visible: props.is_required(),
                props,
                authenticator: None,
                begin_on_attach: false,
                presentations: 0,
            }),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&gate);
        let subscription = lifecycle.subscribe(move |state| {
            if let Some(gate) = weak.upgrade() {
                gate.on_state_changed(*state);
            }
        });
        *gate
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        gate.state_changed();
        gate
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_state_changed(&self, state: ApplicationState) {
        if !state.is_app_cycle_change() || self.lifecycle.is_authentication_in_progress() {
            return;
        }

        {
            let mut gate = self.lock();
            let props = self.settings.props_for(state);
            gate.phase = state;
            if props.is_required() || !gate.visible {
                gate.visible = gate.visible || props.is_required();
                gate.props = props;
            }
        }
        self.state_changed();
    }

    fn state_changed(&self) {
        if self.lifecycle.is_authentication_in_progress() {
            return;
        }

        let begin_now = {
            let mut gate = self.lock();
            if !matches!(
                gate.phase,
                ApplicationState::Launching | ApplicationState::Resuming
            ) || !gate.visible
            {
                return;
            }
            if gate.authenticator.is_some() {
                true
            } else {
                gate.begin_on_attach = true;
                false
            }
        };

        if begin_now {
            self.begin_auth();
        }
    }

    fn begin_auth(&self) {
        let (authenticator, props) = {
            let gate = self.lock();
            if !gate.visible {
                tracing::error!("Authentication requested while the gate is hidden");
                return;
            }
            let Some(authenticator) = gate.authenticator.clone() else {
                tracing::error!("Authentication requested without an authenticator");
                return;
            };
            (authenticator, gate.props.clone())
        };

        self.lifecycle.set_authentication_in_progress(true);
        match authenticator.begin_authentication(&props) {
            Ok(()) => {
                self.lock().presentations += 1;
                tracing::debug!(title = %props.title, "Authentication presented");
            }
            Err(error) => {
                self.lifecycle.set_authentication_in_progress(false);
                tracing::error!(%error, "Unable to begin authentication");
            }
        }
    }

    /// Attach the presenter; starts a deferred authentication if one is owed
    pub fn attach_authenticator(&self, authenticator: Arc<dyn Authenticator>) {
        let deferred = {
            let mut gate = self.lock();
            gate.authenticator = Some(authenticator);
            std::mem::take(&mut gate.begin_on_attach)
        };
        if deferred && !self.lifecycle.is_authentication_in_progress() {
            self.begin_auth();
        }
    }

    pub fn authentication_succeeded(&self) {
        self.lifecycle.set_authentication_in_progress(false);
        let mut gate = self.lock();
        gate.visible = false;
        gate.begin_on_attach = false;
        tracing::info!(phase = %gate.phase, "Authentication succeeded; gate unlocked");
    }

    /// The prompt ended without success; the gate stays locked for a retry
    pub fn authentication_failed(&self, error: &AuthError) {
        self.lifecycle.set_authentication_in_progress(false);
        tracing::warn!(%error, "Authentication failed; gate stays locked");
    }

    pub fn retry_authentication(&self) {
        if self.lifecycle.is_authentication_in_progress() {
            return;
        }
        self.begin_auth();
    }

    pub fn is_locked(&self) -> bool {
        self.lock().visible
    }

    /// Guard for editing entry points
    pub fn ensure_unlocked(&self) -> Result<()> {
        if self.is_locked() {
            Err(Error::Locked("authentication required".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn props(&self) -> AuthenticationProps {
        self.lock().props.clone()
    }

    /// Number of times the authenticator was successfully presented
    pub fn presentations(&self) -> usize {
        self.lock().presentations
    }
}
