//! Process-wide application lifecycle.
//!
//! Provides:
//! - `ApplicationLifecycle` - current phase plus the authentication guard
//! - `LifecycleGate` - lock screen driven by phase changes

mod gate;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::observer::{ObserverHub, ObserverToken, Subscription};

pub use gate::LifecycleGate;

/// Discrete stage of the application's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    Launching,
    Resuming,
    Active,
    ResigningActive,
    Backgrounding,
    Terminating,
}

impl ApplicationState {
    /// Phases that start or end an app cycle (as opposed to focus changes)
    pub const fn is_app_cycle_change(self) -> bool {
        matches!(
            self,
            Self::Launching | Self::Resuming | Self::Backgrounding | Self::Terminating
        )
    }
}

impl fmt::Display for ApplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Launching => "launching",
            Self::Resuming => "resuming",
            Self::Active => "active",
            Self::ResigningActive => "resigning active",
            Self::Backgrounding => "backgrounding",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct LifecycleState {
    current: ApplicationState,
    authentication_in_progress: bool,
}

/// Single owned lifecycle value, mutated only through [`Self::transition`]
#[derive(Debug)]
pub struct ApplicationLifecycle {
    state: Mutex<LifecycleState>,
    hub: Arc<ObserverHub<ApplicationState>>,
}

impl ApplicationLifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState {
                current: ApplicationState::Launching,
                authentication_in_progress: false,
            }),
            hub: Arc::new(ObserverHub::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ApplicationState {
        self.lock().current
    }

    /// Move to `to` and notify observers.
    ///
    /// `Terminating` is final and `Launching` cannot be re-entered once left.
    /// Re-entering the current phase is allowed and broadcast again.
    pub fn transition(&self, to: ApplicationState) -> Result<()> {
        {
            let mut state = self.lock();
            let from = state.current;
            let allowed = match (from, to) {
                (ApplicationState::Terminating, _) => false,
                (ApplicationState::Launching, ApplicationState::Launching) => true,
                (_, ApplicationState::Launching) => false,
                _ => true,
            };
            if !allowed {
                return Err(Error::InvalidTransition { from, to });
            }
            state.current = to;
            tracing::debug!(%from, %to, "Application state changed");
        }

        self.hub.broadcast(&to);
        Ok(())
    }

    pub fn is_authentication_in_progress(&self) -> bool {
        self.lock().authentication_in_progress
    }

    pub fn set_authentication_in_progress(&self, in_progress: bool) {
        self.lock().authentication_in_progress = in_progress;
    }

    /// Observe transitions for as long as the returned guard lives
    pub fn subscribe(
        &self,
        callback: impl Fn(&ApplicationState) + Send + Sync + 'static,
    ) -> Subscription<ApplicationState> {
        self.hub.subscribe(callback)
    }

    pub fn add_state_observer(
        &self,
        callback: impl Fn(&ApplicationState) + Send + Sync + 'static,
    ) -> ObserverToken {
        self.hub.register(callback)
    }

    pub fn remove_state_observer(&self, token: ObserverToken) -> bool {
        self.hub.remove(token)
    }
}

impl Default for ApplicationLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
