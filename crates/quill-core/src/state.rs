//! Shared cross-platform state types.

use std::fmt;

/// Unified sync status shown as the single status line of an editor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    /// No round has run yet
    Idle,
    Saving,
    /// Last round succeeded; `offline` when running without a remote account
    Saved { offline: bool },
    /// Last round failed; edits are kept locally and retried
    Error,
    /// An item could not get its identifier; it stays local until the next edit
    InitializationFailed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => Ok(()),
            Self::Saving => f.write_str("Saving..."),
            Self::Saved { offline: false } => f.write_str("All changes saved"),
            Self::Saved { offline: true } => f.write_str("All changes saved (offline)"),
            Self::Error => f.write_str("Error syncing (changes saved offline)"),
            Self::InitializationFailed => {
                f.write_str("Unable to initialize note (changes kept locally)")
            }
        }
    }
}
