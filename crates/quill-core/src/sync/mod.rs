//! Sync engine: batched request/response rounds against a remote store.
//!
//! Provides:
//! - `SyncSession` - single exclusive owner of registry, dirty state and scheduling
//! - `SyncService` - async worker driving rounds and fanning out results
//! - `SyncTransport` / `IdentifierAssigner` - network collaborators
//!
//! # Architecture
//!
//! ```text
//! edit ──► SyncSession (mutex) ──► SyncScheduler deadline
//!                                          │
//!                              worker wakes, fires round
//!                                          │
//!            identify dummies ──► begin_round ──► SyncTransport::sync
//!                                                        │
//!                     complete_round (merge, clear) ◄────┘
//!                                          │
//!                        ObserverHub::broadcast (lock released)
//! ```

mod engine;
mod http;
mod service;
mod session;
mod transport;

use thiserror::Error;

pub use engine::{RoundOutcome, RoundTicket, SyncRoundEvent};
pub use http::HttpSyncTransport;
pub use service::{RoundTrigger, SyncService};
pub use session::SyncSession;
pub use transport::{
    IdentifierAssigner, LocalIdentifierAssigner, LocalOnlyTransport, SyncApiError, SyncRequest,
    SyncResponse, SyncTransport,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
    #[error("Identifier assignment failed: {0}")]
    Identifier(String),
    #[error("Sync task interrupted: {0}")]
    Interrupted(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
