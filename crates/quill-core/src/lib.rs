//! quill-core - Core library for Quill
//!
//! This crate holds the item model, dirty tracking, the debounced sync engine
//! and the lifecycle/authentication gate shared by every Quill front end.

pub mod auth;
pub mod composer;
pub mod config;
pub mod dirty;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod sync;
pub mod util;

pub use auth::{AuthError, AuthenticationProps, AuthenticationSettings, Authenticator};
pub use composer::NoteComposer;
pub use config::SyncSettings;
pub use error::{Error, Result};
pub use lifecycle::{ApplicationLifecycle, ApplicationState, LifecycleGate};
pub use models::{ContentType, Item, ItemEdit, ItemField, ItemId, RemoteItem};
pub use observer::{ObserverHub, ObserverToken, Subscription};
pub use registry::ItemKey;
pub use state::SyncStatus;
pub use store::{ItemStore, MemoryItemStore, SqliteItemStore};
pub use sync::{SyncError, SyncRoundEvent, SyncService};
