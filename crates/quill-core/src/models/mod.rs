//! Data models for Quill

mod item;

pub use item::{
    ContentType, Identity, Item, ItemEdit, ItemField, ItemId, PendingOp, RemoteItem,
};
