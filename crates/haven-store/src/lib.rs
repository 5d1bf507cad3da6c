//! Snapshot persistence.
//!
//! The router's registries serialize into three JSON documents; this
//! crate owns their on-disk layout and the load/save plumbing. It knows
//! nothing about routing: callers hand it finished documents.

pub mod error;
pub mod json;

pub use error::{Result, StoreError};
pub use json::JsonFileStore;
