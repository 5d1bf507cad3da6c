//! # haven-core
//!
//! The server-side session and event-routing core of Haven.
//!
//! Everything in this crate is synchronous, lock-free, in-memory state
//! meant to be owned by exactly one task: the [`router::Router`] processes
//! one inbound event at a time to completion, so all registry mutations
//! are atomic with respect to each other. The only async boundaries are
//! outbound delivery (unbounded channel sends) and the fire-and-forget
//! [`persist::Persist`] capability.

pub mod directory;
pub mod history;
pub mod invite;
pub mod membership;
pub mod persist;
pub mod registry;
pub mod router;
pub mod social;
pub mod voice;

pub use persist::{NoPersist, Persist};
pub use router::Router;
