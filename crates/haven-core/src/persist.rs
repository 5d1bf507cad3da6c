//! Persistence capability.
//!
//! Durability is optional and fire-and-forget: the router hands fully
//! built snapshot documents to a [`Persist`] implementation and moves on.
//! A write failure is the implementation's problem to log; it never blocks
//! or fails the in-memory operation that triggered it.

use haven_shared::snapshot::{CommunitiesDoc, IdentityDoc, MessagesDoc};

/// Capability interface injected into the router at construction. The
/// server binary bridges this to the actual store on spawned tasks.
pub trait Persist: Send {
    fn save_communities(&self, doc: CommunitiesDoc);
    fn save_messages(&self, doc: MessagesDoc);
    fn save_identity(&self, doc: IdentityDoc);
}

/// No-op persistence for memory-only deployments and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPersist;

impl Persist for NoPersist {
    fn save_communities(&self, _doc: CommunitiesDoc) {}
    fn save_messages(&self, _doc: MessagesDoc) {}
    fn save_identity(&self, _doc: IdentityDoc) {}
}
