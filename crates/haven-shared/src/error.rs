use thiserror::Error;

/// Errors the event router reports back to the originating connection.
///
/// Every variant is scoped to the connection that triggered it; none ever
/// fans out to other recipients and none is fatal to the router loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// Event arrived on a connection with no registered identity.
    /// Dropped silently; the connection may simply have raced a disconnect.
    #[error("connection is not authenticated")]
    NotAuthenticated,

    /// Payload is missing required fields or is otherwise malformed.
    #[error("invalid payload: {0}")]
    Validation(String),

    /// Referenced entity (invite code, conversation, community) is unknown.
    #[error("{0}")]
    NotFound(String),

    /// Request conflicts with existing state (duplicate friend request,
    /// self-request, already-friends).
    #[error("{0}")]
    Conflict(String),

    /// A bounded-retry operation exhausted its attempts. Only invite-code
    /// generation carries this contract.
    #[error("{0}")]
    ResourceExhausted(String),
}
