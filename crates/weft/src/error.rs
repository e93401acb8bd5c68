use thiserror::Error;

use crate::identifier::Identifier;

/// Fatal engine errors.
///
/// An operation with unresolved references is not an error; it is parked
/// and retried, see [`ExecOutcome::Deferred`](crate::ExecOutcome). Anything
/// surfaced here indicates protocol misuse or a corrupted replica, and the
/// host is expected to stop the replica rather than continue.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The same identity was registered twice with conflicting linkage.
    #[error("duplicate operation {0}")]
    DuplicateOperation(Identifier),

    /// A complete-list traversal dereferenced a missing link.
    #[error("inconsistent linkage near {0}")]
    ImpossibleLinkage(Identifier),

    /// An encoded delimiter named neither neighbor.
    #[error("delimiter {0} specifies neither neighbor")]
    UnderspecifiedDelimiter(Identifier),

    /// A local edit referenced an identity that is not an executed
    /// operation of this replica.
    #[error("unknown target {0}")]
    UnknownTarget(Identifier),

    /// The replica was constructed with the empty peer id, which is
    /// reserved for the sequence delimiters.
    #[error("the empty peer id is reserved for the delimiters")]
    ReservedPeerId,

    /// A local edit addressed a visible position past the end.
    #[error("index {0} out of range")]
    OutOfRange(usize),

    /// An inbound message could not be decoded; the message is dropped.
    #[error("malformed operation: {0}")]
    Decode(#[from] serde_json::Error),
}
