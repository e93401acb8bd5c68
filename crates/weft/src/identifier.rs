use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque peer identity, ordered lexicographically.
///
/// The engine never interprets the contents; it only compares peers when
/// breaking ties between concurrent insertions. The empty peer id is
/// reserved for the sequence delimiters every replica agrees on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// The reserved peer under which HEAD and TAIL are issued.
    pub(crate) fn reserved() -> Self {
        PeerId(String::new())
    }

    pub fn is_reserved(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        PeerId::new(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Globally unique operation identity: `(creator, op_number)`.
///
/// `op_number` is strictly monotonic per creator, so the pair never
/// collides. The derived order (creator first, then op_number) is total;
/// the integration algorithm only ever relies on comparing creators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub creator: PeerId,
    pub op_number: u64,
}

impl Identifier {
    pub fn new(creator: PeerId, op_number: u64) -> Self {
        Identifier { creator, op_number }
    }

    /// Well-known identity of the HEAD delimiter.
    pub fn head() -> Self {
        Identifier::new(PeerId::reserved(), 0)
    }

    /// Well-known identity of the TAIL delimiter.
    pub fn tail() -> Self {
        Identifier::new(PeerId::reserved(), 1)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.creator, self.op_number)
    }
}
