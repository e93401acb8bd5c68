use std::collections::HashMap;

use crate::error::EngineError;
use crate::identifier::{Identifier, PeerId};
use crate::operation::Operation;

/// Identity-keyed store of every operation this replica has seen.
///
/// The buffer owns all operations; complete-list links are identifiers
/// resolved through it rather than owning pointers, which is what lets the
/// doubly linked structure coexist with single ownership. Operations are
/// registered here before execution is attempted and are never removed.
///
/// The buffer also issues identities for locally created operations by
/// bumping the local peer's op counter.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    ops: HashMap<Identifier, Operation<T>>,
    local_peer: PeerId,
    op_counter: u64,
}

impl<T> HistoryBuffer<T> {
    pub fn new(local_peer: PeerId) -> Self {
        HistoryBuffer {
            ops: HashMap::new(),
            local_peer,
            op_counter: 0,
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// Issue the next local identity. Strictly monotonic; never reused.
    pub fn next_identifier(&mut self) -> Identifier {
        self.op_counter += 1;
        Identifier::new(self.local_peer.clone(), self.op_counter)
    }

    /// Raise the local counter above identities issued in an earlier
    /// session. Reusing an op number would violate identity uniqueness
    /// across the whole network, so a restarting replica must call this
    /// with the highest number it ever issued.
    pub fn restore_counter(&mut self, last_issued: u64) {
        if last_issued > self.op_counter {
            self.op_counter = last_issued;
        }
    }

    pub fn get(&self, id: &Identifier) -> Option<&Operation<T>> {
        self.ops.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &Identifier) -> Option<&mut Operation<T>> {
        self.ops.get_mut(id)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.ops.contains_key(id)
    }

    /// Bootstrap registration for the well-known delimiters; the engine
    /// constructs them already linked and executed.
    pub(crate) fn seed(&mut self, op: Operation<T>) {
        self.ops.insert(op.id().clone(), op);
    }

    /// Register an operation. Registering a second operation under an
    /// existing identity is a protocol violation; idempotent re-delivery
    /// is filtered out before this point.
    pub(crate) fn put(&mut self, op: Operation<T>) -> Result<(), EngineError> {
        if self.ops.contains_key(op.id()) {
            return Err(EngineError::DuplicateOperation(op.id().clone()));
        }
        self.ops.insert(op.id().clone(), op);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// All stored operations, in no particular order. Delivery order never
    /// matters to a receiving engine, so this is sufficient for recovery
    /// and for bootstrapping a fresh replica.
    pub fn operations(&self) -> impl Iterator<Item = &Operation<T>> {
        self.ops.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Ref;

    #[test]
    fn identities_are_strictly_monotonic() {
        let mut hb: HistoryBuffer<char> = HistoryBuffer::new(PeerId::from("alice"));
        let a = hb.next_identifier();
        let b = hb.next_identifier();
        assert!(a < b);
        assert_eq!(a.creator, b.creator);
    }

    #[test]
    fn restore_counter_skips_past_old_session() {
        let mut hb: HistoryBuffer<char> = HistoryBuffer::new(PeerId::from("alice"));
        hb.restore_counter(41);
        assert_eq!(hb.next_identifier().op_number, 42);

        // restoring backwards must not rewind
        hb.restore_counter(3);
        assert_eq!(hb.next_identifier().op_number, 43);
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut hb: HistoryBuffer<char> = HistoryBuffer::new(PeerId::from("alice"));
        let id = hb.next_identifier();
        let op = Operation::delete(id.clone(), Ref::Pending(Identifier::head()));
        hb.put(op.clone()).unwrap();
        assert!(matches!(
            hb.put(op),
            Err(EngineError::DuplicateOperation(dup)) if dup == id
        ));
    }
}
