// Engine: owns the history buffer and the complete list, and drives the
// execution lifecycle for local and remote operations.
//
// Concurrent insertions are placed with the YATA integration rule, after
// "Near Real-Time Peer-to-Peer Shared Editing on Extensible Data Types"
// by Nicolaescu et al., 2016.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use serde::de::DeserializeOwned;

use crate::error::EngineError;
use crate::event::{EventHooks, Listener};
use crate::history::HistoryBuffer;
use crate::identifier::{Identifier, PeerId};
use crate::operation::{OpKind, Operation, Ref};
use crate::wire::EncodedOp;

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The operation is (now) executed.
    Executed,
    /// At least one reference is unresolved. The operation stays
    /// registered and is retried when a dependency executes.
    Deferred,
}

enum Variant {
    Insert,
    Delete,
    Delimiter,
}

enum DelimiterStep {
    Ready,
    Blocked(Vec<Identifier>),
}

/// A replica of the shared sequence.
///
/// All mutation is single-threaded; the transport may deliver encoded
/// operations concurrently, but they enter through [`Engine::receive`] one
/// at a time. Local edits execute immediately, fire the execution
/// listeners (where a transport picks them up for broadcast) and return
/// the new operation's identity.
pub struct Engine<T> {
    history: HistoryBuffer<T>,
    head: Identifier,
    tail: Identifier,
    /// Reverse-dependency index: unresolved identifier to the operations
    /// parked on it.
    parked: HashMap<Identifier, Vec<Identifier>>,
    exec_listeners: Vec<Listener<T>>,
    hooks: EventHooks<T>,
}

impl<T: Clone> Engine<T> {
    /// A replica that bootstraps the sequence itself: HEAD and TAIL are
    /// created under their well-known identities, registered and linked.
    pub fn new(peer: PeerId) -> Result<Self, EngineError> {
        let mut engine = Engine::join(peer)?;
        let mut head = Operation::delimiter(
            Identifier::head(),
            None,
            Some(Ref::Bound(Identifier::tail())),
        );
        head.mark_executed();
        head.freeze_wire();
        let mut tail = Operation::delimiter(
            Identifier::tail(),
            Some(Ref::Bound(Identifier::head())),
            None,
        );
        tail.mark_executed();
        tail.freeze_wire();
        engine.history.seed(head);
        engine.history.seed(tail);
        Ok(engine)
    }

    /// A replica joining an existing sequence. Nothing is registered yet;
    /// the delimiters arrive over the wire like any other operation.
    pub fn join(peer: PeerId) -> Result<Self, EngineError> {
        if peer.is_reserved() {
            return Err(EngineError::ReservedPeerId);
        }
        Ok(Engine {
            history: HistoryBuffer::new(peer),
            head: Identifier::head(),
            tail: Identifier::tail(),
            parked: HashMap::new(),
            exec_listeners: Vec::new(),
            hooks: EventHooks::new(),
        })
    }

    pub fn peer(&self) -> &PeerId {
        self.history.local_peer()
    }

    pub fn head(&self) -> &Identifier {
        &self.head
    }

    pub fn tail(&self) -> &Identifier {
        &self.tail
    }

    pub fn history(&self) -> &HistoryBuffer<T> {
        &self.history
    }

    /// Issue the next local identity.
    pub fn next_identifier(&mut self) -> Identifier {
        self.history.next_identifier()
    }

    /// See [`HistoryBuffer::restore_counter`].
    pub fn restore_counter(&mut self, last_issued: u64) {
        self.history.restore_counter(last_issued);
    }

    /// Register an execution listener, called synchronously with the
    /// encoded form of every operation (local or remote) right after it
    /// executes, in registration order. This is where a transport hooks
    /// in; deduplication on the wire is the transport's job.
    pub fn on_execute(&mut self, listener: impl FnMut(&EncodedOp<T>) + 'static) {
        self.exec_listeners.push(Box::new(listener));
    }

    /// Register a named event handler on one operation.
    pub fn on(&mut self, id: &Identifier, event: &str, handler: impl FnMut(&EncodedOp<T>) + 'static) {
        self.hooks.on(id.clone(), event, Box::new(handler));
    }

    /// Invoke the handlers for `event` on `id`, then bubble along parent
    /// pointers. Handlers run synchronously; a panicking handler unwinds
    /// to the caller.
    pub fn call_event(&mut self, id: &Identifier, event: &str, payload: &EncodedOp<T>) {
        self.emit(id, event, payload);
    }

    /// Attach `id` to a parent for event bubbling.
    pub fn set_parent(&mut self, id: &Identifier, parent: &Identifier) -> Result<(), EngineError> {
        match self.history.get_mut(id) {
            Some(op) => {
                op.set_parent(parent.clone());
                Ok(())
            }
            None => Err(EngineError::UnknownTarget(id.clone())),
        }
    }

    fn emit(&mut self, at: &Identifier, event: &str, payload: &EncodedOp<T>) {
        let mut cur = Some(at.clone());
        while let Some(node) = cur {
            self.hooks.fire(&node, event, payload);
            cur = self.history.get(&node).and_then(|op| op.parent().cloned());
        }
    }

    fn is_op_executed(&self, id: &Identifier) -> bool {
        self.history.get(id).map(Operation::is_executed).unwrap_or(false)
    }

    fn next_cl_of(&self, id: &Identifier) -> Result<Option<Identifier>, EngineError> {
        Ok(self
            .history
            .get(id)
            .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?
            .next_cl()
            .cloned())
    }

    fn creator_of(&self, id: &Identifier) -> Result<PeerId, EngineError> {
        Ok(self
            .history
            .get(id)
            .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?
            .creator()
            .clone())
    }

    /// Hops along `prev` from `id` back to (not including) its origin.
    /// Zero iff the insert currently sits directly right of its origin.
    fn distance_to_origin(&self, id: &Identifier) -> Result<u64, EngineError> {
        let (origin, mut cur) = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            let ins = op
                .as_insert()
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            (ins.origin.id().clone(), ins.prev.id().clone())
        };
        let mut d = 0u64;
        while cur != origin {
            // walking back into the insert itself means the list is cyclic
            if cur == *id {
                return Err(EngineError::ImpossibleLinkage(id.clone()));
            }
            let op = self
                .history
                .get(&cur)
                .ok_or_else(|| EngineError::ImpossibleLinkage(cur.clone()))?;
            let further = op
                .prev_cl()
                .cloned()
                .ok_or_else(|| EngineError::ImpossibleLinkage(cur.clone()))?;
            cur = further;
            d += 1;
        }
        Ok(d)
    }

    /// Find the identity of the n-th visible (non-tombstoned) insert.
    /// Skips tombstones so indices match what a user sees.
    fn find_by_index(&self, index: usize) -> Option<Identifier> {
        let mut cur = self.history.get(&self.head)?.next_cl()?.clone();
        let mut count = 0;
        while cur != self.tail {
            let op = self.history.get(&cur)?;
            if op.as_insert().is_some() && !op.is_deleted() {
                if count == index {
                    return Some(cur);
                }
                count += 1;
            }
            cur = op.next_cl()?.clone();
        }
        None
    }

    /// Identity of the visible item at `index`, if any.
    pub fn id_at(&self, index: usize) -> Option<Identifier> {
        self.find_by_index(index)
    }

    /// Number of visible items (tombstones excluded).
    pub fn len(&self) -> usize {
        let mut count = 0;
        let Some(start) = self.history.get(&self.head).and_then(|op| op.next_cl()) else {
            return 0;
        };
        let mut cur = start.clone();
        while cur != self.tail {
            let Some(op) = self.history.get(&cur) else {
                return count;
            };
            if op.as_insert().is_some() && !op.is_deleted() {
                count += 1;
            }
            match op.next_cl() {
                Some(next) => cur = next.clone(),
                None => return count,
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Engine<T> {
    /// Apply a remote-originated encoded operation: parse, register, run
    /// the execution lifecycle. Re-delivery of an identity already in the
    /// history buffer is dropped. A missing dependency is not an error;
    /// the operation parks until the dependency executes.
    pub fn receive(&mut self, encoded: EncodedOp<T>) -> Result<(), EngineError> {
        if self.history.contains(encoded.uid()) {
            tracing::debug!(op = %encoded.uid(), "dropping re-delivered operation");
            return Ok(());
        }
        let op = Operation::from_encoded(encoded);
        let id = op.id().clone();
        self.history.put(op)?;
        self.execute(&id)?;
        Ok(())
    }

    /// [`Engine::receive`] for a raw JSON message. An undecodable message
    /// is dropped and reported; nothing is registered for it.
    pub fn receive_json(&mut self, raw: &str) -> Result<(), EngineError>
    where
        T: DeserializeOwned,
    {
        let encoded: EncodedOp<T> = match serde_json::from_str(raw) {
            Ok(encoded) => encoded,
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable message");
                return Err(EngineError::Decode(err));
            }
        };
        self.receive(encoded)
    }

    /// Attempt to execute a registered operation, then wake anything that
    /// was parked on it (and so on transitively). Idempotent.
    pub fn execute(&mut self, id: &Identifier) -> Result<ExecOutcome, EngineError> {
        let outcome = self.try_execute(id)?;
        if matches!(outcome, ExecOutcome::Executed) {
            self.drain_parked(id)?;
        }
        Ok(outcome)
    }

    fn drain_parked(&mut self, executed: &Identifier) -> Result<(), EngineError> {
        let mut work: VecDeque<Identifier> = self
            .parked
            .remove(executed)
            .map(VecDeque::from)
            .unwrap_or_default();
        while let Some(cur) = work.pop_front() {
            if let ExecOutcome::Executed = self.try_execute(&cur)? {
                if let Some(waiters) = self.parked.remove(&cur) {
                    work.extend(waiters);
                }
            }
        }
        Ok(())
    }

    fn try_execute(&mut self, id: &Identifier) -> Result<ExecOutcome, EngineError> {
        let variant = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            if op.is_executed() {
                return Ok(ExecOutcome::Executed);
            }
            match op.kind() {
                OpKind::Insert(_) => Variant::Insert,
                OpKind::Delete(_) => Variant::Delete,
                OpKind::Delimiter(_) => Variant::Delimiter,
            }
        };

        match variant {
            Variant::Insert | Variant::Delete => {
                let missing = self.validate(id);
                if !missing.is_empty() {
                    self.park(id, &missing);
                    return Ok(ExecOutcome::Deferred);
                }
                match variant {
                    Variant::Insert => self.integrate_insert(id)?,
                    _ => self.apply_delete(id)?,
                }
            }
            Variant::Delimiter => match self.integrate_delimiter(id)? {
                DelimiterStep::Ready => {}
                DelimiterStep::Blocked(missing) => {
                    self.park(id, &missing);
                    return Ok(ExecOutcome::Deferred);
                }
            },
        }

        if let Some(op) = self.history.get_mut(id) {
            op.mark_executed();
            op.freeze_wire();
        }
        tracing::debug!(op = %id, "executed");
        self.notify_executed(id)?;
        Ok(ExecOutcome::Executed)
    }

    /// Resolve pending references against the history buffer. A field
    /// binds once its target is present and executed; fields that bind
    /// stay bound across calls. Returns the identifiers still missing.
    fn validate(&mut self, id: &Identifier) -> Vec<Identifier> {
        let pending = self
            .history
            .get(id)
            .map(|op| op.pending_refs())
            .unwrap_or_default();
        if pending.is_empty() {
            return pending;
        }
        let (ready, missing): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|target| self.is_op_executed(target));
        if !ready.is_empty() {
            if let Some(op) = self.history.get_mut(id) {
                op.bind_ready(&ready);
            }
        }
        missing
    }

    fn park(&mut self, id: &Identifier, missing: &[Identifier]) {
        for dep in missing {
            let waiters = self.parked.entry(dep.clone()).or_default();
            if !waiters.contains(id) {
                waiters.push(id.clone());
            }
        }
        tracing::debug!(op = %id, "deferred on unresolved references");
    }

    /// Place an insert among its concurrent siblings and splice it into
    /// the complete list. Deterministic in the resolved inputs, so every
    /// replica picks the same spot.
    fn integrate_insert(&mut self, id: &Identifier) -> Result<(), EngineError> {
        let (mut prev, next, creator) = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            let ins = op
                .as_insert()
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            (ins.prev.id().clone(), ins.next.id().clone(), op.creator().clone())
        };

        // Already linked; nothing to do.
        if self.next_cl_of(&prev)?.as_ref() == Some(id) {
            return Ok(());
        }

        // `i` counts hops right of the origin; `candidate` records the
        // distance this insert would have if spliced after the current
        // `prev`.
        let mut i = self.distance_to_origin(id)?;
        let mut candidate = i;
        let mut o = self
            .next_cl_of(&prev)?
            .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;

        while o != next {
            let d = self.distance_to_origin(&o)?;
            if d == i {
                // Same origin: equal-distance siblings order by creator.
                if self.creator_of(&o)? < creator {
                    prev = o.clone();
                    candidate = i + 1;
                }
            } else if d < i {
                // `o` is rooted at an older origin. Its region still
                // dominates unless we have already walked past its reach.
                if i - candidate <= d {
                    prev = o.clone();
                    candidate = i + 1;
                }
            } else {
                // `o` is rooted at a newer origin; this insert precedes it.
                break;
            }
            i += 1;
            o = self
                .next_cl_of(&o)?
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
        }

        // Splice between the final prev and whatever follows it now.
        let new_next = self
            .next_cl_of(&prev)?
            .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
        {
            let op = self
                .history
                .get_mut(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            let ins = op
                .as_insert_mut()
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            ins.prev = Ref::Bound(prev.clone());
            ins.next = Ref::Bound(new_next.clone());
        }
        self.history
            .get_mut(&prev)
            .ok_or_else(|| EngineError::ImpossibleLinkage(prev.clone()))?
            .set_next_cl(id.clone());
        self.history
            .get_mut(&new_next)
            .ok_or_else(|| EngineError::ImpossibleLinkage(new_next.clone()))?
            .set_prev_cl(id.clone());
        Ok(())
    }

    /// Tombstone the target. The target stays on the complete list so
    /// concurrent inserts anchored on it keep their positions.
    fn apply_delete(&mut self, id: &Identifier) -> Result<(), EngineError> {
        let target = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            let del = op
                .as_delete()
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            del.deletes.id().clone()
        };
        let target_op = self
            .history
            .get_mut(&target)
            .ok_or_else(|| EngineError::UnknownTarget(target.clone()))?;
        match target_op.as_insert_mut() {
            Some(ins) => {
                if !ins.deleted_by.contains(id) {
                    ins.deleted_by.push(id.clone());
                }
            }
            // Delimiters are never deleted.
            None => tracing::warn!(op = %id, target = %target, "delete targets a non-insert; ignored"),
        }
        Ok(())
    }

    /// The delimiter cases. Endpoints are allowed to run ahead of a
    /// missing neighbor (HEAD may execute while TAIL is still in flight);
    /// the late neighbor completes the link when it arrives. This leniency
    /// is delimiter-only and must not be generalized to inserts.
    fn integrate_delimiter(&mut self, id: &Identifier) -> Result<DelimiterStep, EngineError> {
        let (prev, next) = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            let dl = op
                .as_delimiter()
                .ok_or_else(|| EngineError::ImpossibleLinkage(id.clone()))?;
            (dl.prev.clone(), dl.next.clone())
        };
        let prev_pending = matches!(&prev, Some(r) if !r.is_bound());
        let next_pending = matches!(&next, Some(r) if !r.is_bound());

        if next_pending && !prev_pending {
            // Only the right neighbor is outstanding: execute directly.
            return Ok(DelimiterStep::Ready);
        }

        if prev_pending {
            self.validate(id);
            let prev_id = match self.history.get(id).and_then(Operation::as_delimiter) {
                Some(dl) => match &dl.prev {
                    Some(r) if r.is_bound() => r.id().clone(),
                    Some(r) => return Ok(DelimiterStep::Blocked(vec![r.id().clone()])),
                    None => return Err(EngineError::ImpossibleLinkage(id.clone())),
                },
                None => return Err(EngineError::ImpossibleLinkage(id.clone())),
            };
            // The left neighbor must not already have a right link.
            if self.next_cl_of(&prev_id)?.is_some() {
                return Err(EngineError::DuplicateOperation(id.clone()));
            }
            self.history
                .get_mut(&prev_id)
                .ok_or_else(|| EngineError::ImpossibleLinkage(prev_id.clone()))?
                .set_next_cl(id.clone());
            return Ok(DelimiterStep::Ready);
        }

        if let Some(Ref::Bound(prev_id)) = &prev {
            if self.next_cl_of(prev_id)?.is_none() {
                let prev_id = prev_id.clone();
                self.history
                    .get_mut(&prev_id)
                    .ok_or_else(|| EngineError::ImpossibleLinkage(prev_id.clone()))?
                    .set_next_cl(id.clone());
                return Ok(DelimiterStep::Ready);
            }
        }

        if prev.is_some() || next.is_some() {
            return Ok(DelimiterStep::Ready);
        }

        Err(EngineError::UnderspecifiedDelimiter(id.clone()))
    }

    fn notify_executed(&mut self, id: &Identifier) -> Result<(), EngineError> {
        let encoded = self.encode(id)?;
        for listener in self.exec_listeners.iter_mut() {
            listener(&encoded);
        }
        let event = {
            let op = self
                .history
                .get(id)
                .ok_or_else(|| EngineError::UnknownTarget(id.clone()))?;
            match op.kind() {
                OpKind::Insert(_) => Some((id.clone(), "insert")),
                OpKind::Delete(del) => Some((del.deletes.id().clone(), "delete")),
                OpKind::Delimiter(_) => None,
            }
        };
        if let Some((at, name)) = event {
            self.emit(&at, name, &encoded);
        }
        Ok(())
    }

    /// Wire form of an executed operation, frozen at execution time.
    /// Operations that have not executed are not part of the replicated
    /// state yet and cannot be encoded.
    pub fn encode(&self, id: &Identifier) -> Result<EncodedOp<T>, EngineError> {
        self.history
            .get(id)
            .and_then(Operation::encoded)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTarget(id.clone()))
    }

    /// Encoded forms of every executed operation, in no particular order.
    /// Enough to bring a fresh replica up to date: the receiving engine
    /// defers whatever arrives before its dependencies.
    pub fn encoded_ops(&self) -> Vec<EncodedOp<T>> {
        self.history
            .operations()
            .filter_map(|op| op.encoded().cloned())
            .collect()
    }

    /// Issue an insert whose intended left neighbor is `origin`. The new
    /// operation executes immediately and its identity is returned; the
    /// execution listeners see the encoded form for broadcast.
    pub fn insert_after(&mut self, origin: &Identifier, content: T) -> Result<Identifier, EngineError> {
        let next = match self.history.get(origin) {
            Some(op) if op.is_executed() => op
                .next_cl()
                .cloned()
                .ok_or_else(|| EngineError::UnknownTarget(origin.clone()))?,
            _ => return Err(EngineError::UnknownTarget(origin.clone())),
        };
        let uid = self.history.next_identifier();
        let op = Operation::insert(
            uid.clone(),
            Ref::Bound(origin.clone()),
            Ref::Bound(origin.clone()),
            Ref::Bound(next),
            Some(content),
        );
        self.history.put(op)?;
        self.execute(&uid)?;
        Ok(uid)
    }

    /// Insert at a visible position: 0 prepends, `len()` appends.
    pub fn insert_local(&mut self, index: usize, content: T) -> Result<Identifier, EngineError> {
        let origin = if index == 0 {
            self.head.clone()
        } else {
            self.find_by_index(index - 1)
                .ok_or(EngineError::OutOfRange(index))?
        };
        self.insert_after(&origin, content)
    }

    /// Issue a delete for the insert with identity `target`.
    pub fn delete(&mut self, target: &Identifier) -> Result<Identifier, EngineError> {
        match self.history.get(target) {
            Some(op) if op.is_executed() && op.as_insert().is_some() => {}
            _ => return Err(EngineError::UnknownTarget(target.clone())),
        }
        let uid = self.history.next_identifier();
        let op = Operation::delete(uid.clone(), Ref::Bound(target.clone()));
        self.history.put(op)?;
        self.execute(&uid)?;
        Ok(uid)
    }

    /// Delete the visible item at `index`.
    pub fn delete_local(&mut self, index: usize) -> Result<Identifier, EngineError> {
        let target = self
            .find_by_index(index)
            .ok_or(EngineError::OutOfRange(index))?;
        self.delete(&target)
    }

    /// The visible sequence: payloads of non-tombstoned inserts in list
    /// order. Inserts without a payload occupy a position but contribute
    /// nothing here.
    pub fn read(&self) -> Vec<T> {
        let mut out = Vec::new();
        let Some(start) = self.history.get(&self.head).and_then(|op| op.next_cl()) else {
            return out;
        };
        let mut cur = start.clone();
        while cur != self.tail {
            let Some(op) = self.history.get(&cur) else {
                return out;
            };
            if let Some(ins) = op.as_insert() {
                if !ins.is_deleted() {
                    if let Some(content) = &ins.content {
                        out.push(content.clone());
                    }
                }
            }
            match op.next_cl() {
                Some(next) => cur = next.clone(),
                None => return out,
            }
        }
        out
    }
}

impl<T> fmt::Debug for Engine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("peer", self.history.local_peer())
            .field("operations", &self.history.len())
            .field("parked", &self.parked.len())
            .finish()
    }
}
