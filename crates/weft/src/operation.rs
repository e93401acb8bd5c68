use crate::identifier::{Identifier, PeerId};
use crate::wire::EncodedOp;

/// A reference from one operation to another.
///
/// Remote operations arrive naming their dependencies by identifier only;
/// such a reference stays `Pending` until the target is present and
/// executed in the history buffer, at which point it is bound. Locally
/// issued operations are constructed against live operations and start out
/// `Bound`. A bound reference never unbinds (operations are never
/// destroyed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ref {
    Bound(Identifier),
    Pending(Identifier),
}

impl Ref {
    pub fn id(&self) -> &Identifier {
        match self {
            Ref::Bound(id) | Ref::Pending(id) => id,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self, Ref::Bound(_))
    }

    pub(crate) fn bind(&mut self) {
        if let Ref::Pending(id) = self {
            *self = Ref::Bound(id.clone());
        }
    }
}

/// An insertion into the complete list.
///
/// `origin` is the intended left neighbor at issue time and never changes
/// once bound. `prev`/`next` are the current neighbors, which integration
/// may push apart from `origin` when concurrent insertions land in
/// between. A non-empty `deleted_by` tombstones the insert: it stays in
/// the list to keep positions stable but is hidden from views.
///
/// An insert carrying a payload is the `ImmutableObject` wire variant; a
/// bare insert carries no content and only occupies a position.
#[derive(Debug, Clone)]
pub struct Insert<T> {
    pub origin: Ref,
    pub prev: Ref,
    pub next: Ref,
    pub deleted_by: Vec<Identifier>,
    pub content: Option<T>,
}

impl<T> Insert<T> {
    pub fn is_deleted(&self) -> bool {
        !self.deleted_by.is_empty()
    }
}

/// Tombstones one insert. Carries no position of its own.
#[derive(Debug, Clone)]
pub struct Delete {
    pub deletes: Ref,
}

/// Sequence endpoint. HEAD has no `prev`, TAIL has no `next`.
#[derive(Debug, Clone)]
pub struct Delimiter {
    pub prev: Option<Ref>,
    pub next: Option<Ref>,
}

#[derive(Debug, Clone)]
pub enum OpKind<T> {
    Insert(Insert<T>),
    Delete(Delete),
    Delimiter(Delimiter),
}

/// An operation in the history buffer.
///
/// Execution is idempotent; once `executed` is set, the identity and every
/// bound reference are immutable (the engine only ever rewrites the
/// current `prev`/`next` links of inserts while splicing neighbors in).
#[derive(Debug, Clone)]
pub struct Operation<T> {
    id: Identifier,
    parent: Option<Identifier>,
    executed: bool,
    kind: OpKind<T>,
    /// Wire form frozen at execution time. Freezing matters: the links at
    /// that moment reference causally older operations only, so a replica
    /// replaying the encoded history can always resolve them. Encoding the
    /// live links later could name operations issued afterwards, which a
    /// receiver would wait on forever.
    wire: Option<EncodedOp<T>>,
}

impl<T> Operation<T> {
    pub(crate) fn insert(
        id: Identifier,
        origin: Ref,
        prev: Ref,
        next: Ref,
        content: Option<T>,
    ) -> Self {
        Operation {
            id,
            parent: None,
            executed: false,
            kind: OpKind::Insert(Insert {
                origin,
                prev,
                next,
                deleted_by: Vec::new(),
                content,
            }),
            wire: None,
        }
    }

    pub(crate) fn delete(id: Identifier, deletes: Ref) -> Self {
        Operation {
            id,
            parent: None,
            executed: false,
            kind: OpKind::Delete(Delete { deletes }),
            wire: None,
        }
    }

    pub(crate) fn delimiter(id: Identifier, prev: Option<Ref>, next: Option<Ref>) -> Self {
        Operation {
            id,
            parent: None,
            executed: false,
            kind: OpKind::Delimiter(Delimiter { prev, next }),
            wire: None,
        }
    }

    /// Construct an uninitialized operation from its wire form. All
    /// references come back `Pending`; the execution lifecycle resolves
    /// them against the history buffer.
    pub(crate) fn from_encoded(encoded: EncodedOp<T>) -> Self {
        match encoded {
            EncodedOp::Insert {
                uid,
                prev,
                next,
                origin,
            } => {
                let origin = origin.unwrap_or_else(|| prev.clone());
                Operation::insert(
                    uid,
                    Ref::Pending(origin),
                    Ref::Pending(prev),
                    Ref::Pending(next),
                    None,
                )
            }
            EncodedOp::ImmutableObject {
                uid,
                prev,
                next,
                origin,
                content,
            } => {
                let origin = origin.unwrap_or_else(|| prev.clone());
                Operation::insert(
                    uid,
                    Ref::Pending(origin),
                    Ref::Pending(prev),
                    Ref::Pending(next),
                    Some(content),
                )
            }
            EncodedOp::Delete { uid, deletes } => Operation::delete(uid, Ref::Pending(deletes)),
            EncodedOp::Delimiter { uid, prev, next } => {
                Operation::delimiter(uid, prev.map(Ref::Pending), next.map(Ref::Pending))
            }
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn creator(&self) -> &PeerId {
        &self.id.creator
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    pub(crate) fn mark_executed(&mut self) {
        self.executed = true;
    }

    pub fn parent(&self) -> Option<&Identifier> {
        self.parent.as_ref()
    }

    pub(crate) fn set_parent(&mut self, parent: Identifier) {
        self.parent = Some(parent);
    }

    pub fn kind(&self) -> &OpKind<T> {
        &self.kind
    }

    pub fn as_insert(&self) -> Option<&Insert<T>> {
        match &self.kind {
            OpKind::Insert(ins) => Some(ins),
            _ => None,
        }
    }

    pub(crate) fn as_insert_mut(&mut self) -> Option<&mut Insert<T>> {
        match &mut self.kind {
            OpKind::Insert(ins) => Some(ins),
            _ => None,
        }
    }

    pub fn as_delete(&self) -> Option<&Delete> {
        match &self.kind {
            OpKind::Delete(del) => Some(del),
            _ => None,
        }
    }

    pub fn as_delimiter(&self) -> Option<&Delimiter> {
        match &self.kind {
            OpKind::Delimiter(dl) => Some(dl),
            _ => None,
        }
    }

    /// Tombstone check. Delimiters are never deleted.
    pub fn is_deleted(&self) -> bool {
        self.as_insert().map(Insert::is_deleted).unwrap_or(false)
    }

    /// Identifiers of all still-pending reference fields.
    pub fn pending_refs(&self) -> Vec<Identifier> {
        let mut out = Vec::new();
        let mut push = |r: &Ref| {
            if !r.is_bound() {
                out.push(r.id().clone());
            }
        };
        match &self.kind {
            OpKind::Insert(ins) => {
                push(&ins.origin);
                push(&ins.prev);
                push(&ins.next);
            }
            OpKind::Delete(del) => push(&del.deletes),
            OpKind::Delimiter(dl) => {
                if let Some(p) = &dl.prev {
                    push(p);
                }
                if let Some(n) = &dl.next {
                    push(n);
                }
            }
        }
        out
    }

    /// True when every reference field is bound.
    pub fn is_resolved(&self) -> bool {
        self.pending_refs().is_empty()
    }

    /// Bind every pending field whose target identifier appears in `ready`.
    /// Fields that resolve stay resolved across calls.
    pub(crate) fn bind_ready(&mut self, ready: &[Identifier]) {
        let bind = |r: &mut Ref| {
            if !r.is_bound() && ready.contains(r.id()) {
                r.bind();
            }
        };
        match &mut self.kind {
            OpKind::Insert(ins) => {
                bind(&mut ins.origin);
                bind(&mut ins.prev);
                bind(&mut ins.next);
            }
            OpKind::Delete(del) => bind(&mut del.deletes),
            OpKind::Delimiter(dl) => {
                if let Some(p) = &mut dl.prev {
                    bind(p);
                }
                if let Some(n) = &mut dl.next {
                    bind(n);
                }
            }
        }
    }

    /// Current right neighbor on the complete list, if linked.
    pub fn next_cl(&self) -> Option<&Identifier> {
        match &self.kind {
            OpKind::Insert(ins) => ins.next.is_bound().then(|| ins.next.id()),
            OpKind::Delimiter(dl) => match &dl.next {
                Some(n) if n.is_bound() => Some(n.id()),
                _ => None,
            },
            OpKind::Delete(_) => None,
        }
    }

    /// Current left neighbor on the complete list, if linked.
    pub fn prev_cl(&self) -> Option<&Identifier> {
        match &self.kind {
            OpKind::Insert(ins) => ins.prev.is_bound().then(|| ins.prev.id()),
            OpKind::Delimiter(dl) => match &dl.prev {
                Some(p) if p.is_bound() => Some(p.id()),
                _ => None,
            },
            OpKind::Delete(_) => None,
        }
    }

    pub(crate) fn set_next_cl(&mut self, next: Identifier) {
        match &mut self.kind {
            OpKind::Insert(ins) => ins.next = Ref::Bound(next),
            OpKind::Delimiter(dl) => dl.next = Some(Ref::Bound(next)),
            OpKind::Delete(_) => {}
        }
    }

    pub(crate) fn set_prev_cl(&mut self, prev: Identifier) {
        match &mut self.kind {
            OpKind::Insert(ins) => ins.prev = Ref::Bound(prev),
            OpKind::Delimiter(dl) => dl.prev = Some(Ref::Bound(prev)),
            OpKind::Delete(_) => {}
        }
    }
}

impl<T: Clone> Operation<T> {
    /// Freeze the wire form. Called once, right after execution.
    pub(crate) fn freeze_wire(&mut self) {
        if self.wire.is_none() {
            self.wire = Some(self.to_encoded());
        }
    }

    /// The frozen wire form. `None` until the operation has executed.
    pub fn encoded(&self) -> Option<&EncodedOp<T>> {
        self.wire.as_ref()
    }

    /// Wire form of the operation as currently linked. The `origin` field
    /// is omitted when it equals `prev`, the common case for causally
    /// fresh inserts.
    fn to_encoded(&self) -> EncodedOp<T> {
        match &self.kind {
            OpKind::Insert(ins) => {
                let origin = (ins.origin.id() != ins.prev.id()).then(|| ins.origin.id().clone());
                match &ins.content {
                    Some(content) => EncodedOp::ImmutableObject {
                        uid: self.id.clone(),
                        prev: ins.prev.id().clone(),
                        next: ins.next.id().clone(),
                        origin,
                        content: content.clone(),
                    },
                    None => EncodedOp::Insert {
                        uid: self.id.clone(),
                        prev: ins.prev.id().clone(),
                        next: ins.next.id().clone(),
                        origin,
                    },
                }
            }
            OpKind::Delete(del) => EncodedOp::Delete {
                uid: self.id.clone(),
                deletes: del.deletes.id().clone(),
            },
            OpKind::Delimiter(dl) => EncodedOp::Delimiter {
                uid: self.id.clone(),
                prev: dl.prev.as_ref().map(|r| r.id().clone()),
                next: dl.next.as_ref().map(|r| r.id().clone()),
            },
        }
    }
}
