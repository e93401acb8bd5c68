// Operation-based replicated sequence engine for peer-to-peer
// collaborative editing. Every replica applies the same operations in
// whatever order the network delivers them and converges on the same
// sequence; concurrent insertions are placed with the YATA integration
// rule ("Near Real-Time Peer-to-Peer Shared Editing on Extensible Data
// Types", Nicolaescu et al., 2016).

pub mod engine;
pub mod error;
pub mod event;
pub mod history;
pub mod identifier;
pub mod operation;
pub mod wire;

pub use {
    engine::{Engine, ExecOutcome},
    error::EngineError,
    event::Listener,
    history::HistoryBuffer,
    identifier::{Identifier, PeerId},
    operation::{Delete, Delimiter, Insert, OpKind, Operation, Ref},
    wire::EncodedOp,
};
