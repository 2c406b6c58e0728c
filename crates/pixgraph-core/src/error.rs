//! Error taxonomy for document mutation and graph evaluation.
//!
//! Nothing here is fatal to the process: every failure is a value returned
//! at the call that caused it, and the worst outcome is a rejected batch.

use crate::id::{KeyFrameId, NodeId, PropName};
use crate::value::ValueType;
use thiserror::Error;

/// Invalid graph mutation or unevaluable graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("node {node} has no {kind} property `{name}`")]
    PropertyNotFound {
        node: NodeId,
        name: PropName,
        kind: &'static str,
    },

    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    #[error("{from}.{output} is already connected to {to}.{input}")]
    DuplicateConnection {
        from: NodeId,
        output: PropName,
        to: NodeId,
        input: PropName,
    },

    #[error("{output:?} output cannot feed {input:?} input")]
    IncompatibleTypes { output: ValueType, input: ValueType },

    #[error("connecting {from} into {to} would create a cycle")]
    WouldCreateCycle { from: NodeId, to: NodeId },

    #[error("input {node}.{input} is already fed by another connection")]
    InputOccupied { node: NodeId, input: PropName },

    #[error("input {node}.{input} is not connected")]
    NotConnected { node: NodeId, input: PropName },

    #[error("dependency cycle among {} node(s) reachable from the output", stalled.len())]
    Cycle { stalled: Vec<NodeId> },

    #[error("node {0} is part of a pair and its partner is missing")]
    PairMismatch(NodeId),
}

/// A mutation was attempted while an interactive session holds the document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("an updateable change is in progress")]
    UpdateableChangeActive,

    #[error("a change block is already active")]
    ChangeBlockActive,

    #[error("no updateable change is active")]
    NoActiveChange,
}

/// Every way an operation against a document can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error(transparent)]
    Structural(#[from] GraphError),

    #[error("keyframe {0} not found")]
    KeyFrameNotFound(KeyFrameId),

    #[error("invalid cel timing: start {start}, duration {duration}")]
    InvalidCelTiming { start: i32, duration: i32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error("corrupted document data: {0}")]
    CorruptedState(String),

    #[error("document has been disposed")]
    ResourceDisposed,
}

impl DocumentError {
    /// Structural errors abort the batch; the caller decides whether to
    /// surface them.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Structural(_)
                | Self::KeyFrameNotFound(_)
                | Self::InvalidCelTiming { .. }
                | Self::InvalidArgument(_)
        )
    }
}

/// Factory lookup and codec failures.
#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("no serialization factory registered for `{0}`")]
    UnknownType(String),

    #[error("no serialization factory with id `{0}`")]
    UnknownFactory(String),

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
