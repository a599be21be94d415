//! Engine error types
//!
//! Errors fall into the classes the driver cares about:
//! - **Configuration**: bad program specs, unknown factory names. Fatal at
//!   setup, surfaced synchronously to the caller.
//! - **Runtime**: opcode or processor failures. Abort the current block;
//!   the driver logs, counts, and continues with the next block.
//! - **Resource**: device or socket setup failures. Fatal at setup.
//!
//! Runtime variants carry only indices and static strings so that reporting
//! an error from the audio thread never allocates. Setup-time variants may
//! own heap data.

use thiserror::Error;

use crate::vm::OpCode;

/// Errors that can occur in the engine
#[derive(Error, Debug)]
pub enum EngineError {
    // ─────────────────────────────────────────────────────────────
    // Configuration (setup time)
    // ─────────────────────────────────────────────────────────────
    /// Opcode appended with the wrong number of arguments
    #[error("{opcode:?} expects {expected} arguments, got {got}")]
    BadArgCount {
        opcode: OpCode,
        expected: usize,
        got: usize,
    },

    /// Opcode argument of the wrong kind
    #[error("{opcode:?} argument {index} must be {expected}")]
    BadArgKind {
        opcode: OpCode,
        index: usize,
        expected: &'static str,
    },

    /// Buffer index outside the program's buffer table
    #[error("buffer index {0} out of range")]
    BadBufferIndex(usize),

    /// Processor index outside the program's processor table
    #[error("processor index {0} out of range")]
    BadProcessorIndex(usize),

    /// Backend factory got a name it doesn't know
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Processor factory got a name it doesn't know
    #[error("unknown processor kind: {0}")]
    UnknownProcessor(String),

    /// Processor kind exists in the original system but is an external
    /// collaborator here
    #[error("processor kind not available in this build: {0}")]
    UnavailableProcessor(String),

    /// Node description is missing a required field
    #[error("node description missing required field: {0}")]
    MissingNodeField(&'static str),

    /// Port index outside the node's declared ports
    #[error("port {port} out of range for node with {count} ports")]
    BadPortIndex { port: usize, count: usize },

    /// Port index is valid but has no buffer bound to it
    #[error("port {port} is not connected to a buffer")]
    PortNotConnected { port: usize },

    /// Label expression that could not be parsed into (key, value) pairs
    #[error("malformed label expression: {0}")]
    BadLabelExpression(String),

    // ─────────────────────────────────────────────────────────────
    // Runtime (block time, allocation-free payloads)
    // ─────────────────────────────────────────────────────────────
    /// Operation applied to a buffer of the wrong type
    #[error("buffer {index} has the wrong type for this operation")]
    BufferTypeMismatch { index: usize },

    /// Source and destination sizes differ where they must match
    #[error("buffer size mismatch: src={src} dst={dst}")]
    SizeMismatch { src: usize, dst: usize },

    /// Source and destination are the same buffer slot
    #[error("buffer {index} used as both source and destination")]
    AliasedBuffers { index: usize },

    /// Atom sequence did not fit into its buffer
    #[error("atom sequence overflow in buffer {index}")]
    AtomOverflow { index: usize },

    /// Buffer does not start with a valid atom sequence header
    #[error("malformed atom sequence in buffer {index}")]
    BadAtomSequence { index: usize },

    /// Processor's `run` reported a failure
    #[error("processor {index} failed: {reason}")]
    ProcessorFailed { index: usize, reason: &'static str },

    /// Opcode ran before its init-time state was populated
    #[error("opcode {index} has no init state")]
    MissingOpState { index: usize },

    // ─────────────────────────────────────────────────────────────
    // Resource (setup time)
    // ─────────────────────────────────────────────────────────────
    /// Audio device could not be opened or configured
    #[error("audio device error: {0}")]
    Device(String),

    /// Datastream endpoint could not be reached
    #[error("datastream error: {0}")]
    Datastream(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether the driver should keep running after this error.
    ///
    /// Runtime errors abort one block; everything else is fatal at setup
    /// and never reaches the per-block path.
    pub fn is_block_error(&self) -> bool {
        matches!(
            self,
            EngineError::BufferTypeMismatch { .. }
                | EngineError::SizeMismatch { .. }
                | EngineError::AliasedBuffers { .. }
                | EngineError::AtomOverflow { .. }
                | EngineError::BadAtomSequence { .. }
                | EngineError::ProcessorFailed { .. }
                | EngineError::MissingOpState { .. }
                | EngineError::PortNotConnected { .. }
        )
    }
}
