//! Error types for stub generation and runtime dispatch

use crate::runtime::ObjRef;
use crate::stubs::types::VectorKind;

/// Error raised while building or running runtime stubs
#[derive(Debug, thiserror::Error)]
pub enum StubError {
    /// A stub could not be synthesized. Fatal at startup.
    #[error("failed to generate runtime stub '{stub}': {reason}")]
    GenerationFailure {
        /// Name of the stub (or blob) that failed
        stub: &'static str,
        /// Backend or resource failure description
        reason: String,
    },

    /// A parametric signature was requested outside its supported range
    #[error(transparent)]
    SignatureRange(#[from] SignatureRangeError),

    /// No handler was found anywhere up the call chain
    #[error("unhandled exception {exception} escaped the outermost frame")]
    UnhandledException {
        /// The exception object that escaped
        exception: ObjRef,
    },

    /// `startup::initialize` ran more than once
    #[error("runtime stubs are already initialized")]
    AlreadyInitialized,
}

impl StubError {
    /// Build a generation failure for `stub`
    pub fn generation(stub: &'static str, reason: impl Into<String>) -> Self {
        StubError::GenerationFailure {
            stub,
            reason: reason.into(),
        }
    }

    /// Name of the stub this error is attributed to, if any
    pub fn failed_stub(&self) -> Option<&'static str> {
        match self {
            StubError::GenerationFailure { stub, .. } => Some(stub),
            _ => None,
        }
    }
}

/// Uncommon trap that cannot be honoured; the VM state is corrupt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrapError {
    /// Reason or action field outside the known encodings
    #[error("malformed trap request {0:#x}")]
    MalformedRequest(i32),

    /// The trap fired with no compiled frame on the stack
    #[error("uncommon trap {0:#x} with no compiled frame")]
    NoCompiledFrame(i32),

    /// Frames were unpacked without unroll information from the first half
    #[error("unpack of {0} frame(s) without unroll information")]
    MissingUnrollInfo(i64),
}

/// Parameter tuple rejected by a parametric signature family
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureRangeError {
    /// Multi-dimensional allocation only has fixed-arity stubs for 2..=5 dimensions
    #[error("unsupported array dimensionality: {0} (expected 2..=5)")]
    Dimensions(u32),

    /// Vector math routines take one or two vector operands
    #[error("unsupported vector math arity: {0} (expected 1 or 2)")]
    VectorArity(u32),

    /// Vector operand or result shape is not a legal machine vector
    #[error("unsupported vector shape: {0}")]
    VectorShape(VectorKind),
}
