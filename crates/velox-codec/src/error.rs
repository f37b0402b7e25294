//! Error types for compilation, encoding, and decoding
//!
//! The first error ends the operation; the core never retries or recovers
//! internally. On an encode failure the output buffer holds whatever was
//! written before the failure point and must be discarded, never inspected
//! as a valid partial result.

use thiserror::Error;

use crate::descr::Kind;

/// Errors surfaced while compiling a schema descriptor into a routine.
///
/// Reported before any generated code executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The schema names an element type no append routine is registered for.
    #[error("unsupported element type: {0:?}")]
    UnsupportedType(Kind),

    /// A container descriptor is missing its element/key/value descriptor.
    #[error("malformed descriptor: {0:?} container without element descriptor")]
    IncompleteDescriptor(Kind),
}

/// Errors surfaced while running an encode routine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// Container nesting exceeded the runtime frame stack's hard bound.
    #[error("container nesting too deep (limit {limit})")]
    NestingTooDeep {
        /// The frame stack's usable depth bound.
        limit: usize,
    },

    /// A set of small integers contained the same element twice.
    #[error("duplicate element {value} in set")]
    DuplicateSetElement {
        /// The repeated element, widened for display.
        value: i64,
    },
}

/// Errors surfaced while decoding a wire buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The buffer ended inside a value.
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),

    /// A wire type tag did not match the descriptor.
    #[error("wire type mismatch: expected {expected:#04x}, found {found:#04x}")]
    TypeMismatch {
        /// Wire tag the descriptor calls for.
        expected: u8,
        /// Wire tag found in the buffer.
        found: u8,
    },

    /// A wire type tag outside the protocol's value set.
    #[error("invalid wire type tag {0:#04x}")]
    InvalidType(u8),

    /// Input remained after the top-level value was fully decoded.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Container nesting in the input exceeded the decoder's depth bound.
    #[error("container nesting too deep (limit {limit})")]
    NestingTooDeep {
        /// The decoder's depth bound.
        limit: usize,
    },
}

/// Either phase of a top-level encode call: compile, then run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Schema compilation failed.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The compiled routine reported an error.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}
