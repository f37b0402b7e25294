//! Velox codec runtime
//!
//! A JIT-compiled structured-data codec: schemas are compiled into
//! specialized routines instead of being walked reflectively per value.
//! This crate holds the runtime those routines execute against:
//!
//! - **Descriptors** (`descr`): the type/shape surface the external schema
//!   compiler hands us, plus the in-memory container ABI generated code
//!   walks.
//! - **Encoder** (`encoder`): the per-call runtime frame stack, the
//!   specialized per-element-type append routines and their registry, and
//!   the per-schema compile cache with GC-map co-generation.
//! - **Decoder** (`decoder`): descriptor-driven decoding back to owned
//!   values, with jump-table scalar dispatch.
//!
//! The operand model, safepoint maps, and jump-table views the compiled
//! routines are built on live in the `velox-jit` crate.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod decoder;
pub mod descr;
pub mod encoder;
pub mod error;

pub use decoder::{decode, DecodedValue, MAX_DECODE_NESTING};
pub use descr::{FieldDescr, Kind, RawList, RawString, TypeDescr, WireType};
pub use encoder::{CompiledEncoder, Compiler, RoutineRegistry, RuntimeState};
pub use error::{CodecError, CompileError, DecodeError, EncodeError};
