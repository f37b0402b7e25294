//! Velox JIT execution substrate
//!
//! The pieces of the Velox codec that every runtime-generated routine is
//! built on, independent of any particular instruction encoder:
//!
//! - **Registers** (`regs`): the virtual operand namespace the code
//!   generator targets, with pointer-vs-scalar tagging packed into each
//!   one-byte operand.
//! - **Stack maps** (`stackmap`): per-routine pointer-liveness descriptors
//!   that let the host garbage collector pause and scan generated code it
//!   never saw at build time.
//! - **Jump tables** (`jumptab`): non-owning indexable views over dispatch
//!   tables emitted into the code segment.
//!
//! The instruction-selection backend itself lives elsewhere; it consumes
//! these abstractions as its compilation target.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod jumptab;
pub mod regs;
pub mod stackmap;

pub use jumptab::JumpTable;
pub use regs::{Argument, OperandKind, PtrReg, Reg, Register, ScalarReg};
pub use stackmap::{FuncData, FuncInfo, RoutineGcMaps, StackMap, StackMapBuilder};
