//! Encoder runtime: per-call state, append routines, registry, compile cache

pub mod append;
pub mod compile;
pub mod registry;
pub mod state;

pub use append::append_value;
pub use compile::{CompiledEncoder, Compiler};
pub use registry::{global, AppendFn, RoutineRegistry};
pub use state::{FieldLayout, Frame, RuntimeState, FRAME_LAYOUT, MAX_NESTING, STATE_LAYOUT};
