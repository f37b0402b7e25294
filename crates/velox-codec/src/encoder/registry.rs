//! Registry of specialized encode routines, keyed by element type
//!
//! The compiler laying out a container field looks its element kind up here
//! and bakes the selected routine into the compiled encoder. Registration
//! happens once at process initialization (the [`global`] table); a lookup
//! miss fails compilation of that field with a descriptive error instead of
//! surfacing as a deep fault at run time.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::descr::{Kind, TypeDescr};
use crate::encoder::append;
use crate::encoder::state::RuntimeState;
use crate::error::{CompileError, EncodeError};

/// A compiled append routine for one concrete element type.
///
/// # Safety
///
/// Callers must pass a descriptor validated by the compile step and a value
/// pointer laid out per that descriptor; see the individual routines in
/// [`append`](crate::encoder::append).
pub type AppendFn = unsafe fn(
    &TypeDescr,
    &mut Vec<u8>,
    *const u8,
    &mut RuntimeState,
) -> Result<(), EncodeError>;

/// Mapping from element type kind to its specialized append routine.
///
/// Immutable in practice after initialization; reads vastly outnumber the
/// handful of startup writes, hence the `RwLock`.
pub struct RoutineRegistry {
    routines: RwLock<FxHashMap<Kind, AppendFn>>,
}

impl RoutineRegistry {
    /// An empty registry (no kinds supported).
    pub fn empty() -> RoutineRegistry {
        RoutineRegistry {
            routines: RwLock::new(FxHashMap::default()),
        }
    }

    /// A registry covering every kind the schema compiler can produce.
    ///
    /// Struct, map, set, and list elements all route to the generic
    /// recursive routine; the rest get their specialized loop.
    pub fn with_defaults() -> RoutineRegistry {
        let reg = RoutineRegistry::empty();
        reg.register(Kind::Byte, append::append_list_byte);
        reg.register(Kind::I16, append::append_list_i16);
        reg.register(Kind::I32, append::append_list_i32);
        reg.register(Kind::I64, append::append_list_i64);
        reg.register(Kind::Double, append::append_list_double);
        reg.register(Kind::Enum, append::append_list_enum);
        reg.register(Kind::String, append::append_list_string);
        reg.register(Kind::Struct, append::append_list_other);
        reg.register(Kind::Map, append::append_list_other);
        reg.register(Kind::Set, append::append_list_other);
        reg.register(Kind::List, append::append_list_other);
        reg
    }

    /// Register the routine for `kind`. Called once per supported kind at
    /// initialization; re-registering replaces the routine.
    pub fn register(&self, kind: Kind, routine: AppendFn) {
        self.routines.write().insert(kind, routine);
    }

    /// Select the routine for `kind`, or report the kind as unsupported.
    pub fn lookup(&self, kind: Kind) -> Result<AppendFn, CompileError> {
        self.routines
            .read()
            .get(&kind)
            .copied()
            .ok_or(CompileError::UnsupportedType(kind))
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.routines.read().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.routines.read().is_empty()
    }
}

/// The process-wide registry, initialized with the default routines on
/// first use and shared by every [`Compiler`](crate::encoder::Compiler).
pub fn global() -> &'static Arc<RoutineRegistry> {
    static GLOBAL: Lazy<Arc<RoutineRegistry>> =
        Lazy::new(|| Arc::new(RoutineRegistry::with_defaults()));
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_supported_kinds() {
        let reg = RoutineRegistry::with_defaults();
        for kind in [
            Kind::Byte,
            Kind::I16,
            Kind::I32,
            Kind::I64,
            Kind::Double,
            Kind::Enum,
            Kind::String,
            Kind::Struct,
            Kind::Map,
            Kind::Set,
            Kind::List,
        ] {
            reg.lookup(kind).unwrap();
        }
        assert_eq!(reg.len(), 11);
    }

    #[test]
    fn test_miss_is_unsupported_type() {
        let reg = RoutineRegistry::empty();
        assert_eq!(
            reg.lookup(Kind::I32).unwrap_err(),
            CompileError::UnsupportedType(Kind::I32)
        );
        // Bool containers are not part of the supported surface even in the
        // default table.
        let defaults = RoutineRegistry::with_defaults();
        assert_eq!(
            defaults.lookup(Kind::Bool).unwrap_err(),
            CompileError::UnsupportedType(Kind::Bool)
        );
    }

    #[test]
    fn test_global_is_initialized_once() {
        assert_eq!(global().len(), 11);
        assert!(Arc::ptr_eq(global(), global()));
    }
}
