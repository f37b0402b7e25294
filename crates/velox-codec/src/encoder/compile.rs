//! Schema compilation and the per-schema routine cache
//!
//! Compiling a schema descriptor selects an append routine from the
//! [`RoutineRegistry`], validates every element kind the descriptor can
//! reach (so an unsupported type surfaces here, before any code executes),
//! and co-generates the routine's GC safepoint maps from the same operand
//! signature handed to the emitter — the maps can never drift from the code
//! because both come from one source.
//!
//! Compiled encoders are immutable and cached per descriptor identity.
//! Concurrent first-time compiles of the same schema may duplicate work,
//! but the cache keeps exactly one live entry and every caller gets a
//! functionally equivalent routine.

use std::sync::Arc;

use dashmap::DashMap;
use velox_jit::regs::{Argument, PtrReg, Reg, ScalarReg};
use velox_jit::stackmap::{FuncInfo, RoutineGcMaps, StackMapBuilder};

use crate::descr::{Kind, TypeDescr};
use crate::encoder::append::append_value;
use crate::encoder::registry::{global, AppendFn, RoutineRegistry};
use crate::encoder::state::RuntimeState;
use crate::error::{CodecError, CompileError, EncodeError};

/// An immutable compiled encoder for one schema.
///
/// Safe to share and run from any number of threads; each invocation brings
/// its own [`RuntimeState`].
#[derive(Debug)]
pub struct CompiledEncoder {
    descr: Arc<TypeDescr>,
    routine: AppendFn,
    gc_maps: RoutineGcMaps,
    func: FuncInfo,
}

impl CompiledEncoder {
    /// Run the routine, appending the value's wire form to `b`.
    ///
    /// On error, bytes already written stay in `b`; discard the buffer and
    /// reset the state.
    ///
    /// # Safety
    ///
    /// `p` must point at a value laid out exactly as this encoder's
    /// descriptor describes.
    pub unsafe fn append_to(
        &self,
        b: &mut Vec<u8>,
        p: *const u8,
        st: &mut RuntimeState,
    ) -> Result<(), EncodeError> {
        (self.routine)(&self.descr, b, p, st)
    }

    /// Encode a value into a fresh buffer with a fresh runtime state.
    ///
    /// # Safety
    ///
    /// As [`append_to`](CompiledEncoder::append_to).
    pub unsafe fn encode(&self, p: *const u8) -> Result<Vec<u8>, EncodeError> {
        let mut st = RuntimeState::new();
        let mut b = Vec::new();
        self.append_to(&mut b, p, &mut st)?;
        Ok(b)
    }

    /// The schema this encoder was compiled for.
    pub fn descr(&self) -> &Arc<TypeDescr> {
        &self.descr
    }

    /// The routine's GC safepoint maps (argument and local slots).
    pub fn gc_maps(&self) -> &RoutineGcMaps {
        &self.gc_maps
    }

    /// The routine's identity descriptor, as the collector looks it up.
    pub fn func_info(&self) -> FuncInfo {
        self.func
    }
}

/// Compiles schema descriptors into encoders and caches the results.
pub struct Compiler {
    registry: Arc<RoutineRegistry>,
    cache: DashMap<usize, Arc<CompiledEncoder>>,
}

impl Compiler {
    /// A compiler backed by the process-wide routine registry.
    pub fn new() -> Compiler {
        Compiler::with_registry(global().clone())
    }

    /// A compiler backed by a specific routine registry.
    pub fn with_registry(registry: Arc<RoutineRegistry>) -> Compiler {
        Compiler {
            registry,
            cache: DashMap::new(),
        }
    }

    /// Compile `descr`, reusing the cached encoder when one exists.
    ///
    /// Racing first-time compiles can each build an encoder, but only the
    /// first to land in the cache survives; later racers drop their build
    /// and return the cached one.
    pub fn compile(&self, descr: &Arc<TypeDescr>) -> Result<Arc<CompiledEncoder>, CompileError> {
        let key = Arc::as_ptr(descr) as usize;
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit.clone());
        }
        let built = Arc::new(self.build(descr)?);
        let entry = self.cache.entry(key).or_insert(built);
        Ok(entry.clone())
    }

    /// Compile (or fetch) and run in one step, with a fresh runtime state.
    ///
    /// # Safety
    ///
    /// `p` must point at a value laid out exactly as `descr` describes.
    pub unsafe fn encode(
        &self,
        descr: &Arc<TypeDescr>,
        p: *const u8,
    ) -> Result<Vec<u8>, CodecError> {
        let enc = self.compile(descr)?;
        Ok(enc.encode(p)?)
    }

    /// Number of schemas with a live cached encoder.
    pub fn compiled_count(&self) -> usize {
        self.cache.len()
    }

    fn build(&self, descr: &Arc<TypeDescr>) -> Result<CompiledEncoder, CompileError> {
        validate(&self.registry, descr)?;
        let routine = self.select(descr)?;
        let (args, locals) = operand_signature(descr);
        let gc_maps = RoutineGcMaps::new(build_map(&args), build_map(&locals));
        let func = FuncInfo::new(
            routine as usize as *const u8,
            Arc::as_ptr(descr) as *const u8,
        );
        Ok(CompiledEncoder {
            descr: descr.clone(),
            routine,
            gc_maps,
            func,
        })
    }

    fn select(&self, descr: &TypeDescr) -> Result<AppendFn, CompileError> {
        match descr.kind {
            Kind::List => {
                let elem = container_elem(descr)?;
                self.registry.lookup(elem.kind)
            }
            Kind::Set => {
                let elem = container_elem(descr)?;
                match elem.kind {
                    // Small-integer sets need the dedup bitmap, which only
                    // the generic path drives.
                    Kind::Byte | Kind::I16 => Ok(append_value as AppendFn),
                    _ => self.registry.lookup(elem.kind),
                }
            }
            _ => Ok(append_value as AppendFn),
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

fn container_elem(descr: &TypeDescr) -> Result<&Arc<TypeDescr>, CompileError> {
    descr
        .elem
        .as_ref()
        .ok_or(CompileError::IncompleteDescriptor(descr.kind))
}

/// Check that every element kind reachable from `descr` has a registered
/// routine, so misses fail compilation instead of running code.
fn validate(registry: &RoutineRegistry, descr: &TypeDescr) -> Result<(), CompileError> {
    match descr.kind {
        Kind::List | Kind::Set => {
            let elem = container_elem(descr)?;
            registry.lookup(elem.kind)?;
            validate(registry, elem)
        }
        Kind::Map => {
            let key = descr
                .key
                .as_ref()
                .ok_or(CompileError::IncompleteDescriptor(Kind::Map))?;
            let value = descr
                .value
                .as_ref()
                .ok_or(CompileError::IncompleteDescriptor(Kind::Map))?;
            validate(registry, key)?;
            validate(registry, value)
        }
        Kind::Struct => {
            for field in &descr.fields {
                validate(registry, &field.descr)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The operand signature of an append routine: the slots the emitted code
/// uses, in slot order, with pointer-ness carried by each operand's tag.
///
/// Arguments follow the append calling convention — descriptor, output
/// buffer, value pointer, runtime state. Locals depend on the routine shape.
fn operand_signature(descr: &TypeDescr) -> (Vec<Argument>, Vec<Argument>) {
    let args = vec![
        PtrReg::P0.arg(),
        PtrReg::P1.arg(),
        PtrReg::P2.arg(),
        PtrReg::P3.arg(),
    ];
    let mut locals = Vec::new();
    match descr.kind {
        Kind::List | Kind::Set | Kind::Map | Kind::Struct => {
            // Loop index, remaining count, element cursor.
            locals.push(ScalarReg::R0.arg());
            locals.push(ScalarReg::R1.arg());
            locals.push(PtrReg::P4.arg());
            let pointer_elems = match descr.kind {
                Kind::List | Kind::Set => descr.elem.as_deref().map_or(false, |e| e.is_pointer),
                Kind::Map => {
                    descr.key.as_deref().map_or(false, |k| k.is_pointer)
                        || descr.value.as_deref().map_or(false, |v| v.is_pointer)
                }
                _ => descr.fields.iter().any(|f| f.descr.is_pointer),
            };
            if pointer_elems {
                // Dereferenced element slot.
                locals.push(PtrReg::P5.arg());
            }
            if descr.kind == Kind::Set {
                if let Some(elem) = descr.elem.as_deref() {
                    if matches!(elem.kind, Kind::Byte | Kind::I16) {
                        // Bitmap index for the dedup check.
                        locals.push(ScalarReg::R2.arg());
                    }
                }
            }
        }
        _ => {
            // Scalar scratch.
            locals.push(ScalarReg::R0.arg());
        }
    }
    (args, locals)
}

fn build_map(operands: &[Argument]) -> velox_jit::stackmap::StackMap {
    let mut b = StackMapBuilder::new();
    for &op in operands {
        b.push_operand(op);
    }
    b.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descr::RawList;

    #[test]
    fn test_compile_caches_one_entry() {
        let c = Compiler::new();
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i32())));
        let a = c.compile(&t).unwrap();
        let b = c.compile(&t).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(c.compiled_count(), 1);
    }

    #[test]
    fn test_unsupported_element_fails_compile() {
        let c = Compiler::new();
        // Bool containers are outside the supported surface.
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::bool_())));
        assert_eq!(
            c.compile(&t).unwrap_err(),
            CompileError::UnsupportedType(Kind::Bool)
        );
        assert_eq!(c.compiled_count(), 0);
    }

    #[test]
    fn test_unsupported_nested_element_fails_compile() {
        let c = Compiler::new();
        // list<list<bool>>: the miss is two levels down.
        let inner = Arc::new(TypeDescr::list(Arc::new(TypeDescr::bool_())));
        let t = Arc::new(TypeDescr::list(inner));
        assert_eq!(
            c.compile(&t).unwrap_err(),
            CompileError::UnsupportedType(Kind::Bool)
        );
    }

    #[test]
    fn test_empty_registry_rejects_everything() {
        let c = Compiler::with_registry(Arc::new(RoutineRegistry::empty()));
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i64())));
        assert_eq!(
            c.compile(&t).unwrap_err(),
            CompileError::UnsupportedType(Kind::I64)
        );
    }

    #[test]
    fn test_gc_maps_cogenerated_from_operands() {
        let c = Compiler::new();
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i32())));
        let enc = c.compile(&t).unwrap();

        // Four pointer-class arguments.
        let args = enc.gc_maps().args();
        assert_eq!(args.nbits(), 4);
        assert_eq!(args.pointer_slots().collect::<Vec<_>>(), [0, 1, 2, 3]);

        // Scalar loop slots plus one pointer cursor.
        let locals = enc.gc_maps().locals();
        assert_eq!(locals.nbits(), 3);
        assert_eq!(locals.pointer_slots().collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn test_func_info_keys_on_descriptor() {
        let c = Compiler::new();
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i32())));
        let enc = c.compile(&t).unwrap();
        assert_eq!(enc.func_info().data(), Arc::as_ptr(&t) as *const u8);
        assert!(!enc.func_info().entry().is_null());
    }

    #[test]
    fn test_compiled_encoder_is_debuggable() {
        let c = Compiler::new();
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i32())));
        let enc = c.compile(&t).unwrap();
        assert!(format!("{enc:?}").contains("CompiledEncoder"));
    }

    #[test]
    fn test_encode_via_compiler() {
        let c = Compiler::new();
        let t = Arc::new(TypeDescr::list(Arc::new(TypeDescr::byte())));
        let xs: [i8; 3] = [11, 12, 13];
        let raw = RawList::from_slice(&xs);
        let b = unsafe { c.encode(&t, &raw as *const RawList as *const u8) }.unwrap();
        assert_eq!(b, [3, 0, 0, 0, 3, 11, 12, 13]);
    }
}
