//! GC safepoint maps for runtime-synthesized code
//!
//! Code generated at run time is invisible to the host's ahead-of-time
//! pointer analysis, so every compiled routine carries two pointer-liveness
//! bit vectors — one over its incoming argument slots, one over its local
//! slots — that the collector's root scanner consults when it pauses the
//! routine at a safepoint.
//!
//! This module only *produces* those descriptors. It never pauses threads or
//! scans memory; the host collector drives its own scanning protocol and
//! looks the maps up by the routine's [`FuncInfo`] identity. Maps are built
//! once at compile time and are immutable and freely shared afterwards.
//!
//! A wrong map is not a reportable error — it is a silent memory-safety
//! hazard. Builders therefore derive each bit from an operand's kind tag
//! ([`StackMapBuilder::push_operand`]) rather than from hand-maintained
//! bookkeeping, and the bit layout is pinned down by structural tests.

use std::sync::Arc;

use crate::regs::Argument;

/// Index of a routine's per-slot pointer map, mirroring the host loader's
/// function-data table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum FuncData {
    /// Pointer map over incoming argument slots.
    ArgsPointerMaps = 0,
    /// Pointer map over local slots.
    LocalsPointerMaps = 1,
}

/// An immutable pointer-liveness bit vector.
///
/// Bit `i` set means logical slot `i` holds a pointer the collector must
/// trace. The declared bit count is authoritative; the byte array is only
/// `⌈n/8⌉` long and must never be used to infer the slot count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMap {
    nbits: u32,
    bytes: Box<[u8]>,
}

impl StackMap {
    /// Build a map directly from backing bytes and a declared bit count.
    ///
    /// Trailing bits past `nbits` in the final byte are ignored. Used by
    /// loaders that read maps from a symbol table; routine compilation goes
    /// through [`StackMapBuilder`] instead.
    pub fn from_bytes(nbits: u32, bytes: impl Into<Box<[u8]>>) -> StackMap {
        let bytes = bytes.into();
        debug_assert!(bytes.len() >= StackMap::byte_len(nbits));
        StackMap { nbits, bytes }
    }

    /// Number of logical slots this map describes.
    #[inline]
    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    /// The packed backing bytes, `⌈nbits/8⌉` of them.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether slot `i` holds a traced pointer.
    ///
    /// `i` must be below [`nbits`](StackMap::nbits); the bit count is the
    /// only valid bound, never the backing byte length.
    #[inline]
    pub fn bit(&self, i: u32) -> bool {
        debug_assert!(i < self.nbits);
        (self.bytes[(i / 8) as usize] >> (i % 8)) & 1 != 0
    }

    /// Iterate slot indices that hold traced pointers.
    pub fn pointer_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.nbits).filter(|&i| self.bit(i))
    }

    #[inline]
    fn byte_len(nbits: u32) -> usize {
        ((nbits as usize) + 7) / 8
    }
}

/// Incremental builder for a [`StackMap`].
///
/// Slots are appended in order; slot `i` is the `i`-th call to
/// [`push`](StackMapBuilder::push) or
/// [`push_operand`](StackMapBuilder::push_operand).
#[derive(Debug, Default)]
pub struct StackMapBuilder {
    nbits: u32,
    bytes: Vec<u8>,
}

impl StackMapBuilder {
    /// Create an empty builder.
    pub fn new() -> StackMapBuilder {
        StackMapBuilder::default()
    }

    /// Append one slot; `is_pointer` marks it as collector-traced.
    pub fn push(&mut self, is_pointer: bool) {
        let i = self.nbits;
        if i % 8 == 0 {
            self.bytes.push(0);
        }
        if is_pointer {
            self.bytes[(i / 8) as usize] |= 1 << (i % 8);
        }
        self.nbits = i + 1;
    }

    /// Append one slot for an operand, deriving the pointer bit from the
    /// operand's kind tag. This is the only path routine compilation uses,
    /// so map contents can never drift from the operand model.
    pub fn push_operand(&mut self, arg: Argument) {
        self.push(arg.is_pointer());
    }

    /// Number of slots appended so far.
    #[inline]
    pub fn len(&self) -> u32 {
        self.nbits
    }

    /// True if no slots have been appended.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nbits == 0
    }

    /// Finish the map.
    pub fn build(self) -> StackMap {
        StackMap {
            nbits: self.nbits,
            bytes: self.bytes.into_boxed_slice(),
        }
    }
}

/// Identity of one generated routine, as the host loader sees it.
///
/// Opaque to this crate: an entry code pointer plus a data/symbol-table
/// pointer, owned by the loader. Used purely as a lookup key (equality and
/// hashing are over the raw addresses), never dereferenced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncInfo {
    entry: *const u8,
    data: *const u8,
}

// Safety: FuncInfo is an address-only key; neither pointer is ever
// dereferenced through it.
unsafe impl Send for FuncInfo {}
unsafe impl Sync for FuncInfo {}

impl FuncInfo {
    /// Build an identity descriptor from the loader's raw pointers.
    pub fn new(entry: *const u8, data: *const u8) -> FuncInfo {
        FuncInfo { entry, data }
    }

    /// The routine's entry address.
    #[inline]
    pub fn entry(&self) -> *const u8 {
        self.entry
    }

    /// The loader's data/symbol-table address for the routine.
    #[inline]
    pub fn data(&self) -> *const u8 {
        self.data
    }
}

/// The pair of safepoint maps attached to one compiled routine.
///
/// Built once, in lockstep with code emission, then shared read-only with
/// every future invocation and collector pause of the routine.
#[derive(Debug, Clone)]
pub struct RoutineGcMaps {
    args: Arc<StackMap>,
    locals: Arc<StackMap>,
}

impl RoutineGcMaps {
    /// Pair up the argument-slot and local-slot maps for a routine.
    pub fn new(args: StackMap, locals: StackMap) -> RoutineGcMaps {
        RoutineGcMaps {
            args: Arc::new(args),
            locals: Arc::new(locals),
        }
    }

    /// Select a map by the host's function-data index.
    #[inline]
    pub fn map(&self, which: FuncData) -> &Arc<StackMap> {
        match which {
            FuncData::ArgsPointerMaps => &self.args,
            FuncData::LocalsPointerMaps => &self.locals,
        }
    }

    /// Map over incoming argument slots.
    #[inline]
    pub fn args(&self) -> &Arc<StackMap> {
        &self.args
    }

    /// Map over local slots.
    #[inline]
    pub fn locals(&self) -> &Arc<StackMap> {
        &self.locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{PtrReg, Reg, ScalarReg};

    #[test]
    fn test_bit_matches_reference_shift_and_mask() {
        // n = 17 spans three backing bytes with one live bit in the last.
        let bytes = [0b1010_0101u8, 0b0110_0000, 0b0000_0001];
        let map = StackMap::from_bytes(17, &bytes[..]);
        assert_eq!(map.nbits(), 17);
        for i in 0..17u32 {
            let expect = (bytes[(i / 8) as usize] >> (i % 8)) & 1 != 0;
            assert_eq!(map.bit(i), expect, "bit {}", i);
        }
    }

    #[test]
    fn test_builder_bit_order() {
        let mut b = StackMapBuilder::new();
        for i in 0..17u32 {
            b.push(i % 3 == 0);
        }
        let map = b.build();
        assert_eq!(map.nbits(), 17);
        assert_eq!(map.bytes().len(), 3);
        for i in 0..17u32 {
            assert_eq!(map.bit(i), i % 3 == 0, "bit {}", i);
        }
    }

    #[test]
    fn test_builder_from_operands() {
        let mut b = StackMapBuilder::new();
        b.push_operand(PtrReg::P0.arg());
        b.push_operand(ScalarReg::R1.arg());
        b.push_operand(PtrReg::P2.arg());
        b.push_operand(ScalarReg::Zero.arg());
        let map = b.build();
        assert_eq!(map.nbits(), 4);
        assert_eq!(map.pointer_slots().collect::<Vec<_>>(), [0, 2]);
    }

    #[test]
    fn test_empty_map() {
        let map = StackMapBuilder::new().build();
        assert_eq!(map.nbits(), 0);
        assert!(map.bytes().is_empty());
        assert_eq!(map.pointer_slots().count(), 0);
    }

    #[test]
    fn test_byte_len_is_ceil_of_bits() {
        for (nbits, len) in [(1u32, 1usize), (8, 1), (9, 2), (16, 2), (17, 3)] {
            let mut b = StackMapBuilder::new();
            for _ in 0..nbits {
                b.push(true);
            }
            assert_eq!(b.build().bytes().len(), len);
        }
    }

    #[test]
    fn test_routine_maps_indexing() {
        let mut args = StackMapBuilder::new();
        args.push(true);
        args.push(false);
        let mut locals = StackMapBuilder::new();
        locals.push(false);
        let maps = RoutineGcMaps::new(args.build(), locals.build());
        assert_eq!(maps.map(FuncData::ArgsPointerMaps).nbits(), 2);
        assert_eq!(maps.map(FuncData::LocalsPointerMaps).nbits(), 1);
        assert!(maps.args().bit(0));
        assert!(!maps.locals().bit(0));
    }

    #[test]
    fn test_func_info_is_address_keyed() {
        let a = [0u8; 4];
        let b = [0u8; 4];
        let fa = FuncInfo::new(a.as_ptr(), b.as_ptr());
        let fb = FuncInfo::new(a.as_ptr(), b.as_ptr());
        let fc = FuncInfo::new(b.as_ptr(), a.as_ptr());
        assert_eq!(fa, fb);
        assert_ne!(fa, fc);
    }
}
