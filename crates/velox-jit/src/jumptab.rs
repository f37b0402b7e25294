//! Non-owning jump-table views over code-segment memory
//!
//! Decoders dispatch on a small dense key (a wire type tag, a field slot) by
//! indexing straight into a table of code addresses the generator emitted
//! into the code segment. [`JumpTable`] is a thin view over that raw memory:
//! base address plus element count, no copy, no ownership. Mutating the
//! backing storage (e.g. the patcher relocating an entry) is immediately
//! visible through the view.
//!
//! The view deliberately supports nothing but indexed lookup. It cannot be
//! resized or appended to, and the borrow tying it to the segment keeps it
//! from outliving the memory it aliases.

use std::fmt;
use std::marker::PhantomData;

/// A borrowed, fixed-size view over a dense table of code addresses.
///
/// `'seg` is the lifetime of the code segment the table lives in.
#[derive(Clone, Copy)]
pub struct JumpTable<'seg> {
    base: *const usize,
    len: usize,
    _seg: PhantomData<&'seg [usize]>,
}

impl<'seg> JumpTable<'seg> {
    /// Construct a view over `len` entries starting at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `len` consecutive `usize` entries that
    /// stay valid (and are only mutated via properly synchronized patching)
    /// for `'seg`. Passing a `len` that does not exactly match the number of
    /// entries physically emitted for the table is undefined behavior; the
    /// emitting component is responsible for the count, it is not checked
    /// here.
    #[inline]
    pub unsafe fn over(base: *const usize, len: usize) -> JumpTable<'seg> {
        JumpTable {
            base,
            len,
            _seg: PhantomData,
        }
    }

    /// Construct a view over an emitted table already borrowed as a slice.
    #[inline]
    pub fn of(entries: &'seg [usize]) -> JumpTable<'seg> {
        JumpTable {
            base: entries.as_ptr(),
            len: entries.len(),
            _seg: PhantomData,
        }
    }

    /// Number of entries, fixed at construction.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-entry table.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first entry (the table's location in the segment).
    #[inline]
    pub fn base(&self) -> *const usize {
        self.base
    }

    /// Look up the code address for `key`.
    ///
    /// Panics if `key` is out of range; dispatch keys are validated by the
    /// generated prologue before reaching the table.
    #[inline]
    pub fn at(&self, key: usize) -> usize {
        assert!(key < self.len, "jump key {} out of range {}", key, self.len);
        // Safety: key is in range and the construction contract guarantees
        // len readable entries at base for 'seg.
        unsafe { self.base.add(key).read() }
    }

    /// Look up the code address for `key`, or `None` when out of range.
    #[inline]
    pub fn get(&self, key: usize) -> Option<usize> {
        if key < self.len {
            // Safety: as in `at`.
            Some(unsafe { self.base.add(key).read() })
        } else {
            None
        }
    }
}

impl fmt::Debug for JumpTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JumpTable")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexing_returns_exact_entries() {
        let entries = [0x1000usize, 0x2040, 0x3fff, 0x0, 0xdead_beef];
        let tab = JumpTable::of(&entries);
        assert_eq!(tab.len(), 5);
        for (k, &addr) in entries.iter().enumerate() {
            assert_eq!(tab.at(k), addr);
            assert_eq!(tab.get(k), Some(addr));
        }
        assert_eq!(tab.get(5), None);
    }

    #[test]
    fn test_view_aliases_backing_storage() {
        let mut entries = [1usize, 2, 3];
        let base = entries.as_mut_ptr();
        let tab = unsafe { JumpTable::over(base as *const usize, entries.len()) };
        assert_eq!(tab.at(1), 2);
        // Patch an entry through the segment pointer; the view must observe
        // it (no copy).
        unsafe { base.add(1).write(99) };
        assert_eq!(tab.at(1), 99);
    }

    #[test]
    fn test_base_is_first_entry() {
        let entries = [7usize, 8];
        let tab = JumpTable::of(&entries);
        assert_eq!(tab.base(), entries.as_ptr());
    }

    #[test]
    fn test_empty_table() {
        let tab = JumpTable::of(&[]);
        assert!(tab.is_empty());
        assert_eq!(tab.get(0), None);
    }

    #[test]
    #[should_panic(expected = "jump key")]
    fn test_out_of_range_key_panics() {
        let entries = [1usize];
        JumpTable::of(&entries).at(1);
    }
}
