//! Per-call runtime state for generated encode routines
//!
//! Generated code never recurses on the host call stack. Descending into a
//! nested container pushes a [`Frame`] onto an explicit, preallocated stack
//! inside [`RuntimeState`], so worst-case depth is a hard static bound and
//! over-deep input is a reported error rather than a stack overflow.
//!
//! One `RuntimeState` belongs to exactly one encode/decode invocation at a
//! time; instances may be pooled and [`reset`](RuntimeState::reset) between
//! calls but are never shared across concurrently executing calls.
//!
//! # Emitter ABI
//!
//! Generated code addresses this state by baked-in byte offsets, not through
//! the accessors below. Those offsets come from the layout tables
//! ([`FRAME_LAYOUT`], [`STATE_LAYOUT`]), which are computed once from
//! `offset_of!` rather than maintained by hand; the frame array must stay
//! the first field of `RuntimeState`.

use std::mem::{offset_of, size_of};

use crate::error::EncodeError;

/// Hard bound on container nesting depth. The frame stack holds
/// `MAX_NESTING - 1` usable slots.
pub const MAX_NESTING: usize = 1024;

/// Dedup bitmap size in 64-bit words: one bit per value of the full 16-bit
/// element domain.
pub const BITMAP_WORDS: usize = 1024;

/// Bitmap domain for one-byte set elements.
pub const BITMAP_BITS_I8: usize = 1 << 8;

/// Bitmap domain for two-byte set elements.
pub const BITMAP_BITS_I16: usize = 1 << 16;

/// One level of container-traversal state.
///
/// The cursor is borrowed from the container being walked and is valid only
/// while its frame is live; popping the frame invalidates it. The write
/// pointer aims back into the output buffer (a length placeholder to patch)
/// and only ever advances within one frame's lifetime.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// Remaining element count at this level.
    pub len: usize,
    /// Borrowed iteration cursor into the container's memory.
    pub cur: *const u8,
    /// Write/read cursor into the active output buffer.
    pub wp: *mut u8,
}

impl Frame {
    /// An inactive frame slot.
    pub const EMPTY: Frame = Frame {
        len: 0,
        cur: std::ptr::null(),
        wp: std::ptr::null_mut(),
    };

    /// Start a frame over `len` elements at `cur`.
    pub fn over(len: usize, cur: *const u8) -> Frame {
        Frame {
            len,
            cur,
            wp: std::ptr::null_mut(),
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Frame::EMPTY
    }
}

/// The complete per-invocation state driven by a generated routine.
#[repr(C)]
pub struct RuntimeState {
    // Must stay the first field: generated code indexes frames from the
    // state base pointer.
    frames: [Frame; MAX_NESTING],
    bitmap: [u64; BITMAP_WORDS],
    stash: u64,
    depth: usize,
}

impl RuntimeState {
    /// Allocate a fresh state. Boxed: the frame array and bitmap make this
    /// a large value.
    pub fn new() -> Box<RuntimeState> {
        Box::new(RuntimeState {
            frames: [Frame::EMPTY; MAX_NESTING],
            bitmap: [0; BITMAP_WORDS],
            stash: 0,
            depth: 0,
        })
    }

    /// Current nesting depth (live frame count).
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True when no container is being traversed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    /// Push a new top-of-stack frame.
    ///
    /// Fails once `MAX_NESTING - 1` frames are live; callers surface this as
    /// a structured "too deeply nested" error. Depth is unchanged on
    /// failure.
    #[inline]
    pub fn push(&mut self, frame: Frame) -> Result<(), EncodeError> {
        if self.depth >= MAX_NESTING - 1 {
            return Err(EncodeError::NestingTooDeep {
                limit: MAX_NESTING - 1,
            });
        }
        self.frames[self.depth] = frame;
        self.depth += 1;
        Ok(())
    }

    /// Discard the top frame, invalidating its cursor.
    ///
    /// Balance against [`push`](RuntimeState::push) is guaranteed by the
    /// code generator, not checked here.
    #[inline]
    pub fn pop(&mut self) -> Frame {
        debug_assert!(self.depth > 0, "pop on empty frame stack");
        self.depth -= 1;
        self.frames[self.depth]
    }

    /// The active frame.
    #[inline]
    pub fn current(&mut self) -> &mut Frame {
        debug_assert!(self.depth > 0, "no active frame");
        &mut self.frames[self.depth - 1]
    }

    /// Clear the first `domain_bits` bits of the dedup bitmap.
    ///
    /// Called before encoding a set of small integers; only the words
    /// covering the element type's value domain are touched.
    #[inline]
    pub fn bitmap_reset(&mut self, domain_bits: usize) {
        debug_assert!(domain_bits <= BITMAP_BITS_I16);
        let words = (domain_bits + 63) / 64;
        self.bitmap[..words].fill(0);
    }

    /// Test bit `index` and set it, returning whether it was already set.
    ///
    /// `index` must be inside the domain passed to the preceding
    /// [`bitmap_reset`](RuntimeState::bitmap_reset).
    #[inline]
    pub fn bitmap_test_set(&mut self, index: usize) -> bool {
        debug_assert!(index < BITMAP_BITS_I16);
        let word = &mut self.bitmap[index / 64];
        let mask = 1u64 << (index % 64);
        let seen = *word & mask != 0;
        *word |= mask;
        seen
    }

    /// Store into the scratch slot.
    ///
    /// The stash carries one value between non-adjacent points of generated
    /// code (frames have no room for ad-hoc extras).
    #[inline]
    pub fn stash(&mut self, value: u64) {
        self.stash = value;
    }

    /// Read the scratch slot, clearing it.
    #[inline]
    pub fn take_stash(&mut self) -> u64 {
        std::mem::take(&mut self.stash)
    }

    /// Truncate the frame stack and clear the stash so this state can back
    /// another top-level call. Bitmap words are cleared lazily at use sites,
    /// not here.
    pub fn reset(&mut self) {
        self.depth = 0;
        self.stash = 0;
    }
}

/// One entry of a layout table: a named field's offset and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name, for emitter diagnostics.
    pub name: &'static str,
    /// Byte offset from the owning value's base.
    pub offset: usize,
    /// Field size in bytes.
    pub size: usize,
}

/// Size of one frame slot.
pub const FRAME_SIZE: usize = size_of::<Frame>();

/// Byte offset of the last usable frame slot from the state base.
pub const FRAMES_MAX_OFFSET: usize = (MAX_NESTING - 1) * FRAME_SIZE;

/// Layout of [`Frame`], as baked into generated loads and stores.
pub const FRAME_LAYOUT: [FieldLayout; 3] = [
    FieldLayout {
        name: "len",
        offset: offset_of!(Frame, len),
        size: size_of::<usize>(),
    },
    FieldLayout {
        name: "cur",
        offset: offset_of!(Frame, cur),
        size: size_of::<*const u8>(),
    },
    FieldLayout {
        name: "wp",
        offset: offset_of!(Frame, wp),
        size: size_of::<*mut u8>(),
    },
];

/// Layout of [`RuntimeState`], as baked into generated loads and stores.
pub const STATE_LAYOUT: [FieldLayout; 3] = [
    FieldLayout {
        name: "frames",
        offset: offset_of!(RuntimeState, frames),
        size: MAX_NESTING * FRAME_SIZE,
    },
    FieldLayout {
        name: "bitmap",
        offset: offset_of!(RuntimeState, bitmap),
        size: BITMAP_WORDS * size_of::<u64>(),
    },
    FieldLayout {
        name: "stash",
        offset: offset_of!(RuntimeState, stash),
        size: size_of::<u64>(),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_to_bound_then_overflow() {
        let mut st = RuntimeState::new();
        for i in 0..MAX_NESTING - 1 {
            assert_eq!(st.depth(), i);
            st.push(Frame::EMPTY).unwrap();
        }
        let err = st.push(Frame::EMPTY).unwrap_err();
        assert_eq!(
            err,
            EncodeError::NestingTooDeep {
                limit: MAX_NESTING - 1
            }
        );
        // Depth unchanged by the failed push.
        assert_eq!(st.depth(), MAX_NESTING - 1);
    }

    #[test]
    fn test_push_pop_current() {
        let mut st = RuntimeState::new();
        let data = [1u8, 2, 3];
        st.push(Frame::over(3, data.as_ptr())).unwrap();
        assert_eq!(st.current().len, 3);

        st.current().len = 2;
        st.push(Frame::over(7, std::ptr::null())).unwrap();
        assert_eq!(st.current().len, 7);

        let top = st.pop();
        assert_eq!(top.len, 7);
        // Outer frame untouched by the inner one.
        assert_eq!(st.current().len, 2);
        assert_eq!(st.current().cur, data.as_ptr());
    }

    #[test]
    fn test_bitmap_dedup() {
        let mut st = RuntimeState::new();
        st.bitmap_reset(BITMAP_BITS_I8);
        assert!(!st.bitmap_test_set(11));
        assert!(!st.bitmap_test_set(12));
        assert!(st.bitmap_test_set(11));

        // Reset clears the dirtied words.
        st.bitmap_reset(BITMAP_BITS_I8);
        assert!(!st.bitmap_test_set(11));
    }

    #[test]
    fn test_bitmap_i16_domain() {
        let mut st = RuntimeState::new();
        st.bitmap_reset(BITMAP_BITS_I16);
        let idx = (-1i16) as u16 as usize; // 65535, top of the domain
        assert!(!st.bitmap_test_set(idx));
        assert!(st.bitmap_test_set(idx));
    }

    #[test]
    fn test_stash() {
        let mut st = RuntimeState::new();
        st.stash(0xfeed);
        assert_eq!(st.take_stash(), 0xfeed);
        assert_eq!(st.take_stash(), 0);
    }

    #[test]
    fn test_reset_for_pooling() {
        let mut st = RuntimeState::new();
        st.push(Frame::over(1, std::ptr::null())).unwrap();
        st.stash(9);
        st.reset();
        assert!(st.is_empty());
        assert_eq!(st.take_stash(), 0);
    }

    #[test]
    fn test_layout_tables_match_reflection() {
        assert_eq!(FRAME_LAYOUT[0].offset, offset_of!(Frame, len));
        assert_eq!(FRAME_LAYOUT[1].offset, offset_of!(Frame, cur));
        assert_eq!(FRAME_LAYOUT[2].offset, offset_of!(Frame, wp));
        assert_eq!(
            FRAME_LAYOUT.iter().map(|f| f.size).sum::<usize>(),
            FRAME_SIZE
        );

        // The frame array anchors the state layout.
        assert_eq!(STATE_LAYOUT[0].offset, 0);
        assert!(STATE_LAYOUT[1].offset >= MAX_NESTING * FRAME_SIZE);
        assert_eq!(FRAMES_MAX_OFFSET, (MAX_NESTING - 1) * FRAME_SIZE);
    }
}
