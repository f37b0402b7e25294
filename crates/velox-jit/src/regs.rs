//! Virtual register file and operand encoding
//!
//! The code generator compiles against a small, statically known operand
//! namespace: eight scalar registers and eight pointer registers, each class
//! closed off by a sentinel. An operand ([`Argument`]) packs the register
//! class into the top bit of a single byte, so generated code is
//! self-describing about which operands carry traced pointers — the GC map
//! builder reads that tag directly instead of running a separate
//! type-inference pass.
//!
//! Both register classes are exhaustive enums, so an out-of-range register
//! index is unrepresentable rather than detected at run time.

use std::fmt;

/// Mask selecting the register index bits of an [`Argument`].
pub const ARG_MASK: u8 = 0x7f;

/// Kind bit value for scalar operands.
pub const ARG_SCALAR: u8 = 0x00;

/// Kind bit value for pointer-carrying operands.
pub const ARG_POINTER: u8 = 0x80;

/// Index of the sentinel register in each class.
pub const SENTINEL_INDEX: u8 = 8;

/// Scalar (non-pointer) virtual registers.
///
/// `Zero` is the sentinel: it reads as zero and discards writes. Generated
/// code treats it as a no-op target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ScalarReg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    /// Sentinel: reads as zero, writes are discarded.
    Zero = 8,
}

/// Pointer-carrying virtual registers.
///
/// `Nil` is the sentinel: it must never be dereferenced by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum PtrReg {
    P0 = 0,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
    /// Sentinel: holds no object, never dereferenced.
    Nil = 8,
}

/// Register class of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Plain integer/float value, invisible to the collector.
    Scalar,
    /// Traced pointer the collector must be able to find.
    Pointer,
}

/// A packed one-byte operand: low 7 bits register index, top bit kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Argument(u8);

/// A virtual register of either class.
///
/// The seam between the register file and everything downstream (the emitter,
/// the GC map builder): anything that accepts "some register" accepts a `Reg`.
pub trait Reg: Copy {
    /// Pack this register into its operand byte.
    fn arg(self) -> Argument;
}

impl ScalarReg {
    const ALL: [ScalarReg; 9] = [
        ScalarReg::R0,
        ScalarReg::R1,
        ScalarReg::R2,
        ScalarReg::R3,
        ScalarReg::R4,
        ScalarReg::R5,
        ScalarReg::R6,
        ScalarReg::R7,
        ScalarReg::Zero,
    ];

    /// Register index within the scalar class (sentinel = 8).
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Recover a scalar register from its index, if valid.
    #[inline]
    pub fn from_index(index: u8) -> Option<ScalarReg> {
        Self::ALL.get(index as usize).copied()
    }

    /// All registers of this class, sentinel last.
    #[inline]
    pub fn all() -> &'static [ScalarReg] {
        &Self::ALL
    }
}

impl PtrReg {
    const ALL: [PtrReg; 9] = [
        PtrReg::P0,
        PtrReg::P1,
        PtrReg::P2,
        PtrReg::P3,
        PtrReg::P4,
        PtrReg::P5,
        PtrReg::P6,
        PtrReg::P7,
        PtrReg::Nil,
    ];

    /// Register index within the pointer class (sentinel = 8).
    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Recover a pointer register from its index, if valid.
    #[inline]
    pub fn from_index(index: u8) -> Option<PtrReg> {
        Self::ALL.get(index as usize).copied()
    }

    /// All registers of this class, sentinel last.
    #[inline]
    pub fn all() -> &'static [PtrReg] {
        &Self::ALL
    }
}

impl Reg for ScalarReg {
    #[inline]
    fn arg(self) -> Argument {
        Argument(self as u8 | ARG_SCALAR)
    }
}

impl Reg for PtrReg {
    #[inline]
    fn arg(self) -> Argument {
        Argument(self as u8 | ARG_POINTER)
    }
}

impl Argument {
    /// Operand kind, read from the top bit.
    #[inline]
    pub fn kind(self) -> OperandKind {
        if self.0 & ARG_POINTER != 0 {
            OperandKind::Pointer
        } else {
            OperandKind::Scalar
        }
    }

    /// Register index, read from the low 7 bits.
    #[inline]
    pub fn index(self) -> u8 {
        self.0 & ARG_MASK
    }

    /// True if this operand carries a traced pointer.
    #[inline]
    pub fn is_pointer(self) -> bool {
        self.0 & ARG_POINTER != 0
    }

    /// The raw packed byte, as emitted into instruction streams.
    #[inline]
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Classify back into the typed register this operand was packed from.
    ///
    /// Exact inverse of [`Reg::arg`] for every valid register; `None` only
    /// for bytes that never came from a register (index > 8).
    #[inline]
    pub fn register(self) -> Option<Register> {
        match self.kind() {
            OperandKind::Scalar => ScalarReg::from_index(self.index()).map(Register::Scalar),
            OperandKind::Pointer => PtrReg::from_index(self.index()).map(Register::Pointer),
        }
    }
}

/// A classified operand: the typed register recovered from an [`Argument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    /// A register of the scalar class.
    Scalar(ScalarReg),
    /// A register of the pointer class.
    Pointer(PtrReg),
}

impl Reg for Register {
    #[inline]
    fn arg(self) -> Argument {
        match self {
            Register::Scalar(r) => r.arg(),
            Register::Pointer(r) => r.arg(),
        }
    }
}

impl fmt::Display for ScalarReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarReg::Zero => write!(f, "z"),
            r => write!(f, "r{}", r.index()),
        }
    }
}

impl fmt::Display for PtrReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PtrReg::Nil => write!(f, "nil"),
            r => write!(f, "p{}", r.index()),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Register::Scalar(r) => r.fmt(f),
            Register::Pointer(r) => r.fmt(f),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.register() {
            Some(r) => r.fmt(f),
            None => write!(f, "?{:#04x}", self.0),
        }
    }
}
