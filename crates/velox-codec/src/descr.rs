//! Type descriptors and the in-memory container ABI
//!
//! The schema grammar and its parser live outside this crate; what the codec
//! consumes is a tree of [`TypeDescr`] values giving each type's wire tag,
//! fixed in-memory size, and container shape. Compiled routines walk raw
//! value memory using nothing but these descriptors, so the `#[repr(C)]`
//! layouts here are part of the emitter ABI and must not change shape.

use std::sync::Arc;

/// Wire type tags (binary protocol values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Terminates a struct's field list.
    Stop = 0,
    /// One-byte boolean.
    Bool = 2,
    /// One-byte integer.
    Byte = 3,
    /// Eight-byte IEEE 754 double.
    Double = 4,
    /// Two-byte big-endian integer.
    I16 = 6,
    /// Four-byte big-endian integer.
    I32 = 8,
    /// Eight-byte big-endian integer.
    I64 = 10,
    /// Length-prefixed bytes (strings share this tag).
    Binary = 11,
    /// Field sequence terminated by [`WireType::Stop`].
    Struct = 12,
    /// Key/value pairs behind a two-tag header.
    Map = 13,
    /// Like a list, with element uniqueness.
    Set = 14,
    /// Element sequence behind a one-tag header.
    List = 15,
}

impl WireType {
    /// Decode a wire tag byte, if it is a valid protocol value.
    pub fn from_tag(tag: u8) -> Option<WireType> {
        Some(match tag {
            0 => WireType::Stop,
            2 => WireType::Bool,
            3 => WireType::Byte,
            4 => WireType::Double,
            6 => WireType::I16,
            8 => WireType::I32,
            10 => WireType::I64,
            11 => WireType::Binary,
            12 => WireType::Struct,
            13 => WireType::Map,
            14 => WireType::Set,
            15 => WireType::List,
            _ => return None,
        })
    }
}

/// Element type kinds as the schema compiler sees them.
///
/// Richer than [`WireType`]: `Enum` is distinct from `I32` in memory (stored
/// as an `i64`, encoded as a four-byte integer) even though both share the
/// same wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// One-byte boolean.
    Bool,
    /// One-byte integer.
    Byte,
    /// Eight-byte IEEE 754 double.
    Double,
    /// Two-byte integer.
    I16,
    /// Four-byte integer.
    I32,
    /// Eight-byte integer.
    I64,
    /// Enumeration: `i64` in memory, four bytes on the wire.
    Enum,
    /// Length-prefixed string/bytes.
    String,
    /// Record with tagged fields.
    Struct,
    /// Key/value container.
    Map,
    /// Unique-element container.
    Set,
    /// Ordered container.
    List,
}

impl Kind {
    /// The wire tag values of this kind carry.
    pub fn wire(self) -> WireType {
        match self {
            Kind::Bool => WireType::Bool,
            Kind::Byte => WireType::Byte,
            Kind::Double => WireType::Double,
            Kind::I16 => WireType::I16,
            Kind::I32 | Kind::Enum => WireType::I32,
            Kind::I64 => WireType::I64,
            Kind::String => WireType::Binary,
            Kind::Struct => WireType::Struct,
            Kind::Map => WireType::Map,
            Kind::Set => WireType::Set,
            Kind::List => WireType::List,
        }
    }

    /// True for kinds encoded without recursing into child values.
    pub fn is_scalar(self) -> bool {
        !matches!(self, Kind::Struct | Kind::Map | Kind::Set | Kind::List)
    }
}

/// In-memory representation of lists, sets, and strings: a data pointer and
/// an element (or byte) count.
///
/// Generated code reads this header straight out of value memory, so the
/// layout is fixed. The pointer is borrowed; a `RawList` never owns its
/// elements.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawList {
    /// First element (or first byte, for strings).
    pub ptr: *const u8,
    /// Element count (byte count, for strings).
    pub len: usize,
}

impl RawList {
    /// An empty container.
    pub fn empty() -> RawList {
        RawList {
            ptr: std::ptr::null(),
            len: 0,
        }
    }

    /// View a slice's elements. The slice must outlive every use of the
    /// returned header.
    pub fn from_slice<T>(s: &[T]) -> RawList {
        RawList {
            ptr: s.as_ptr() as *const u8,
            len: s.len(),
        }
    }

    /// View a string's bytes. The string must outlive every use of the
    /// returned header.
    pub fn from_str(s: &str) -> RawList {
        RawList {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }
}

/// Strings use the same two-word header as lists.
pub type RawString = RawList;

/// One field of a struct descriptor.
#[derive(Debug, Clone)]
pub struct FieldDescr {
    /// Wire field id.
    pub id: i16,
    /// Byte offset of the field inside the struct's memory.
    pub offset: usize,
    /// The field's type.
    pub descr: Arc<TypeDescr>,
}

/// A schema type descriptor.
///
/// Built by the (external) schema compiler, interned behind `Arc`, and
/// treated as immutable by everything here. Descriptor identity (the `Arc`
/// address) is the compile cache key.
#[derive(Debug, Clone)]
pub struct TypeDescr {
    /// Element type kind.
    pub kind: Kind,
    /// Fixed in-memory size of a value of this type, in bytes.
    pub size: usize,
    /// Whether values of this type are stored behind a pointer (e.g. struct
    /// elements inside a list are `*const Struct` cells).
    pub is_pointer: bool,
    /// Element descriptor for lists and sets.
    pub elem: Option<Arc<TypeDescr>>,
    /// Key descriptor for maps.
    pub key: Option<Arc<TypeDescr>>,
    /// Value descriptor for maps.
    pub value: Option<Arc<TypeDescr>>,
    /// Field table for structs, in encode order.
    pub fields: Vec<FieldDescr>,
}

impl TypeDescr {
    fn scalar(kind: Kind, size: usize) -> TypeDescr {
        TypeDescr {
            kind,
            size,
            is_pointer: false,
            elem: None,
            key: None,
            value: None,
            fields: Vec::new(),
        }
    }

    /// One-byte boolean.
    pub fn bool_() -> TypeDescr {
        TypeDescr::scalar(Kind::Bool, 1)
    }

    /// One-byte integer.
    pub fn byte() -> TypeDescr {
        TypeDescr::scalar(Kind::Byte, 1)
    }

    /// Two-byte integer.
    pub fn i16() -> TypeDescr {
        TypeDescr::scalar(Kind::I16, 2)
    }

    /// Four-byte integer.
    pub fn i32() -> TypeDescr {
        TypeDescr::scalar(Kind::I32, 4)
    }

    /// Eight-byte integer.
    pub fn i64() -> TypeDescr {
        TypeDescr::scalar(Kind::I64, 8)
    }

    /// Eight-byte double.
    pub fn double() -> TypeDescr {
        TypeDescr::scalar(Kind::Double, 8)
    }

    /// Enumeration: `i64` in memory, four bytes on the wire.
    pub fn enum_() -> TypeDescr {
        TypeDescr::scalar(Kind::Enum, 8)
    }

    /// Length-prefixed string.
    pub fn string() -> TypeDescr {
        TypeDescr::scalar(Kind::String, std::mem::size_of::<RawString>())
    }

    /// List of `elem`.
    pub fn list(elem: Arc<TypeDescr>) -> TypeDescr {
        TypeDescr {
            kind: Kind::List,
            size: std::mem::size_of::<RawList>(),
            is_pointer: false,
            elem: Some(elem),
            key: None,
            value: None,
            fields: Vec::new(),
        }
    }

    /// Set of `elem`.
    pub fn set(elem: Arc<TypeDescr>) -> TypeDescr {
        TypeDescr {
            kind: Kind::Set,
            size: std::mem::size_of::<RawList>(),
            is_pointer: false,
            elem: Some(elem),
            key: None,
            value: None,
            fields: Vec::new(),
        }
    }

    /// Map from `key` to `value`, stored as a pair array (consecutive
    /// key/value cells behind one [`RawList`] header).
    pub fn map(key: Arc<TypeDescr>, value: Arc<TypeDescr>) -> TypeDescr {
        TypeDescr {
            kind: Kind::Map,
            size: std::mem::size_of::<RawList>(),
            is_pointer: false,
            elem: None,
            key: Some(key),
            value: Some(value),
            fields: Vec::new(),
        }
    }

    /// Struct with the given in-memory size and field table.
    ///
    /// `is_pointer` marks struct values that are stored as pointer cells
    /// wherever they appear (the usual case for struct list elements and
    /// struct-typed fields).
    pub fn strukt(size: usize, is_pointer: bool, fields: Vec<FieldDescr>) -> TypeDescr {
        TypeDescr {
            kind: Kind::Struct,
            size,
            is_pointer,
            elem: None,
            key: None,
            value: None,
            fields,
        }
    }

    /// Size of one slot holding a value of this type: the pointed-to size,
    /// or a pointer's size for pointer-stored values.
    #[inline]
    pub fn slot_size(&self) -> usize {
        if self.is_pointer {
            std::mem::size_of::<*const u8>()
        } else {
            self.size
        }
    }
}
