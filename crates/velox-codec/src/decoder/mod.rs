//! Decoder: wire buffers back to owned values
//!
//! Decoding is descriptor-driven: the same [`TypeDescr`] tree that compiled
//! the encoder tells the decoder what each header and element must be, and
//! the output is an owned [`DecodedValue`] tree. Scalar readers are
//! dispatched through a [`JumpTable`] view over a static handler table — the
//! same O(1) dense-key dispatch generated decoders use over their emitted
//! code-address tables.
//!
//! The first error ends the decode; there is no resynchronization.

use once_cell::sync::Lazy;

use velox_jit::jumptab::JumpTable;

use crate::descr::{FieldDescr, Kind, TypeDescr, WireType};
use crate::error::DecodeError;

/// Depth bound for decoding.
///
/// Unlike the encoder, the decoder recurses natively — one host-stack frame
/// per nesting level — so the bound is sized to fit a minimal thread stack,
/// not the encoder's explicit frame stack. Over-deep input is a reported
/// error, never a stack overflow.
pub const MAX_DECODE_NESTING: usize = 128;

/// An owned decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    /// One-byte boolean.
    Bool(bool),
    /// One-byte integer.
    Byte(i8),
    /// Two-byte integer.
    I16(i16),
    /// Four-byte integer.
    I32(i32),
    /// Eight-byte integer.
    I64(i64),
    /// Eight-byte double.
    Double(f64),
    /// Enumeration value, widened back to its in-memory width.
    Enum(i64),
    /// Decoded string, when the payload is valid UTF-8.
    Str(String),
    /// Non-UTF-8 payload behind the string wire tag, kept byte-exact.
    Bytes(Vec<u8>),
    /// List elements in order.
    List(Vec<DecodedValue>),
    /// Set elements in order of appearance.
    Set(Vec<DecodedValue>),
    /// Map entries in order of appearance.
    Map(Vec<(DecodedValue, DecodedValue)>),
    /// Struct fields as (field id, value), in order of appearance.
    Struct(Vec<(i16, DecodedValue)>),
}

/// Cursor over an input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof(self.pos));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

type ScalarReadFn = for<'a> fn(&mut Reader<'a>) -> Result<DecodedValue, DecodeError>;

fn read_bool(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::Bool(r.read_u8()? != 0))
}

fn read_byte(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::Byte(r.read_u8()? as i8))
}

fn read_double(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::Double(f64::from_bits(r.read_u64()?)))
}

fn read_i16(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::I16(r.read_u16()? as i16))
}

fn read_i32(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::I32(r.read_u32()? as i32))
}

fn read_i64(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::I64(r.read_u64()? as i64))
}

fn read_enum(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    Ok(DecodedValue::Enum(r.read_u32()? as i32 as i64))
}

fn read_string(r: &mut Reader<'_>) -> Result<DecodedValue, DecodeError> {
    let len = r.read_u32()? as usize;
    let bytes = r.read_bytes(len)?;
    // Binary payloads share the string wire tag; never rewrite them.
    Ok(match std::str::from_utf8(bytes) {
        Ok(s) => DecodedValue::Str(s.to_owned()),
        Err(_) => DecodedValue::Bytes(bytes.to_vec()),
    })
}

/// Dense scalar dispatch table: handler addresses indexed by
/// [`scalar_key`]. Read through a [`JumpTable`] view, never copied.
static SCALAR_HANDLERS: Lazy<[usize; 8]> = Lazy::new(|| {
    [
        (read_bool as ScalarReadFn) as usize,
        (read_byte as ScalarReadFn) as usize,
        (read_double as ScalarReadFn) as usize,
        (read_i16 as ScalarReadFn) as usize,
        (read_i32 as ScalarReadFn) as usize,
        (read_i64 as ScalarReadFn) as usize,
        (read_enum as ScalarReadFn) as usize,
        (read_string as ScalarReadFn) as usize,
    ]
});

fn scalar_key(kind: Kind) -> usize {
    match kind {
        Kind::Bool => 0,
        Kind::Byte => 1,
        Kind::Double => 2,
        Kind::I16 => 3,
        Kind::I32 => 4,
        Kind::I64 => 5,
        Kind::Enum => 6,
        Kind::String => 7,
        _ => unreachable!("container kind has no scalar handler"),
    }
}

fn scalar_handler(kind: Kind) -> ScalarReadFn {
    let tab = JumpTable::of(&*SCALAR_HANDLERS);
    let addr = tab.at(scalar_key(kind));
    // Safety: every table entry was stored as a ScalarReadFn address above.
    unsafe { std::mem::transmute::<usize, ScalarReadFn>(addr) }
}

/// Decode one value of type `descr` from `buf`, requiring the buffer to be
/// fully consumed.
pub fn decode(descr: &TypeDescr, buf: &[u8]) -> Result<DecodedValue, DecodeError> {
    let mut r = Reader::new(buf);
    let v = decode_value(descr, &mut r, 0)?;
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(v)
}

fn check_depth(depth: usize) -> Result<(), DecodeError> {
    if depth >= MAX_DECODE_NESTING {
        return Err(DecodeError::NestingTooDeep {
            limit: MAX_DECODE_NESTING,
        });
    }
    Ok(())
}

fn expect_tag(r: &mut Reader<'_>, expected: WireType) -> Result<(), DecodeError> {
    let found = r.read_u8()?;
    if found != expected as u8 {
        return Err(DecodeError::TypeMismatch {
            expected: expected as u8,
            found,
        });
    }
    Ok(())
}

fn decode_value(
    descr: &TypeDescr,
    r: &mut Reader<'_>,
    depth: usize,
) -> Result<DecodedValue, DecodeError> {
    match descr.kind {
        Kind::List | Kind::Set => {
            check_depth(depth)?;
            let elem = descr
                .elem
                .as_deref()
                .expect("compiled descriptor without element");
            expect_tag(r, elem.kind.wire())?;
            let n = r.read_u32()? as usize;
            let mut items = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                items.push(decode_value(elem, r, depth + 1)?);
            }
            Ok(if descr.kind == Kind::List {
                DecodedValue::List(items)
            } else {
                DecodedValue::Set(items)
            })
        }
        Kind::Map => {
            check_depth(depth)?;
            let key = descr
                .key
                .as_deref()
                .expect("compiled descriptor without key");
            let value = descr
                .value
                .as_deref()
                .expect("compiled descriptor without value");
            expect_tag(r, key.kind.wire())?;
            expect_tag(r, value.kind.wire())?;
            let n = r.read_u32()? as usize;
            let mut entries = Vec::with_capacity(n.min(4096));
            for _ in 0..n {
                let k = decode_value(key, r, depth + 1)?;
                let v = decode_value(value, r, depth + 1)?;
                entries.push((k, v));
            }
            Ok(DecodedValue::Map(entries))
        }
        Kind::Struct => {
            check_depth(depth)?;
            let mut fields = Vec::with_capacity(descr.fields.len());
            loop {
                let tag = r.read_u8()?;
                if tag == WireType::Stop as u8 {
                    break;
                }
                let wire = WireType::from_tag(tag).ok_or(DecodeError::InvalidType(tag))?;
                let id = r.read_u16()? as i16;
                match field_by_id(descr, id) {
                    Some(field) => {
                        if field.descr.kind.wire() != wire {
                            return Err(DecodeError::TypeMismatch {
                                expected: field.descr.kind.wire() as u8,
                                found: tag,
                            });
                        }
                        fields.push((id, decode_value(&field.descr, r, depth + 1)?));
                    }
                    // Unknown field: schema evolution, skip the value.
                    None => skip_value(wire, r, depth + 1)?,
                }
            }
            Ok(DecodedValue::Struct(fields))
        }
        _ => scalar_handler(descr.kind)(r),
    }
}

fn field_by_id(descr: &TypeDescr, id: i16) -> Option<&FieldDescr> {
    descr.fields.iter().find(|f| f.id == id)
}

/// Skip one value of wire type `wire` without materializing it.
fn skip_value(wire: WireType, r: &mut Reader<'_>, depth: usize) -> Result<(), DecodeError> {
    match wire {
        WireType::Stop => Err(DecodeError::InvalidType(WireType::Stop as u8)),
        WireType::Bool | WireType::Byte => r.read_bytes(1).map(|_| ()),
        WireType::I16 => r.read_bytes(2).map(|_| ()),
        WireType::I32 => r.read_bytes(4).map(|_| ()),
        WireType::Double | WireType::I64 => r.read_bytes(8).map(|_| ()),
        WireType::Binary => {
            let len = r.read_u32()? as usize;
            r.read_bytes(len).map(|_| ())
        }
        WireType::List | WireType::Set => {
            check_depth(depth)?;
            let tag = r.read_u8()?;
            let elem = WireType::from_tag(tag).ok_or(DecodeError::InvalidType(tag))?;
            let n = r.read_u32()? as usize;
            for _ in 0..n {
                skip_value(elem, r, depth + 1)?;
            }
            Ok(())
        }
        WireType::Map => {
            check_depth(depth)?;
            let ktag = r.read_u8()?;
            let key = WireType::from_tag(ktag).ok_or(DecodeError::InvalidType(ktag))?;
            let vtag = r.read_u8()?;
            let value = WireType::from_tag(vtag).ok_or(DecodeError::InvalidType(vtag))?;
            let n = r.read_u32()? as usize;
            for _ in 0..n {
                skip_value(key, r, depth + 1)?;
                skip_value(value, r, depth + 1)?;
            }
            Ok(())
        }
        WireType::Struct => {
            check_depth(depth)?;
            loop {
                let tag = r.read_u8()?;
                if tag == WireType::Stop as u8 {
                    return Ok(());
                }
                let wire = WireType::from_tag(tag).ok_or(DecodeError::InvalidType(tag))?;
                r.read_bytes(2)?; // field id
                skip_value(wire, r, depth + 1)?;
            }
        }
    }
}
