//! Value pool encoding and decoding
//!
//! Values are stored in the MaxMind DB data-section encoding, so the same
//! decoder reads our own value pool and the data sections of GeoLite2
//! databases used as point-lookup sources.
//!
//! # Format
//!
//! Every value starts with a control byte: type in the top 3 bits, size in the
//! low 5 bits. Type 0 means "extended": the next byte holds `type - 7`. Sizes
//! 29, 30 and 31 are followed by 1, 2 or 3 extra size bytes. Unsigned integers
//! are stored big-endian with leading zero bytes dropped. Pointers (type 1)
//! refer to offsets relative to the start of the section.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{self, MergeError};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;

const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Strings shorter than this are stored inline; a pointer would not be smaller
const INTERN_MIN_LEN: usize = 4;

/// Largest size a control byte can express (size bits 31 plus 3 bytes)
const MAX_ENCODED_SIZE: usize = 65_821 + 0x00FF_FFFF;

/// Nesting limit while decoding (maps, arrays and pointer hops)
const MAX_DEPTH: usize = 32;

/// Data value that can be stored in the value pool
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys, sorted)
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// String payload, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer widened to u64 (None if it does not fit)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Map entry lookup
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Follow a path of map keys, e.g. `["country", "names", "en"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&DataValue> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }
}

/// Value pool encoder
///
/// Identical values are stored once and share an offset. With string
/// interning enabled, map keys and string values are also stored once and
/// referenced through pointers.
pub struct DataEncoder {
    buffer: Vec<u8>,
    dedup_map: FxHashMap<Vec<u8>, u32>,
    strings: FxHashMap<String, u32>,
    intern_strings: bool,
}

impl DataEncoder {
    /// Create an encoder with string interning (value pools)
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: FxHashMap::default(),
            strings: FxHashMap::default(),
            intern_strings: true,
        }
    }

    /// Create an encoder that never emits pointers
    ///
    /// The first encoded value lands at offset 0, as metadata readers expect.
    pub fn plain() -> Self {
        Self {
            intern_strings: false,
            ..Self::new()
        }
    }

    /// Encode a value and return its offset, reusing the offset of an
    /// identical earlier value
    ///
    /// # Errors
    /// [`MergeError::Format`] if the section would pass 4 GiB or a string,
    /// map or array is longer than the encoding can express.
    pub fn encode(&mut self, value: &DataValue) -> error::Result<u32> {
        let mut temp = Vec::new();
        self.encode_value(value, &mut temp)?;

        if let Some(&offset) = self.dedup_map.get(&temp) {
            return Ok(offset);
        }

        let offset = self.next_offset()?;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        Ok(offset)
    }

    /// Get the final encoded section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current section size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn next_offset(&self) -> error::Result<u32> {
        u32::try_from(self.buffer.len()).map_err(|_| {
            MergeError::Format(format!(
                "data section of {} bytes exceeds 4 GiB",
                self.buffer.len()
            ))
        })
    }

    fn encode_value(&mut self, value: &DataValue, out: &mut Vec<u8>) -> error::Result<()> {
        match value {
            DataValue::String(s) => self.encode_str(s, out)?,
            DataValue::Double(d) => {
                write_control(TYPE_DOUBLE, 8, out)?;
                out.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                write_control(TYPE_BYTES, b.len(), out)?;
                out.extend_from_slice(b);
            }
            DataValue::Uint16(n) => write_uint(TYPE_UINT16, *n as u128, out)?,
            DataValue::Uint32(n) => write_uint(TYPE_UINT32, *n as u128, out)?,
            DataValue::Uint64(n) => write_uint(TYPE_UINT64, *n as u128, out)?,
            DataValue::Uint128(n) => write_uint(TYPE_UINT128, *n, out)?,
            DataValue::Int32(n) => {
                write_control(TYPE_INT32, 4, out)?;
                out.extend_from_slice(&n.to_be_bytes());
            }
            DataValue::Map(m) => {
                write_control(TYPE_MAP, m.len(), out)?;
                for (key, value) in m {
                    self.encode_str(key, out)?;
                    self.encode_value(value, out)?;
                }
            }
            DataValue::Array(a) => {
                write_control(TYPE_ARRAY, a.len(), out)?;
                for value in a {
                    self.encode_value(value, out)?;
                }
            }
            DataValue::Bool(b) => write_control(TYPE_BOOL, *b as usize, out)?,
            DataValue::Float(f) => {
                write_control(TYPE_FLOAT, 4, out)?;
                out.extend_from_slice(&f.to_be_bytes());
            }
        }
        Ok(())
    }

    fn encode_str(&mut self, s: &str, out: &mut Vec<u8>) -> error::Result<()> {
        if self.intern_strings && s.len() >= INTERN_MIN_LEN {
            let offset = self.intern(s)?;
            write_pointer(offset, out);
            Ok(())
        } else {
            write_string(s, out)
        }
    }

    fn intern(&mut self, s: &str) -> error::Result<u32> {
        if let Some(&offset) = self.strings.get(s) {
            return Ok(offset);
        }
        let offset = self.next_offset()?;
        write_string(s, &mut self.buffer)?;
        self.strings.insert(s.to_string(), offset);
        Ok(offset)
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) -> error::Result<()> {
    write_control(TYPE_STRING, s.len(), out)?;
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Unsigned integers drop leading zero bytes
fn write_uint(type_id: u8, value: u128, out: &mut Vec<u8>) -> error::Result<()> {
    let width = match type_id {
        TYPE_UINT16 => 2,
        TYPE_UINT32 => 4,
        TYPE_UINT64 => 8,
        _ => 16,
    };
    let bytes = value.to_be_bytes();
    let significant = &bytes[16 - width..];
    let skip = significant.iter().take_while(|&&b| b == 0).count();
    write_control(type_id, width - skip, out)?;
    out.extend_from_slice(&significant[skip..]);
    Ok(())
}

/// Control byte(s) for a non-pointer type
fn write_control(type_id: u8, size: usize, out: &mut Vec<u8>) -> error::Result<()> {
    if size > MAX_ENCODED_SIZE {
        return Err(MergeError::Format(format!(
            "value of size {} exceeds the data section limit of {}",
            size, MAX_ENCODED_SIZE
        )));
    }

    let (type_bits, extended) = if type_id <= 7 {
        (type_id << 5, None)
    } else {
        (TYPE_EXTENDED, Some(type_id - 7))
    };

    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 29 + 256 + 65536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        let rest = u32::try_from(size - 65_821)
            .map_err(|_| MergeError::Format(format!("value size {} out of range", size)))?;
        (31, rest.to_be_bytes()[1..].to_vec())
    };

    out.push(type_bits | size_bits);
    if let Some(ext) = extended {
        out.push(ext);
    }
    out.extend_from_slice(&extra);
    Ok(())
}

fn write_pointer(offset: u32, out: &mut Vec<u8>) {
    let ctrl = TYPE_POINTER << 5;
    if offset < 0x800 {
        out.push(ctrl | ((offset >> 8) & 0x7) as u8);
        out.push(offset as u8);
    } else if offset < 0x80800 {
        let v = offset - 0x800;
        out.push(ctrl | 0x08 | ((v >> 16) & 0x7) as u8);
        out.extend_from_slice(&[(v >> 8) as u8, v as u8]);
    } else if offset < 0x8080800 {
        let v = offset - 0x80800;
        out.push(ctrl | 0x10 | ((v >> 24) & 0x7) as u8);
        out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
    } else {
        out.push(ctrl | 0x18);
        out.extend_from_slice(&offset.to_be_bytes());
    }
}

/// Decoding failure with the section offset where it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    /// Offset into the section
    pub offset: usize,
    /// What went wrong
    pub reason: &'static str,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.reason, self.offset)
    }
}

impl std::error::Error for DecodeError {}

/// Decodes values from an encoded section, resolving pointers
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder over one section (pointer base = start of `buffer`)
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value at `offset`
    pub fn decode(&self, offset: u32) -> Result<DataValue, DecodeError> {
        let mut cursor = offset as usize;
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(self.error(*cursor, "Nesting too deep"));
        }

        let start = *cursor;
        let ctrl = self.byte(cursor)?;
        let mut type_id = ctrl >> 5;

        if type_id == TYPE_POINTER {
            let target = self.read_pointer(cursor, ctrl)? as usize;
            if self.peek(target)? >> 5 == TYPE_POINTER {
                return Err(self.error(target, "Pointer to pointer"));
            }
            let mut target_cursor = target;
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        if type_id == TYPE_EXTENDED {
            let ext = self.byte(cursor)?;
            type_id = ext
                .checked_add(7)
                .ok_or_else(|| self.error(start, "Invalid extended type"))?;
        }

        let size = self.read_size(cursor, ctrl & 0x1F)?;

        match type_id {
            TYPE_STRING => {
                let bytes = self.take(cursor, size)?;
                let s = std::str::from_utf8(bytes).map_err(|_| self.error(start, "Invalid UTF-8"))?;
                Ok(DataValue::String(s.to_string()))
            }
            TYPE_DOUBLE => {
                let bytes = self.take_exact::<8>(cursor, size)?;
                Ok(DataValue::Double(f64::from_be_bytes(bytes)))
            }
            TYPE_BYTES => Ok(DataValue::Bytes(self.take(cursor, size)?.to_vec())),
            TYPE_UINT16 => Ok(DataValue::Uint16(self.read_uint(cursor, size, 2)? as u16)),
            TYPE_UINT32 => Ok(DataValue::Uint32(self.read_uint(cursor, size, 4)? as u32)),
            TYPE_INT32 => Ok(DataValue::Int32(self.read_uint(cursor, size, 4)? as u32 as i32)),
            TYPE_UINT64 => Ok(DataValue::Uint64(self.read_uint(cursor, size, 8)? as u64)),
            TYPE_UINT128 => Ok(DataValue::Uint128(self.read_uint(cursor, size, 16)?)),
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let key = match self.decode_at(cursor, depth + 1)? {
                        DataValue::String(s) => s,
                        _ => return Err(self.error(*cursor, "Map key must be string")),
                    };
                    let value = self.decode_at(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            TYPE_ARRAY => {
                // Each element needs at least one byte
                let mut array = Vec::with_capacity(size.min(self.buffer.len()));
                for _ in 0..size {
                    array.push(self.decode_at(cursor, depth + 1)?);
                }
                Ok(DataValue::Array(array))
            }
            TYPE_BOOL => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err(self.error(start, "Invalid boolean size")),
            },
            TYPE_FLOAT => {
                let bytes = self.take_exact::<4>(cursor, size)?;
                Ok(DataValue::Float(f32::from_be_bytes(bytes)))
            }
            _ => Err(self.error(start, "Unknown data type")),
        }
    }

    fn read_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<u32, DecodeError> {
        let size_bits = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as u32;
        let offset = match size_bits {
            0 => {
                let b = self.take(cursor, 1)?;
                (high << 8) | b[0] as u32
            }
            1 => {
                let b = self.take(cursor, 2)?;
                0x800 + ((high << 16) | (b[0] as u32) << 8 | b[1] as u32)
            }
            2 => {
                let b = self.take(cursor, 3)?;
                0x80800 + ((high << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
            }
            _ => {
                let b = self.take(cursor, 4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        Ok(offset)
    }

    fn read_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize, DecodeError> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + self.take(cursor, 1)?[0] as usize),
            30 => {
                let b = self.take(cursor, 2)?;
                Ok(285 + u16::from_be_bytes([b[0], b[1]]) as usize)
            }
            _ => {
                let b = self.take(cursor, 3)?;
                Ok(65821 + ((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize))
            }
        }
    }

    fn read_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128, DecodeError> {
        if size > max {
            return Err(self.error(*cursor, "Integer too wide"));
        }
        let bytes = self.take(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn take_exact<const N: usize>(
        &self,
        cursor: &mut usize,
        size: usize,
    ) -> Result<[u8; N], DecodeError> {
        if size != N {
            return Err(self.error(*cursor, "Invalid fixed-width size"));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(cursor, N)?);
        Ok(out)
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = cursor
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| self.error(*cursor, "Data out of bounds"))?;
        let bytes = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }

    fn byte(&self, cursor: &mut usize) -> Result<u8, DecodeError> {
        Ok(self.take(cursor, 1)?[0])
    }

    fn peek(&self, offset: usize) -> Result<u8, DecodeError> {
        self.buffer
            .get(offset)
            .copied()
            .ok_or_else(|| self.error(offset, "Pointer out of bounds"))
    }

    fn error(&self, offset: usize, reason: &'static str) -> DecodeError {
        DecodeError { offset, reason }
    }
}
