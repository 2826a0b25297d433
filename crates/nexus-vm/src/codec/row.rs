//! Row encoding and decoding.
//!
//! Rows move through the engine as [`Slice`]s: immutable, cheaply cloned
//! byte buffers. An empty slice means "no row".
//!
//! # Encoding Format
//!
//! - Header (6 bytes): version (1), reserved (1), total size (4, little-endian)
//! - Null bitmap: one bit per column, `ceil(columns / 8)` bytes
//! - Fixed region: one slot per column in schema order, sized by
//!   [`DataType::fixed_width`]. Varchar slots hold the string's offset and
//!   length (4 + 4 bytes, little-endian).
//! - Variable region: string bytes

use std::fmt;

use bytes::Bytes;
use nexus_common::constants::{MAX_ROW_SIZE, ROW_FORMAT_VERSION, ROW_HEADER_SIZE};

use super::value::Value;
use crate::error::{VmError, VmResult};
use crate::schema::{DataType, Schema};

/// An encoded row.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Slice(Bytes);

impl Slice {
    /// The empty slice, used for absent rows.
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    /// Wraps encoded bytes.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns true if this slice holds no row.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the encoded size in bytes.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "Slice(empty)")
        } else {
            write!(f, "Slice({} bytes)", self.size())
        }
    }
}

impl From<Vec<u8>> for Slice {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

/// Precomputed layout of one schema.
#[derive(Debug, Clone)]
struct Layout {
    types: Vec<DataType>,
    offsets: Vec<usize>,
    bitmap_len: usize,
    fixed_end: usize,
}

impl Layout {
    fn new(schema: &Schema) -> Self {
        let types: Vec<DataType> = schema.data_types().collect();
        let bitmap_len = types.len().div_ceil(8);
        let mut offsets = Vec::with_capacity(types.len());
        let mut cursor = ROW_HEADER_SIZE + bitmap_len;
        for ty in &types {
            offsets.push(cursor);
            cursor += ty.fixed_width();
        }
        Self {
            types,
            offsets,
            bitmap_len,
            fixed_end: cursor,
        }
    }
}

/// Encodes values into rows of one schema.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    layout: Layout,
}

impl RowBuilder {
    /// Creates a builder for `schema`.
    pub fn new(schema: &Schema) -> Self {
        Self {
            layout: Layout::new(schema),
        }
    }

    /// Encodes one row.
    ///
    /// Values are coerced to their column types; a value that cannot be
    /// represented in its column is a type mismatch.
    pub fn encode(&self, values: &[Value]) -> VmResult<Slice> {
        let layout = &self.layout;
        if values.len() != layout.types.len() {
            return Err(VmError::SchemaMismatch(format!(
                "row has {} values, schema has {} columns",
                values.len(),
                layout.types.len()
            )));
        }

        let var_len: usize = values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.len(),
                _ => 0,
            })
            .sum();
        let total = layout.fixed_end + var_len;
        if total > MAX_ROW_SIZE {
            return Err(VmError::codec(format!(
                "row size {total} exceeds maximum {MAX_ROW_SIZE}"
            )));
        }

        let mut buf = vec![0u8; layout.fixed_end];
        buf.reserve(var_len);
        buf[0] = ROW_FORMAT_VERSION;
        buf[2..6].copy_from_slice(&size_u32(total)?.to_le_bytes());

        for (pos, (value, &ty)) in values.iter().zip(&layout.types).enumerate() {
            let off = layout.offsets[pos];
            let value = value.coerce_to(ty)?;
            match value {
                Value::Null => buf[ROW_HEADER_SIZE + pos / 8] |= 1 << (pos % 8),
                Value::Bool(b) => buf[off] = u8::from(b),
                Value::Int16(v) => buf[off..off + 2].copy_from_slice(&v.to_le_bytes()),
                Value::Int32(v) | Value::Date(v) => {
                    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
                }
                Value::Int64(v) | Value::Timestamp(v) => {
                    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
                }
                Value::Float(v) => buf[off..off + 4].copy_from_slice(&v.to_le_bytes()),
                Value::Double(v) => buf[off..off + 8].copy_from_slice(&v.to_le_bytes()),
                Value::String(s) => {
                    let start = size_u32(buf.len())?;
                    let len = size_u32(s.len())?;
                    buf[off..off + 4].copy_from_slice(&start.to_le_bytes());
                    buf[off + 4..off + 8].copy_from_slice(&len.to_le_bytes());
                    buf.extend_from_slice(s.as_bytes());
                }
            }
        }

        Ok(Slice::from(buf))
    }
}

fn size_u32(n: usize) -> VmResult<u32> {
    u32::try_from(n).map_err(|_| VmError::codec(format!("size {n} does not fit the row format")))
}

/// Decodes rows of one schema.
#[derive(Debug, Clone)]
pub struct RowView {
    layout: Layout,
}

impl RowView {
    /// Creates a view for `schema`.
    pub fn new(schema: &Schema) -> Self {
        Self {
            layout: Layout::new(schema),
        }
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.layout.types.len()
    }

    fn check(&self, row: &Slice) -> VmResult<()> {
        let bytes = row.as_bytes();
        if bytes.len() < self.layout.fixed_end {
            return Err(VmError::codec(format!(
                "row of {} bytes is shorter than its fixed region ({} bytes)",
                bytes.len(),
                self.layout.fixed_end
            )));
        }
        if bytes[0] != ROW_FORMAT_VERSION {
            return Err(VmError::codec(format!("unknown row version {}", bytes[0])));
        }
        let total = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        if total != bytes.len() {
            return Err(VmError::codec(format!(
                "row header declares {total} bytes, buffer has {}",
                bytes.len()
            )));
        }
        Ok(())
    }

    /// Returns true if column `pos` is NULL.
    pub fn is_null(&self, row: &Slice, pos: usize) -> VmResult<bool> {
        self.check(row)?;
        self.null_bit(row, pos)
    }

    fn null_bit(&self, row: &Slice, pos: usize) -> VmResult<bool> {
        if pos >= self.layout.types.len() {
            return Err(VmError::ColumnNotFound(format!("#{pos}")));
        }
        debug_assert!(pos / 8 < self.layout.bitmap_len);
        Ok(row.as_bytes()[ROW_HEADER_SIZE + pos / 8] & (1 << (pos % 8)) != 0)
    }

    /// Decodes column `pos`.
    pub fn value(&self, row: &Slice, pos: usize) -> VmResult<Value> {
        self.check(row)?;
        self.read(row, pos)
    }

    fn read(&self, row: &Slice, pos: usize) -> VmResult<Value> {
        if self.null_bit(row, pos)? {
            return Ok(Value::Null);
        }
        let bytes = row.as_bytes();
        let off = self.layout.offsets[pos];
        let value = match self.layout.types[pos] {
            DataType::Bool => Value::Bool(bytes[off] != 0),
            DataType::Int16 => Value::Int16(i16::from_le_bytes(array(bytes, off)?)),
            DataType::Int32 => Value::Int32(i32::from_le_bytes(array(bytes, off)?)),
            DataType::Date => Value::Date(i32::from_le_bytes(array(bytes, off)?)),
            DataType::Int64 => Value::Int64(i64::from_le_bytes(array(bytes, off)?)),
            DataType::Timestamp => Value::Timestamp(i64::from_le_bytes(array(bytes, off)?)),
            DataType::Float => Value::Float(f32::from_le_bytes(array(bytes, off)?)),
            DataType::Double => Value::Double(f64::from_le_bytes(array(bytes, off)?)),
            DataType::Varchar => {
                let start = u32::from_le_bytes(array(bytes, off)?) as usize;
                let len = u32::from_le_bytes(array(bytes, off + 4)?) as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&end| start >= self.layout.fixed_end && end <= bytes.len())
                    .ok_or_else(|| VmError::codec(format!("string of column {pos} out of bounds")))?;
                let s = std::str::from_utf8(&bytes[start..end])
                    .map_err(|e| VmError::codec(format!("column {pos}: {e}")))?;
                Value::String(s.to_string())
            }
        };
        Ok(value)
    }

    /// Decodes every column.
    pub fn values(&self, row: &Slice) -> VmResult<Vec<Value>> {
        self.check(row)?;
        (0..self.layout.types.len())
            .map(|pos| self.read(row, pos))
            .collect()
    }

    /// Decodes the columns at `positions`.
    pub fn project(&self, row: &Slice, positions: &[usize]) -> VmResult<Vec<Value>> {
        self.check(row)?;
        positions.iter().map(|&pos| self.read(row, pos)).collect()
    }
}

fn array<const N: usize>(bytes: &[u8], off: usize) -> VmResult<[u8; N]> {
    bytes
        .get(off..off + N)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| VmError::codec(format!("fixed slot at {off} out of bounds")))
}
