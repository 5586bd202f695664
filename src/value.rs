//! The columnar output boundary. The target engine's real vector/chunk
//! allocator is an external collaborator (spec.md §1 Non-goals); this module
//! is the minimal in-crate stand-in a caller adapts into that allocator.

use bigdecimal::BigDecimal;
use bit_vec::BitVec;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// A single decoded value. `List` elements may themselves be `Null`,
/// preserving null entries inside one-dimensional arrays (spec.md §8,
/// property 3).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    U32(u32),
    F32(f32),
    F64(f64),
    Decimal(BigDecimal),
    Text(String),
    Blob(Vec<u8>),
    /// Days since the Postgres epoch (2000-01-01), already normalized to a
    /// calendar date.
    Date(NaiveDate),
    /// Microseconds since midnight.
    Time(i64),
    /// Microseconds since midnight, already folded with the timezone offset
    /// per spec.md §4.5 (`usec + tz_offset * 1_000_000`).
    TimeTz(i64),
    Timestamp(DateTime<Utc>),
    TimestampTz(DateTime<Utc>),
    /// `(months, days, microseconds)`, the three independent interval
    /// components as stored on the wire.
    Interval(i32, i32, i64),
    Uuid(Uuid),
    /// Ordinal index into the column's `TargetType::Enum::labels`.
    Enum(u32),
    List(Vec<Value>),
}

/// One output column of a chunk: a dense value array plus a validity mask
/// (`true` = non-null), mirroring how `bit-vec`-backed null masks are used
/// elsewhere in this dependency family.
#[derive(Clone, Debug, Default)]
pub struct Column {
    pub values: Vec<Value>,
    pub validity: BitVec,
}

impl Column {
    pub fn with_capacity(capacity: usize) -> Self {
        Column {
            values: Vec::with_capacity(capacity),
            validity: BitVec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.validity.push(true);
        self.values.push(value);
    }

    pub fn push_null(&mut self) {
        self.validity.push(false);
        self.values.push(Value::Null);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A columnar chunk of decoded rows: one [`Column`] per projected column,
/// all the same length. Published by the Worker Runtime once it fills up to
/// `ScanConfig::chunk_capacity` or the task drains (spec.md §4.4).
#[derive(Clone, Debug, Default)]
pub struct Chunk {
    pub columns: Vec<Column>,
}

impl Chunk {
    pub fn with_shape(num_columns: usize, capacity: usize) -> Self {
        Chunk {
            columns: (0..num_columns).map(|_| Column::with_capacity(capacity)).collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }
}
