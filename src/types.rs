//! Data model shared by the Bind/Introspector, Type Mapper and Wire Codec:
//! [`ColumnDescriptor`] and the target type system ([`TargetType`]).

/// How the remote catalog classifies a column's type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteTypeKind {
    Base,
    Enum,
    Array,
    Other,
}

/// The analytic engine's type system that remote columns are mapped into.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetType {
    Bool,
    I16,
    I32,
    I64,
    U32,
    F32,
    F64,
    /// `DECIMAL(width, scale)`, decoded from a non-default `numeric` typmod.
    Decimal { width: u16, scale: i16 },
    Text,
    Date,
    Blob,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Enum { labels: Vec<String> },
    List(Box<TargetType>),
}

impl TargetType {
    /// `true` iff this is the fallback text representation used for columns
    /// whose remote type has no direct mapping.
    pub fn is_text(&self) -> bool {
        matches!(self, TargetType::Text)
    }
}

/// Immutable, per-column metadata produced once by Bind and shared read-only
/// by every worker for the lifetime of the scan.
#[derive(Clone, Debug)]
pub struct ColumnDescriptor {
    pub name: String,
    pub remote_type_namespace: String,
    pub remote_type_name: String,
    pub remote_type_kind: RemoteTypeKind,
    pub type_length: i16,
    pub type_modifier: i32,
    pub element_type_name: Option<String>,
    pub element_type_kind: Option<RemoteTypeKind>,
    pub target_type: TargetType,
    /// `true` iff `target_type == TargetType::Text`; the worker appends
    /// `::VARCHAR` to this column's projection expression so the server
    /// performs the cast (see invariant in spec.md §3).
    pub needs_text_cast: bool,
}

impl ColumnDescriptor {
    /// The element descriptor used to recursively decode one array element.
    /// Only meaningful when `target_type` is `TargetType::List(_)`.
    pub fn element_target_type(&self) -> Option<&TargetType> {
        match &self.target_type {
            TargetType::List(elem) => Some(elem.as_ref()),
            _ => None,
        }
    }
}
