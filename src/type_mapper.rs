//! Type Mapper (spec.md §4.2): turns remote column metadata into
//! [`TargetType`]s, resolving enum labels and deciding fallback-to-text for
//! anything unmapped.

use crate::decimal::decode_typmod;
use crate::types::{RemoteTypeKind, TargetType};

/// Metadata about a remote column's type, as read off the catalog by Bind.
/// Distinct from [`crate::types::ColumnDescriptor`], which additionally
/// carries the resolved [`TargetType`].
pub struct RemoteColumnType<'a> {
    pub base_name: &'a str,
    pub kind: RemoteTypeKind,
    pub type_modifier: i32,
    pub enum_labels: Option<Vec<String>>,
    pub element: Option<Box<RemoteColumnType<'a>>>,
}

/// Maps one remote column type to `(target_type, needs_text_cast)`.
///
/// `needs_text_cast` is always `true` exactly when the resolved target is
/// `TargetType::Text`, whether that's because the remote type *is* textual
/// (`text`, `varchar`, `json`, ...) or because it has no mapping at all and
/// degrades to the server's textual cast (invariant in spec.md §3).
pub fn map_column(remote: &RemoteColumnType<'_>) -> (TargetType, bool) {
    if remote.base_name.starts_with('_') {
        if let Some(elem) = &remote.element {
            let (elem_type, _) = map_column(elem);
            return (TargetType::List(Box::new(elem_type)), false);
        }
        return (TargetType::Text, true);
    }

    if remote.kind == RemoteTypeKind::Enum {
        let labels = remote.enum_labels.clone().unwrap_or_default();
        return (TargetType::Enum { labels }, false);
    }

    match remote.base_name {
        "bool" => (TargetType::Bool, false),
        "int2" => (TargetType::I16, false),
        "int4" => (TargetType::I32, false),
        "int8" => (TargetType::I64, false),
        "oid" => (TargetType::U32, false),
        "float4" => (TargetType::F32, false),
        "float8" => (TargetType::F64, false),
        "numeric" => {
            if remote.type_modifier == -1 {
                (TargetType::F64, false)
            } else {
                let (width, scale) = decode_typmod(remote.type_modifier);
                (TargetType::Decimal { width, scale }, false)
            }
        }
        "char" | "bpchar" | "varchar" | "text" | "json" | "jsonb" => (TargetType::Text, true),
        "date" => (TargetType::Date, false),
        "bytea" => (TargetType::Blob, false),
        "time" => (TargetType::Time, false),
        "timetz" => (TargetType::TimeTz, false),
        "timestamp" => (TargetType::Timestamp, false),
        "timestamptz" => (TargetType::TimestampTz, false),
        "interval" => (TargetType::Interval, false),
        "uuid" => (TargetType::Uuid, false),
        _ => (TargetType::Text, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(name: &str, typmod: i32) -> RemoteColumnType<'_> {
        RemoteColumnType {
            base_name: name,
            kind: RemoteTypeKind::Base,
            type_modifier: typmod,
            enum_labels: None,
            element: None,
        }
    }

    #[test]
    fn numeric_default_typmod_maps_to_f64() {
        let (target, cast) = map_column(&base("numeric", -1));
        assert_eq!(target, TargetType::F64);
        assert!(!cast);
    }

    #[test]
    fn numeric_with_precision_maps_to_decimal() {
        let typmod = ((10i32) << 16 | 2) + 4;
        let (target, cast) = map_column(&base("numeric", typmod));
        assert_eq!(target, TargetType::Decimal { width: 10, scale: 2 });
        assert!(!cast);
    }

    #[test]
    fn text_like_types_need_cast() {
        for name in ["char", "bpchar", "varchar", "text", "json", "jsonb"] {
            let (target, cast) = map_column(&base(name, -1));
            assert_eq!(target, TargetType::Text);
            assert!(cast, "{name} should need a text cast");
        }
    }

    #[test]
    fn unknown_type_falls_back_to_text() {
        let (target, cast) = map_column(&base("box", -1));
        assert_eq!(target, TargetType::Text);
        assert!(cast);
    }

    #[test]
    fn array_of_int4_maps_to_list() {
        let elem = base("int4", -1);
        let remote = RemoteColumnType {
            base_name: "_int4",
            kind: RemoteTypeKind::Array,
            type_modifier: -1,
            enum_labels: None,
            element: Some(Box::new(elem)),
        };
        let (target, cast) = map_column(&remote);
        assert_eq!(target, TargetType::List(Box::new(TargetType::I32)));
        assert!(!cast);
    }

    #[test]
    fn enum_maps_to_labels() {
        let remote = RemoteColumnType {
            base_name: "color",
            kind: RemoteTypeKind::Enum,
            type_modifier: -1,
            enum_labels: Some(vec!["red".into(), "green".into(), "blue".into()]),
            element: None,
        };
        let (target, cast) = map_column(&remote);
        assert_eq!(
            target,
            TargetType::Enum {
                labels: vec!["red".into(), "green".into(), "blue".into()]
            }
        );
        assert!(!cast);
    }
}
