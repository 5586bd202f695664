//! Bind / Introspector (spec.md §4.1): given `(dsn, schema, table)`, produces
//! a stable [`ScanDescriptor`] — column list, target types, estimated page
//! count, exported snapshot id, recovery flag.

use postgres::{Client, NoTls};
use tracing::{debug, trace};

use crate::config::ScanConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::type_mapper::{self, RemoteColumnType};
use crate::types::{ColumnDescriptor, RemoteTypeKind};

/// Everything a scan needs, produced once and shared read-only by every
/// worker. Owns the snapshot-exporting connection for its lifetime: per
/// Postgres's `pg_export_snapshot()` semantics the exported snapshot is only
/// valid while that transaction stays open, so we never commit or drop the
/// client until the descriptor itself is dropped.
pub struct ScanDescriptor {
    pub dsn: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub approx_page_count: u64,
    pub snapshot_id: Option<String>,
    pub in_recovery: bool,
    pub pages_per_task: u64,
    /// Keeps the exporting transaction open for the descriptor's lifetime;
    /// never read, only held for its `Drop` side effect (closing the
    /// connection releases the snapshot once the scan ends).
    #[allow(dead_code)]
    snapshot_holder: Option<Client>,
}

impl ScanDescriptor {
    pub fn max_workers(&self) -> usize {
        (self.approx_page_count / self.pages_per_task).max(1) as usize
    }

    /// Clones the plain-data fields workers need into a [`ScanMeta`] that can
    /// be shared across threads. `snapshot_holder`'s connection stays on the
    /// descriptor itself, which the caller must keep alive for the scan's
    /// duration; workers open their own connections and only adopt its
    /// exported snapshot id.
    pub fn to_meta(&self) -> ScanMeta {
        ScanMeta {
            dsn: self.dsn.clone(),
            schema: self.schema.clone(),
            table: self.table.clone(),
            columns: self.columns.clone(),
            snapshot_id: self.snapshot_id.clone(),
        }
    }
}

/// The subset of [`ScanDescriptor`] that is plain data (`Send + Sync`) and
/// safe to share across worker threads: no live connection.
#[derive(Clone, Debug)]
pub struct ScanMeta {
    pub dsn: String,
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub snapshot_id: Option<String>,
}

struct RawColumn {
    name: String,
    namespace: String,
    type_name: String,
    type_oid: u32,
    typtype: i8,
    type_length: i16,
    type_modifier: i32,
    typelem: u32,
}

/// Opens a connection, begins `REPEATABLE READ READ ONLY`, and resolves the
/// scan descriptor for `schema.table`.
pub fn bind(dsn: &str, schema: &str, table: &str, config: &ScanConfig) -> BridgeResult<ScanDescriptor> {
    let mut pg_config: postgres::Config = dsn.parse().map_err(BridgeError::ConnectionError)?;
    pg_config.connect_timeout(config.connect_timeout);
    let mut client = pg_config.connect(NoTls)?;

    client.simple_query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")?;

    let in_recovery: bool = client.query_one("SELECT pg_is_in_recovery()", &[])?.get(0);

    let snapshot_id: Option<String> = if in_recovery {
        debug!(schema, table, "server is in recovery; scanning without a shared snapshot");
        None
    } else {
        Some(client.query_one("SELECT pg_export_snapshot()", &[])?.get(0))
    };

    let relation_row = client
        .query_opt(
            "SELECT c.oid, c.relpages \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p', 'm', 'v', 'f')",
            &[&schema, &table],
        )?
        .ok_or_else(|| BridgeError::TableNotFound {
            schema: schema.to_owned(),
            table: table.to_owned(),
        })?;
    let relation_oid: u32 = relation_row.get(0);
    let relpages: i32 = relation_row.get(1);

    let approx_page_count = if relpages > 0 {
        relpages as u64
    } else {
        // A freshly loaded table that hasn't been ANALYZEd yet reports
        // relpages == 0; fall back to the on-disk size so approx_page_count
        // still stays >= 1 without understating the real page count.
        let row = client.query_one(
            "SELECT GREATEST(1, pg_relation_size($1) / NULLIF(current_setting('block_size')::bigint, 0))",
            &[&relation_oid],
        )?;
        let pages: i64 = row.get(0);
        pages.max(1) as u64
    };

    let raw_columns: Vec<RawColumn> = client
        .query(
            "SELECT a.attname, tn.nspname, t.typname, t.oid, t.typtype, t.typlen, a.atttypmod, t.typelem \
             FROM pg_attribute a \
             JOIN pg_type t ON t.oid = a.atttypid \
             JOIN pg_namespace tn ON tn.oid = t.typnamespace \
             WHERE a.attrelid = $1 AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            &[&relation_oid],
        )?
        .into_iter()
        .map(|row| RawColumn {
            name: row.get(0),
            namespace: row.get(1),
            type_name: row.get(2),
            type_oid: row.get::<_, u32>(3),
            typtype: row.get::<_, i8>(4),
            type_length: row.get::<_, i16>(5),
            type_modifier: row.get(6),
            typelem: row.get::<_, u32>(7),
        })
        .collect();

    if raw_columns.is_empty() {
        return Err(BridgeError::EmptyRelation {
            schema: schema.to_owned(),
            table: table.to_owned(),
        });
    }

    let mut columns = Vec::with_capacity(raw_columns.len());
    for raw in &raw_columns {
        columns.push(resolve_column(&mut client, raw)?);
    }

    trace!(schema, table, columns = columns.len(), approx_page_count, "bind resolved scan descriptor");

    Ok(ScanDescriptor {
        dsn: dsn.to_owned(),
        schema: schema.to_owned(),
        table: table.to_owned(),
        columns,
        approx_page_count,
        snapshot_id,
        in_recovery,
        pages_per_task: config.pages_per_task,
        snapshot_holder: Some(client),
    })
}

fn resolve_column(client: &mut Client, raw: &RawColumn) -> BridgeResult<ColumnDescriptor> {
    let is_array = raw.type_name.starts_with('_') && raw.typelem != 0;
    let is_enum = raw.typtype == b'e' as i8;

    let (element, element_type_name, element_type_kind) = if is_array {
        let elem_row = client.query_opt(
            "SELECT t.typname, t.typtype FROM pg_type t WHERE t.oid = $1",
            &[&raw.typelem],
        )?;
        match elem_row {
            Some(row) => {
                let elem_name: String = row.get(0);
                let elem_typtype: i8 = row.get(1);
                let elem_kind = if elem_typtype == b'e' as i8 {
                    RemoteTypeKind::Enum
                } else {
                    RemoteTypeKind::Base
                };
                let elem_enum_labels = if elem_kind == RemoteTypeKind::Enum {
                    Some(enum_labels(client, raw.typelem)?)
                } else {
                    None
                };
                let elem_remote = RemoteColumnType {
                    base_name: &elem_name,
                    kind: elem_kind,
                    type_modifier: raw.type_modifier,
                    enum_labels: elem_enum_labels,
                    element: None,
                };
                (Some(Box::new(elem_remote)), Some(elem_name), Some(elem_kind))
            }
            None => (None, None, None),
        }
    } else {
        (None, None, None)
    };

    let kind = if is_array {
        RemoteTypeKind::Array
    } else if is_enum {
        RemoteTypeKind::Enum
    } else {
        RemoteTypeKind::Base
    };

    let enum_labels_for_column = if is_enum {
        Some(enum_labels(client, raw.type_oid)?)
    } else {
        None
    };

    let remote = RemoteColumnType {
        base_name: &raw.type_name,
        kind,
        type_modifier: raw.type_modifier,
        enum_labels: enum_labels_for_column,
        element,
    };
    let (target_type, needs_text_cast) = type_mapper::map_column(&remote);

    Ok(ColumnDescriptor {
        name: raw.name.clone(),
        remote_type_namespace: raw.namespace.clone(),
        remote_type_name: raw.type_name.clone(),
        remote_type_kind: kind,
        type_length: raw.type_length,
        type_modifier: raw.type_modifier,
        element_type_name,
        element_type_kind,
        target_type,
        needs_text_cast,
    })
}

fn enum_labels(client: &mut Client, type_oid: u32) -> BridgeResult<Vec<String>> {
    let rows = client.query(
        "SELECT enumlabel FROM pg_enum WHERE enumtypid = $1 ORDER BY enumsortorder",
        &[&type_oid],
    )?;
    Ok(rows.into_iter().map(|r| r.get(0)).collect())
}
