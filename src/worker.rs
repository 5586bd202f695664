//! Worker Runtime (spec.md §4.4): per-worker state machine that adopts the
//! shared snapshot, issues a binary COPY for its current page range, drives
//! the Wire Codec, and emits columnar output chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use postgres::{Client, NoTls};
use tracing::{debug, trace};

use crate::bind::ScanMeta;
use crate::coordinator::{PageRangeTask, ScanCoordinator};
use crate::error::{BridgeError, BridgeResult};
use crate::value::{Chunk, Value};
use crate::wire::{decode_field, WireDecoder};

/// One projected output column: either a real column by index into
/// `ScanMeta::columns`, or the synthesized row id (`ctid`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectedColumn {
    Column(usize),
    RowId,
}

/// Per-worker state. One instance per OS thread; owns its connection
/// exclusively and is never shared across threads (spec.md §5).
pub struct WorkerState {
    client: Client,
    projected_columns: Vec<ProjectedColumn>,
    predicate_sql: String,
    exhausted: bool,
}

impl WorkerState {
    /// Opens a fresh connection, begins `REPEATABLE READ READ ONLY`, and
    /// adopts the scan's shared snapshot unless the scan is in recovery
    /// (spec.md §4.4).
    pub fn new(
        meta: &ScanMeta,
        connect_timeout: Duration,
        projected_columns: Vec<ProjectedColumn>,
        predicate_sql: String,
    ) -> BridgeResult<Self> {
        let mut pg_config: postgres::Config = meta.dsn.parse().map_err(BridgeError::ConnectionError)?;
        pg_config.connect_timeout(connect_timeout);
        let mut client = pg_config.connect(NoTls)?;

        client.simple_query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")?;
        if let Some(snapshot_id) = &meta.snapshot_id {
            let set_snapshot = format!("SET TRANSACTION SNAPSHOT '{}'", escape_literal(snapshot_id));
            client.simple_query(&set_snapshot)?;
        } else {
            debug!("no shared snapshot to adopt; scanning best-effort");
        }

        Ok(WorkerState {
            client,
            projected_columns,
            predicate_sql,
            exhausted: false,
        })
    }

    /// Drives this worker to completion: repeatedly acquires a task from
    /// `coordinator`, streams and decodes its COPY output, and calls `emit`
    /// with each full (or final, partial) chunk. Checks `cancel` between
    /// tasks and between tuples.
    pub fn run(
        &mut self,
        meta: &ScanMeta,
        coordinator: &ScanCoordinator,
        cancel: &AtomicBool,
        chunk_capacity: usize,
        mut emit: impl FnMut(Chunk),
    ) -> BridgeResult<()> {
        let mut chunk = Chunk::with_shape(self.projected_columns.len(), chunk_capacity);

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(BridgeError::Canceled);
            }

            let task = match coordinator.next_task() {
                Some(task) => task,
                None => {
                    self.exhausted = true;
                    break;
                }
            };

            self.run_task(meta, task, cancel, chunk_capacity, &mut chunk, &mut emit)?;
        }

        if !chunk.is_empty() {
            emit(chunk);
        }
        Ok(())
    }

    fn run_task(
        &mut self,
        meta: &ScanMeta,
        task: PageRangeTask,
        cancel: &AtomicBool,
        chunk_capacity: usize,
        chunk: &mut Chunk,
        emit: &mut impl FnMut(Chunk),
    ) -> BridgeResult<()> {
        let query = build_copy_query(meta, &self.projected_columns, &self.predicate_sql, task);
        trace!(query, "starting COPY for task");
        let reader = self.client.copy_out(&query)?;
        let mut decoder = WireDecoder::new(reader);

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(BridgeError::Canceled);
            }

            let tuple = match decoder.next_tuple()? {
                Some(tuple) => tuple,
                None => break,
            };

            if tuple.len() != self.projected_columns.len() {
                return Err(BridgeError::protocol(format!(
                    "expected {} fields, got {}",
                    self.projected_columns.len(),
                    tuple.len()
                )));
            }

            for (idx, (projected, field)) in self.projected_columns.iter().zip(tuple.iter()).enumerate() {
                match field {
                    None => chunk.columns[idx].push_null(),
                    Some(bytes) => {
                        let value = self.decode_one(meta, *projected, bytes)?;
                        chunk.columns[idx].push(value);
                    }
                }
            }

            if chunk.num_rows() >= chunk_capacity {
                let full = std::mem::replace(chunk, Chunk::with_shape(self.projected_columns.len(), chunk_capacity));
                emit(full);
            }
        }
        Ok(())
    }

    /// `true` once this worker has drained the coordinator and returned from
    /// `run`. Exposed for callers that want to report per-worker progress.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn decode_one(
        &self,
        meta: &ScanMeta,
        projected: ProjectedColumn,
        bytes: &[u8],
    ) -> BridgeResult<Value> {
        match projected {
            ProjectedColumn::RowId => decode_rowid(bytes).map(Value::I64),
            ProjectedColumn::Column(idx) => {
                let column = &meta.columns[idx];
                decode_field(bytes, &column.target_type, &column.name)
            }
        }
    }
}

/// Decodes a 6-byte `ctid` (`page: u32 BE`, `tuple: u16 BE`) into a signed
/// row id as `(page << 16) | tuple` (spec.md §4.4.1).
fn decode_rowid(bytes: &[u8]) -> BridgeResult<i64> {
    if bytes.len() != 6 {
        return Err(BridgeError::protocol(format!("expected 6-byte ctid, got {} bytes", bytes.len())));
    }
    let page = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let tuple = u16::from_be_bytes(bytes[4..6].try_into().unwrap());
    Ok(((page as i64) << 16) | tuple as i64)
}

fn build_copy_query(
    meta: &ScanMeta,
    projected_columns: &[ProjectedColumn],
    predicate_sql: &str,
    task: PageRangeTask,
) -> String {
    let projection = projected_columns
        .iter()
        .map(|p| match p {
            ProjectedColumn::RowId => "ctid".to_owned(),
            ProjectedColumn::Column(idx) => {
                let column = &meta.columns[*idx];
                let ident = quote_ident(&column.name);
                if column.needs_text_cast {
                    format!("{ident}::VARCHAR")
                } else {
                    ident
                }
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "COPY (SELECT {projection} FROM {}.{} \
         WHERE ctid BETWEEN '({},0)'::tid AND '({},0)'::tid{predicate_sql}) \
         TO STDOUT (FORMAT binary)",
        quote_ident(&meta.schema),
        quote_ident(&meta.table),
        task.lo,
        task.hi,
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}
