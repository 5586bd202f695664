//! A parallel, snapshot-consistent, columnar scan bridge for a remote
//! PostgreSQL relation.
//!
//! [`bind::bind`] resolves a `(dsn, schema, table)` triple into a
//! [`ScanDescriptor`]; [`scan`] (or [`scan_with_request`] for projection and
//! predicate pushdown) spawns one OS thread per partition of the table's
//! physical page space and streams back decoded [`Chunk`]s over an
//! `mpsc` channel. [`attach::plan_attach`] enumerates a remote schema's
//! tables for registration as scan-backed views in the target catalog.

pub mod attach;
pub mod bind;
pub mod config;
pub mod coordinator;
pub mod decimal;
pub mod error;
pub mod predicate;
pub mod type_mapper;
pub mod types;
pub mod value;
pub mod wire;
pub mod worker;

pub use attach::{plan_attach, ViewPlan};
pub use bind::{bind, ScanDescriptor, ScanMeta};
pub use config::ScanConfig;
pub use coordinator::{PageRangeTask, ScanCoordinator};
pub use error::{BridgeError, BridgeResult};
pub use predicate::{CompareOp, Literal, Predicate};
pub use types::{ColumnDescriptor, RemoteTypeKind, TargetType};
pub use value::{Chunk, Column, Value};
pub use worker::{ProjectedColumn, WorkerState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use tracing::warn;

/// Everything needed to start a scan beyond the bare `(dsn, schema, table)`
/// triple: which columns to project, whether to include the synthesized row
/// id, predicates to push down, and the ambient [`ScanConfig`].
pub struct ScanRequest {
    pub dsn: String,
    pub schema: String,
    pub table: String,
    /// `None` projects every column, in catalog order. `Some` projects only
    /// the named columns, in the given order.
    pub columns: Option<Vec<String>>,
    /// Prepends the synthesized `(page << 16) | tuple` row id to every
    /// output chunk's columns.
    pub include_rowid: bool,
    pub predicates: Vec<Predicate>,
    pub config: ScanConfig,
}

impl ScanRequest {
    pub fn new(dsn: impl Into<String>, schema: impl Into<String>, table: impl Into<String>) -> Self {
        ScanRequest {
            dsn: dsn.into(),
            schema: schema.into(),
            table: table.into(),
            columns: None,
            include_rowid: false,
            predicates: Vec::new(),
            config: ScanConfig::default(),
        }
    }
}

/// A running scan: an iterator of decoded [`Chunk`]s plus a handle to cancel
/// it early. Dropping the handle cancels the scan and blocks until every
/// worker thread has exited, releasing the exported snapshot.
pub struct ScanHandle {
    receiver: mpsc::Receiver<BridgeResult<Chunk>>,
    cancel: Arc<AtomicBool>,
    descriptor: ScanDescriptor,
    workers: Vec<JoinHandle<()>>,
}

impl ScanHandle {
    /// Requests cooperative cancellation. Workers notice between tuples and
    /// between tasks; already-queued chunks are still delivered.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.descriptor.columns
    }
}

impl Iterator for ScanHandle {
    type Item = BridgeResult<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok()
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Scans every column of `schema.table`, with default [`ScanConfig`] and no
/// predicate pushdown.
pub fn scan(dsn: &str, schema: &str, table: &str) -> BridgeResult<ScanHandle> {
    scan_with_request(ScanRequest::new(dsn, schema, table))
}

/// Binds `request`'s table, partitions its physical page space across
/// `worker_count` OS threads (`ScanConfig::worker_count`, or
/// `ScanDescriptor::max_workers()` by default), and streams back decoded
/// chunks over the returned [`ScanHandle`].
pub fn scan_with_request(request: ScanRequest) -> BridgeResult<ScanHandle> {
    let descriptor = bind::bind(&request.dsn, &request.schema, &request.table, &request.config)?;

    let projected_columns = resolve_projection(&descriptor, &request)?;
    let predicate_sql = predicate::project(&request.predicates);
    let meta = Arc::new(descriptor.to_meta());

    let worker_count = request
        .config
        .worker_count
        .unwrap_or_else(|| descriptor.max_workers());
    let coordinator = Arc::new(ScanCoordinator::new(
        descriptor.approx_page_count,
        request.config.pages_per_task,
    ));
    let cancel = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = mpsc::channel();

    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let meta = Arc::clone(&meta);
        let coordinator = Arc::clone(&coordinator);
        let cancel = Arc::clone(&cancel);
        let sender = sender.clone();
        let projected_columns = projected_columns.clone();
        let predicate_sql = predicate_sql.clone();
        let connect_timeout = request.config.connect_timeout;
        let chunk_capacity = request.config.chunk_capacity;

        workers.push(thread::spawn(move || {
            let outcome = worker::WorkerState::new(&meta, connect_timeout, projected_columns, predicate_sql)
                .and_then(|mut worker| {
                    worker.run(&meta, &coordinator, &cancel, chunk_capacity, |chunk| {
                        let _ = sender.send(Ok(chunk));
                    })
                });
            if let Err(err) = outcome {
                if matches!(err, BridgeError::Canceled) {
                    return;
                }
                warn!(%err, "worker exited with an error");
                let _ = sender.send(Err(err));
            }
        }));
    }
    drop(sender);

    Ok(ScanHandle {
        receiver,
        cancel,
        descriptor,
        workers,
    })
}

fn resolve_projection(descriptor: &ScanDescriptor, request: &ScanRequest) -> BridgeResult<Vec<ProjectedColumn>> {
    let mut projected = Vec::new();
    if request.include_rowid {
        projected.push(ProjectedColumn::RowId);
    }

    match &request.columns {
        None => projected.extend((0..descriptor.columns.len()).map(ProjectedColumn::Column)),
        Some(names) => {
            for name in names {
                let idx = descriptor
                    .columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| BridgeError::protocol(format!("unknown projected column {name}")))?;
                projected.push(ProjectedColumn::Column(idx));
            }
        }
    }

    Ok(projected)
}
