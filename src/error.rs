//! Error kinds surfaced by the bridge, named per the component design rather
//! than by Rust type identifier so callers can match on them stably.

use thiserror::Error;

/// Top-level error type for every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Transport failure talking to the remote server. Fatal to the owning
    /// worker; fatal to the whole scan if it happens during Bind.
    #[error("connection error: {0}")]
    ConnectionError(#[from] postgres::Error),

    /// Bad COPY header, truncated message, or malformed tuple framing.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Bind-time: no relation matched `schema.table`.
    #[error("table not found: {schema}.{table}")]
    TableNotFound { schema: String, table: String },

    /// Bind-time: the relation has no columns.
    #[error("relation {schema}.{table} has no columns")]
    EmptyRelation { schema: String, table: String },

    /// A value was decoded via a path that isn't implemented (multi-dim
    /// array, numeric NaN/Inf, JSONB version != 1, ...).
    #[error("unsupported value for column {column}: {reason}")]
    UnsupportedType { column: String, reason: String },

    /// An enum label arrived on the wire that isn't in the mapped label set.
    #[error("unknown enum label {label:?} for column {column}")]
    UnknownEnumLabel { column: String, label: String },

    /// A predicate node could not be translated to SQL. Recovered locally:
    /// the caller drops the offending filter and continues unfiltered.
    #[error("unsupported predicate: {0}")]
    UnsupportedPredicate(String),

    /// Cooperative cancellation. Not meant to be treated as a failure by
    /// callers; returned so call sites can distinguish it from other errors
    /// and terminate cleanly.
    #[error("scan canceled")]
    Canceled,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        BridgeError::ProtocolError(msg.into())
    }

    pub(crate) fn unsupported(column: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::UnsupportedType {
            column: column.into(),
            reason: reason.into(),
        }
    }
}
