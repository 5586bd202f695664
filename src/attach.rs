//! Attach helper (spec.md §6): enumerates the user tables of a remote schema
//! and describes the view each one would become in the target catalog. Does
//! not touch the target engine's catalog itself — building and registering
//! the view is the out-of-scope CLI/extension layer's job (spec.md §1
//! Non-goals); this module only produces the data that layer needs.

use postgres::{Client, NoTls};

use crate::error::{BridgeError, BridgeResult};

/// One table in `source_schema` and the view it should become in
/// `sink_schema`, once the caller registers it against this crate's scan
/// entry point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewPlan {
    pub source_schema: String,
    pub source_table: String,
    pub sink_schema: String,
    pub sink_view: String,
    /// `true` iff a view of this name already exists in `sink_schema` and
    /// the caller asked to overwrite it.
    pub overwrite_existing: bool,
    /// Mirrors the caller's `filter_pushdown` request; carried through so
    /// the registering layer knows whether to wire predicate pushdown for
    /// this view.
    pub filter_pushdown: bool,
}

/// Enumerates ordinary (non-system) tables and materialized views in
/// `source_schema` and returns the [`ViewPlan`] for each. `overwrite` and
/// `filter_pushdown` are recorded on every plan verbatim; this function
/// performs no existence check against `sink_schema` since that catalog is
/// owned by the caller, not this crate.
pub fn plan_attach(
    dsn: &str,
    source_schema: &str,
    sink_schema: &str,
    overwrite: bool,
    filter_pushdown: bool,
) -> BridgeResult<Vec<ViewPlan>> {
    let pg_config: postgres::Config = dsn.parse().map_err(BridgeError::ConnectionError)?;
    let mut client: Client = pg_config.connect(NoTls)?;

    let rows = client.query(
        "SELECT c.relname FROM pg_class c \
         JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE n.nspname = $1 AND c.relkind IN ('r', 'p', 'm') \
         ORDER BY c.relname",
        &[&source_schema],
    )?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let source_table: String = row.get(0);
            ViewPlan {
                source_schema: source_schema.to_owned(),
                source_table: source_table.clone(),
                sink_schema: sink_schema.to_owned(),
                sink_view: source_table,
                overwrite_existing: overwrite,
                filter_pushdown,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_plan_carries_overwrite_and_pushdown_flags_verbatim() {
        let plan = ViewPlan {
            source_schema: "public".into(),
            source_table: "orders".into(),
            sink_schema: "pg".into(),
            sink_view: "orders".into(),
            overwrite_existing: true,
            filter_pushdown: false,
        };
        assert!(plan.overwrite_existing);
        assert!(!plan.filter_pushdown);
    }
}
