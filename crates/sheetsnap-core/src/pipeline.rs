//! Build entry point.
//!
//! Stages run strictly in sequence: fetch, sanitize, resolve (per locale),
//! consolidate. Each stage starts only once the previous one has produced
//! its complete output. Non-fatal diagnostics from every stage are carried
//! on the returned [`Outcome`]. Any fatal error aborts the build and no
//! snapshot is produced.

use std::collections::{BTreeMap, HashSet};

use tracing::info;

use crate::consolidate::{consolidate, link_target, Snapshot};
use crate::error::{Diagnostic, Outcome, PipelineError};
use crate::fetch::{fetch_dataset, DEFAULT_MAX_CONCURRENCY};
use crate::locale::LocaleChain;
use crate::models::RawRecordSet;
use crate::resolve::resolve;
use crate::sanitize::sanitize;
use crate::schema::{Schema, SchemaRegistry};
use crate::source::TableSource;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub max_concurrency: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Run the full pipeline against `source`.
///
/// Dropping the returned future abandons in-flight fetches. Nothing is
/// published in that case.
pub async fn build_snapshot(
    registry: &SchemaRegistry,
    source: &dyn TableSource,
    chain: &LocaleChain,
    opts: &BuildOptions,
) -> Result<Outcome<Snapshot>, PipelineError> {
    if chain.is_empty() {
        return Err(PipelineError::EmptyChain);
    }
    let schema = registry.get_schema();
    let raw = fetch_dataset(&schema, chain, source, opts.max_concurrency).await?;
    consolidate_raw(&schema, &raw, chain)
}

/// The synchronous half of the pipeline, from raw sets to a snapshot.
pub fn consolidate_raw(
    schema: &Schema,
    raw_sets: &[RawRecordSet],
    chain: &LocaleChain,
) -> Result<Outcome<Snapshot>, PipelineError> {
    if chain.is_empty() {
        return Err(PipelineError::EmptyChain);
    }

    let sanitized = sanitize(raw_sets, schema, chain);
    let mut diagnostics = sanitized.diagnostics;

    let mut resolved = BTreeMap::new();
    for (locale, records) in sanitized.value {
        let outcome = resolve(&locale, records, schema);
        diagnostics.extend(outcome.diagnostics);
        resolved.insert(locale, outcome.value);
    }

    let snapshot = consolidate(schema, resolved, chain)?;
    let diagnostics = settle_shared_links(schema, &snapshot, diagnostics);
    if !diagnostics.is_empty() {
        info!(warnings = diagnostics.len(), "build finished with warnings");
    }
    Ok(Outcome::clean(snapshot).merge_diagnostics(diagnostics))
}

/// Shared records are resolved once per locale, but their links are
/// re-pointed against the whole snapshot. A dangling report for a shared
/// record stands only when no node holds the target, and is kept once.
fn settle_shared_links(
    schema: &Schema,
    snapshot: &Snapshot,
    diagnostics: Vec<Diagnostic>,
) -> Vec<Diagnostic> {
    let mut reported = HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| match d {
            Diagnostic::DanglingReference {
                table,
                id,
                field,
                target,
                ..
            } if schema.table(table).is_some_and(|t| t.shared) => {
                link_target(schema, table, field, target, |t, i| snapshot.find(t, i)).is_none()
                    && reported.insert((table.clone(), id.clone(), field.clone(), target.clone()))
            }
            _ => true,
        })
        .collect()
}
