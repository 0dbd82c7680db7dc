//! Raw fetcher.
//!
//! Issues exactly one [`TableSource::list_records`] call per (table, locale)
//! pair, shared tables included, with up to `max_concurrency` requests in
//! flight. Every pair runs to completion. If any pair failed, the stage
//! fails with a [`FetchFailure`] naming all of them and returns no data.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::error::{FetchError, FetchFailure};
use crate::locale::{Locale, LocaleChain};
use crate::models::{LocaleTag, RawRecord, RawRecordSet, RawRow};
use crate::schema::Schema;
use crate::source::TableSource;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Fetch every table of `schema` for every locale of `chain`.
///
/// Results come back in (table, locale) order regardless of completion
/// order.
pub async fn fetch_dataset(
    schema: &Schema,
    chain: &LocaleChain,
    source: &dyn TableSource,
    max_concurrency: usize,
) -> Result<Vec<RawRecordSet>, FetchFailure> {
    let pairs: Vec<(String, bool, Locale)> = schema
        .tables()
        .iter()
        .flat_map(|t| {
            chain
                .locales()
                .iter()
                .map(move |l| (t.name.clone(), t.shared, l.clone()))
        })
        .collect();
    let attempted = pairs.len();

    let results: Vec<_> = stream::iter(pairs)
        .map(|(table, shared, locale)| fetch_one(source, table, shared, locale))
        .buffered(max_concurrency.max(1))
        .collect()
        .await;

    let mut sets = Vec::with_capacity(results.len());
    let mut failures = Vec::new();

    for (table, shared, locale, result) in results {
        match result {
            Ok(rows) => {
                let tag = if shared {
                    LocaleTag::Shared
                } else {
                    LocaleTag::Locale(locale.clone())
                };
                let mut records = Vec::with_capacity(rows.len());
                for row in rows {
                    if row.id.trim().is_empty() {
                        warn!(table = %table, %locale, "skipping row without id");
                        continue;
                    }
                    records.push(RawRecord {
                        id: row.id,
                        fields: row.fields,
                        tag: tag.clone(),
                    });
                }
                sets.push(RawRecordSet {
                    table,
                    locale,
                    records,
                });
            }
            Err(e) => failures.push(FetchError {
                table,
                locale,
                cause: format!("{:#}", e),
            }),
        }
    }

    if !failures.is_empty() {
        return Err(FetchFailure {
            failures,
            attempted,
        });
    }

    info!(
        source = source.name(),
        sets = sets.len(),
        records = sets.iter().map(|s| s.records.len()).sum::<usize>(),
        "fetch complete"
    );
    Ok(sets)
}

async fn fetch_one(
    source: &dyn TableSource,
    table: String,
    shared: bool,
    locale: Locale,
) -> (String, bool, Locale, anyhow::Result<Vec<RawRow>>) {
    debug!(source = source.name(), table = %table, %locale, "listing records");
    let result = source.list_records(&table, &locale).await;
    (table, shared, locale, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tests::demo_registry;
    use crate::source::memory::MemorySource;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn test_one_request_per_pair() {
        let registry = demo_registry();
        let schema = registry.get_schema();
        let mut source = MemorySource::new();
        source
            .insert_shared("Customer", "cus1", json!({ "label": "Acme" }))
            .insert("Product", "en", "p1", json!({ "name": "Pen" }))
            .insert("Product", "fr", "p1", json!({ "name": "Stylo" }));
        let chain = LocaleChain::new(["en", "fr"]);

        let sets = block_on(fetch_dataset(&schema, &chain, &source, 2)).unwrap();
        assert_eq!(source.calls(), 4);
        assert_eq!(sets.len(), 4);
        assert_eq!(sets[0].table, "Customer");
        assert_eq!(sets[0].locale, Locale::new("en"));
        assert_eq!(sets[0].records[0].tag, LocaleTag::Shared);
        assert_eq!(sets[3].table, "Product");
        assert_eq!(sets[3].locale, Locale::new("fr"));
        assert_eq!(sets[3].records[0].tag, LocaleTag::Locale(Locale::new("fr")));
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_fetch_future_is_send() {
        let registry = demo_registry();
        let schema = registry.get_schema();
        let source = MemorySource::new();
        let chain = LocaleChain::new(["en"]);
        let fut = fetch_dataset(&schema, &chain, &source, 2);
        assert_send(&fut);
        assert!(block_on(fut).is_ok());
    }

    #[test]
    fn test_failures_are_aggregated() {
        let registry = demo_registry();
        let schema = registry.get_schema();
        let mut source = MemorySource::new();
        source.fail("Product", "fr").fail("Customer", "en");
        let chain = LocaleChain::new(["en", "fr"]);

        let err = block_on(fetch_dataset(&schema, &chain, &source, 1)).unwrap_err();
        // Every pair was still attempted.
        assert_eq!(source.calls(), 4);
        assert_eq!(err.attempted, 4);
        assert_eq!(err.failures.len(), 2);
        assert_eq!(err.failures[0].table, "Customer");
        assert_eq!(err.failures[1].locale, Locale::new("fr"));
    }

    #[test]
    fn test_rows_without_id_are_skipped() {
        let registry = demo_registry();
        let schema = registry.get_schema();
        let mut source = MemorySource::new();
        source
            .insert("Product", "en", "", json!({ "name": "ghost" }))
            .insert("Product", "en", "p1", json!({ "name": "Pen" }));
        let chain = LocaleChain::new(["en"]);

        let sets = block_on(fetch_dataset(&schema, &chain, &source, 4)).unwrap();
        let products = sets.iter().find(|s| s.table == "Product").unwrap();
        assert_eq!(products.records.len(), 1);
        assert_eq!(products.records[0].id, "p1");
    }
}
