//! In-memory [`TableSource`] for tests and demos.
//!
//! Rows are stored per (table, locale). A table registered with
//! [`MemorySource::insert_shared`] answers every locale with the same rows.
//! Failures can be injected per pair to exercise the fetch error path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::locale::Locale;
use crate::models::RawRow;

use super::TableSource;

#[derive(Default)]
pub struct MemorySource {
    rows: BTreeMap<(String, Option<Locale>), Vec<RawRow>>,
    failing: BTreeSet<(String, Locale)>,
    calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row to `table` for one locale.
    pub fn insert(&mut self, table: &str, locale: &str, id: &str, fields: Value) -> &mut Self {
        self.rows
            .entry((table.to_string(), Some(Locale::new(locale))))
            .or_default()
            .push(RawRow::new(id, fields));
        self
    }

    /// Add a row returned for every locale.
    pub fn insert_shared(&mut self, table: &str, id: &str, fields: Value) -> &mut Self {
        self.rows
            .entry((table.to_string(), None))
            .or_default()
            .push(RawRow::new(id, fields));
        self
    }

    /// Make every request for (table, locale) fail.
    pub fn fail(&mut self, table: &str, locale: &str) -> &mut Self {
        self.failing
            .insert((table.to_string(), Locale::new(locale)));
        self
    }

    /// Number of `list_records` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list_records(&self, table: &str, locale: &Locale) -> Result<Vec<RawRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(&(table.to_string(), locale.clone())) {
            bail!("injected failure for {} [{}]", table, locale);
        }

        let mut rows = self
            .rows
            .get(&(table.to_string(), None))
            .cloned()
            .unwrap_or_default();
        if let Some(localized) = self.rows.get(&(table.to_string(), Some(locale.clone()))) {
            rows.extend(localized.iter().cloned());
        }
        Ok(rows)
    }
}
