//! JSON-directory table source.
//!
//! Reads tables exported in the Airtable list shape: `<root>/<Table>.json`
//! holding an array of `{ "id": "...", "fields": { ... } }` objects. A
//! per-locale file at `<root>/<locale>/<Table>.json` takes precedence when
//! present. Columns go through the same locale-suffix mapping as the
//! Airtable source, so an export of a multi-language base works unchanged.
//!
//! Used for offline builds and as test fixtures.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use sheetsnap_core::locale::Locale;
use sheetsnap_core::models::RawRow;
use sheetsnap_core::source::TableSource;

use crate::config::Config;
use crate::sources::localize_columns;

pub struct DirectorySource {
    root: PathBuf,
    supported: Vec<Locale>,
}

#[derive(Debug, Deserialize)]
struct ExportedRow {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl DirectorySource {
    pub fn new(config: &Config) -> Result<Self> {
        let root = config
            .source
            .root
            .clone()
            .ok_or_else(|| anyhow::anyhow!("source.root required for directory source"))?;
        Ok(Self::with_root(root, config.site.supported_locales.clone()))
    }

    pub fn with_root(root: impl Into<PathBuf>, supported: Vec<Locale>) -> Self {
        Self {
            root: root.into(),
            supported,
        }
    }

    fn table_path(&self, table: &str, locale: &Locale) -> PathBuf {
        let localized = self.root.join(locale.as_str()).join(format!("{}.json", table));
        if localized.is_file() {
            localized
        } else {
            self.root.join(format!("{}.json", table))
        }
    }
}

async fn read_rows(path: &Path) -> Result<Vec<ExportedRow>> {
    if !path.is_file() {
        bail!("Table export does not exist: {}", path.display());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[async_trait]
impl TableSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn list_records(&self, table: &str, locale: &Locale) -> Result<Vec<RawRow>> {
        if table.contains(['/', '\\']) || table.starts_with('.') {
            bail!("Invalid table name for directory source: {}", table);
        }
        let path = self.table_path(table, locale);
        let rows = read_rows(&path).await?;
        debug!(table, %locale, path = %path.display(), rows = rows.len(), "directory table listed");

        Ok(rows
            .into_iter()
            .map(|row| RawRow {
                id: row.id.unwrap_or_default(),
                fields: localize_columns(row.fields, locale, &self.supported),
            })
            .collect())
    }
}
