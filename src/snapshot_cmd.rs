//! CLI commands over the dataset.
//!
//! Each `run_*` function backs one `snap` subcommand. They print a plain
//! `key: value` summary (or JSON for `props` and `get`) to stdout and leave
//! diagnostics to the tracing subscriber on stderr.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use sheetsnap_core::Locale;

use crate::config::Config;
use crate::pages::{compute_static_paths, compute_static_props, PageContext};
use crate::provider::{persist_snapshot, provider_for, DatasetProvider, LiveProvider};

/// Fetch every table for every supported language, consolidate, and write
/// the snapshot to `output` (or `build.snapshot_path`).
pub async fn run_build(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let chain = config.site.languages();
    let provider = LiveProvider::from_config(config)?;
    let outcome = provider.dataset(&chain).await?;
    let snapshot = &outcome.value;

    let path = output.unwrap_or_else(|| config.build.snapshot_path.clone());
    persist_snapshot(snapshot, &path).await?;
    let fingerprint = snapshot
        .fingerprint()
        .context("Failed to fingerprint snapshot")?;

    let locales: Vec<&str> = chain.locales().iter().map(Locale::as_str).collect();
    let head = chain
        .first()
        .cloned()
        .unwrap_or_else(|| config.site.default_locale.clone());

    println!("build {}", config.source.kind);
    println!("  locales: {}", locales.join(", "));
    for table in snapshot.table_names() {
        println!("  {}: {}", table, snapshot.records(table, &head).len());
    }
    println!("  records: {}", snapshot.len());
    println!("  fingerprint: {}", fingerprint);
    println!("  written: {}", path.display());
    if outcome.has_diagnostics() {
        println!("  warnings: {}", outcome.diagnostics.len());
        for diagnostic in &outcome.diagnostics {
            println!("    - {}", diagnostic);
        }
    }
    println!("ok");
    Ok(())
}

pub async fn run_paths(config: &Config) -> Result<()> {
    let ctx = PageContext::from_config(config)?;
    let provider = provider_for(config, false)?;
    for path in compute_static_paths(&ctx, provider.as_ref()).await? {
        println!("{}", path.locale);
    }
    Ok(())
}

pub async fn run_props(
    config: &Config,
    locale: Option<String>,
    preview: bool,
    preview_data: Option<String>,
) -> Result<()> {
    let preview_data = preview_data
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("--preview-data is not valid JSON")?;
    let ctx = PageContext::from_config(config)?;
    let provider = provider_for(config, preview)?;
    let props =
        compute_static_props(&ctx, provider.as_ref(), locale.as_deref(), preview, preview_data)
            .await?;
    println!("{}", serde_json::to_string_pretty(&props)?);
    Ok(())
}

/// Print one record as seen from `locale`. Links print as `{ table, id }`.
pub async fn run_get(
    config: &Config,
    table: &str,
    id: &str,
    locale: Option<String>,
) -> Result<()> {
    let requested = locale
        .map(Locale::new)
        .unwrap_or_else(|| config.site.default_locale.clone());
    let provider = provider_for(config, false)?;
    let outcome = provider.dataset(&config.site.languages()).await?;

    let record = match outcome.value.get_record(table, id, &requested) {
        Some(record) => record,
        None => bail!("record not found: {}#{}", table, id),
    };
    println!("{}", serde_json::to_string_pretty(&record.to_json())?);
    Ok(())
}
