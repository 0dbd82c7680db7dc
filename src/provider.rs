//! Dataset strategies.
//!
//! A [`DatasetProvider`] hands out a consolidated snapshot for a fallback
//! chain. [`LiveProvider`] re-runs the whole pipeline against the table
//! source on every call. [`CachedProvider`] decodes the snapshot written by
//! `snap build`. [`provider_for`] picks one per invocation, and callers pass
//! it down explicitly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use sheetsnap_core::codec;
use sheetsnap_core::locale::LocaleChain;
use sheetsnap_core::pipeline::{build_snapshot, BuildOptions};
use sheetsnap_core::source::TableSource;
use sheetsnap_core::{Outcome, SchemaRegistry, Snapshot};

use crate::config::{BuildMode, Config};
use crate::sources::create_source;

#[async_trait]
pub trait DatasetProvider: Send + Sync {
    fn mode(&self) -> BuildMode;

    async fn dataset(&self, chain: &LocaleChain) -> Result<Outcome<Arc<Snapshot>>>;
}

pub struct LiveProvider {
    registry: SchemaRegistry,
    source: Arc<dyn TableSource>,
    opts: BuildOptions,
    timeout: Duration,
}

impl LiveProvider {
    pub fn new(
        registry: SchemaRegistry,
        source: Arc<dyn TableSource>,
        max_concurrency: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            source,
            opts: BuildOptions { max_concurrency },
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.registry()?,
            create_source(config)?,
            config.source.max_concurrency,
            Duration::from_secs(config.build.timeout_secs),
        ))
    }
}

#[async_trait]
impl DatasetProvider for LiveProvider {
    fn mode(&self) -> BuildMode {
        BuildMode::Live
    }

    async fn dataset(&self, chain: &LocaleChain) -> Result<Outcome<Arc<Snapshot>>> {
        let build = build_snapshot(&self.registry, self.source.as_ref(), chain, &self.opts);
        let outcome = tokio::time::timeout(self.timeout, build)
            .await
            .with_context(|| format!("Dataset build timed out after {}s", self.timeout.as_secs()))?
            .context("Dataset build failed")?;
        info!(
            source = self.source.name(),
            records = outcome.value.len(),
            warnings = outcome.diagnostics.len(),
            "live dataset built"
        );
        Ok(outcome.map(Arc::new))
    }
}

pub struct CachedProvider {
    path: PathBuf,
}

impl CachedProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DatasetProvider for CachedProvider {
    fn mode(&self) -> BuildMode {
        BuildMode::Cached
    }

    /// The chain is ignored. The persisted snapshot carries its own.
    async fn dataset(&self, _chain: &LocaleChain) -> Result<Outcome<Arc<Snapshot>>> {
        let payload = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", self.path.display()))?;
        let snapshot = codec::deserialize(&payload)
            .with_context(|| format!("Corrupt snapshot: {}", self.path.display()))?;
        Ok(Outcome::clean(Arc::new(snapshot)))
    }
}

/// Live when previewing or when `build.mode = "live"`, cached otherwise.
pub fn provider_for(config: &Config, preview: bool) -> Result<Arc<dyn DatasetProvider>> {
    if preview || config.build.mode == BuildMode::Live {
        Ok(Arc::new(LiveProvider::from_config(config)?))
    } else {
        Ok(Arc::new(CachedProvider::new(&config.build.snapshot_path)))
    }
}

/// Write a snapshot where [`CachedProvider`] will find it.
pub async fn persist_snapshot(snapshot: &Snapshot, path: &Path) -> Result<()> {
    let payload = codec::serialize(snapshot).context("Failed to serialize snapshot")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    // Write then rename, so readers never observe a partial file.
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    Ok(())
}
