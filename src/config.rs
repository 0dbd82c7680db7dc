//! TOML configuration.
//!
//! A single file (default `./config/snap.toml`) describes the site's locales,
//! the table schema, the table source, the translation source, the build
//! mode and the server. [`load_config`] parses and validates it. The schema
//! is run through [`SchemaRegistry`] so a bad declaration fails here, before
//! any fetch is issued.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sheetsnap_core::locale::{Locale, LocaleChain};
use sheetsnap_core::schema::{SchemaRegistry, TableDeclaration};

/// Env var that overrides `site.customer_ref`.
pub const CUSTOMER_REF_ENV: &str = "SHEETSNAP_CUSTOMER_REF";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub site: SiteConfig,
    pub schema: BTreeMap<String, TableDeclaration>,
    pub source: SourceConfig,
    #[serde(default)]
    pub translations: TranslationsConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    pub default_locale: Locale,
    pub supported_locales: Vec<Locale>,
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default = "default_customer_table")]
    pub customer_table: String,
    #[serde(default = "default_customer_ref_field")]
    pub customer_ref_field: String,
    #[serde(default = "default_available_languages_field")]
    pub available_languages_field: String,
}

fn default_customer_table() -> String {
    "Customer".to_string()
}
fn default_customer_ref_field() -> String {
    "ref".to_string()
}
fn default_available_languages_field() -> String {
    "availableLanguages".to_string()
}

impl SiteConfig {
    /// Languages of the supported locales, de-duplicated, in declaration
    /// order. This is the fallback chain of a full build.
    pub fn languages(&self) -> LocaleChain {
        LocaleChain::new(self.supported_locales.iter().map(Locale::language))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub kind: String,
    #[serde(default)]
    pub base_id: Option<String>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_concurrency() -> usize {
    4
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationsConfig {
    #[serde(default = "default_translations_kind")]
    pub kind: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_translations_version")]
    pub version: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl Default for TranslationsConfig {
    fn default() -> Self {
        Self {
            kind: default_translations_kind(),
            project_id: None,
            version: default_translations_version(),
            namespace: default_namespace(),
            root: None,
        }
    }
}

fn default_translations_kind() -> String {
    "none".to_string()
}
fn default_translations_version() -> String {
    "latest".to_string()
}
fn default_namespace() -> String {
    "common".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Live,
    Cached,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_build_mode")]
    pub mode: BuildMode,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_build_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            mode: default_build_mode(),
            snapshot_path: default_snapshot_path(),
            timeout_secs: default_build_timeout_secs(),
        }
    }
}

fn default_build_mode() -> BuildMode {
    BuildMode::Live
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./.snap/snapshot.json")
}
fn default_build_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_revalidate_secs")]
    pub revalidate_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            revalidate_secs: default_revalidate_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_revalidate_secs() -> u64 {
    30
}

impl Config {
    /// Schema registry built from `[schema.*]`.
    pub fn registry(&self) -> Result<SchemaRegistry> {
        SchemaRegistry::from_declarations(&self.schema).context("Invalid [schema] declaration")
    }

    /// `site.customer_ref`, unless overridden from the environment.
    pub fn customer_ref(&self) -> Option<String> {
        std::env::var(CUSTOMER_REF_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.site.customer_ref.clone())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate site
    if config.site.supported_locales.is_empty() {
        bail!("site.supported_locales must not be empty");
    }
    if !config
        .site
        .supported_locales
        .contains(&config.site.default_locale)
    {
        bail!(
            "site.default_locale '{}' must be one of site.supported_locales",
            config.site.default_locale
        );
    }

    // Validate source
    if config.source.max_concurrency == 0 {
        bail!("source.max_concurrency must be >= 1");
    }
    match config.source.kind.as_str() {
        "airtable" => {
            if config.source.base_id.is_none() {
                bail!("source.base_id must be specified when kind is 'airtable'");
            }
        }
        "directory" => {
            if config.source.root.is_none() {
                bail!("source.root must be specified when kind is 'directory'");
            }
        }
        other => bail!(
            "Unknown source kind: '{}'. Must be airtable or directory.",
            other
        ),
    }

    // Validate translations
    match config.translations.kind.as_str() {
        "none" => {}
        "locize" => {
            if config.translations.project_id.is_none() {
                bail!("translations.project_id must be specified when kind is 'locize'");
            }
        }
        "directory" => {
            if config.translations.root.is_none() {
                bail!("translations.root must be specified when kind is 'directory'");
            }
        }
        other => bail!(
            "Unknown translations kind: '{}'. Must be none, locize, or directory.",
            other
        ),
    }

    // Validate schema
    config.registry()?;
    if !config.schema.contains_key(&config.site.customer_table) {
        bail!(
            "site.customer_table '{}' is not declared under [schema]",
            config.site.customer_table
        );
    }

    Ok(config)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_toml(root: &str) -> String {
        format!(
            r#"[site]
default_locale = "en"
supported_locales = ["en", "fr"]
customer_ref = "acme"

[schema.Customer]
shared = true
fields = {{ ref = "text", label = "text", availableLanguages = "text-list", products = "links:Product" }}

[schema.Product]
fields = {{ title = "localized-text", price = "number", featured = "boolean", customers = "links:Customer" }}

[source]
kind = "directory"
root = "{root}"
"#
        )
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = parse_config(&sample_toml("./data")).unwrap();
        assert_eq!(config.site.default_locale, Locale::new("en"));
        assert_eq!(config.site.customer_table, "Customer");
        assert_eq!(config.source.max_concurrency, 4);
        assert_eq!(config.build.mode, BuildMode::Live);
        assert_eq!(config.server.revalidate_secs, 30);
        assert_eq!(config.translations.kind, "none");
        assert_eq!(config.site.languages(), LocaleChain::new(["en", "fr"]));
    }

    #[test]
    fn test_default_locale_must_be_supported() {
        let toml = sample_toml("./data").replace(r#"default_locale = "en""#, r#"default_locale = "de""#);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("default_locale"));
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        let toml = sample_toml("./data").replace(r#"price = "number""#, r#"price = "currency""#);
        let err = parse_config(&toml).unwrap_err();
        assert!(format!("{:#}", err).contains("currency"));
    }

    #[test]
    fn test_airtable_requires_base_id() {
        let toml = sample_toml("./data").replace(r#"kind = "directory""#, r#"kind = "airtable""#);
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("base_id"));
    }

    #[test]
    fn test_unknown_source_kind_rejected() {
        let toml = sample_toml("./data").replace(r#"kind = "directory""#, r#"kind = "sheets""#);
        assert!(parse_config(&toml).is_err());
    }
}
