//! Translation lookup.
//!
//! UI strings are fetched once per props computation for the page's
//! language. Nested JSON namespaces are flattened to dotted keys
//! (`{"nav": {"home": "Accueil"}}` → `nav.home`). There is no retry here.
//! A failed lookup fails the page.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use sheetsnap_core::locale::Locale;

use crate::config::Config;

pub type Translations = BTreeMap<String, String>;

const LOCIZE_API_BASE: &str = "https://api.locize.app";

#[async_trait]
pub trait TranslationSource: Send + Sync {
    fn name(&self) -> &str;

    async fn get_translations(&self, lang: &Locale) -> Result<Translations>;
}

/// Used when no translation backend is configured.
pub struct NoTranslations;

#[async_trait]
impl TranslationSource for NoTranslations {
    fn name(&self) -> &str {
        "none"
    }

    async fn get_translations(&self, _lang: &Locale) -> Result<Translations> {
        Ok(Translations::new())
    }
}

/// `<root>/<lang>.json` files. A language without a file has no strings.
pub struct DirectoryTranslations {
    root: PathBuf,
}

impl DirectoryTranslations {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl TranslationSource for DirectoryTranslations {
    fn name(&self) -> &str {
        "directory"
    }

    async fn get_translations(&self, lang: &Locale) -> Result<Translations> {
        let path = self.root.join(format!("{}.json", lang.as_str()));
        if !path.is_file() {
            debug!(%lang, path = %path.display(), "no translation file");
            return Ok(Translations::new());
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(flatten(&value))
    }
}

/// Locize CDN: `GET {api}/{project}/{version}/{lang}/{namespace}`.
pub struct LocizeTranslations {
    client: reqwest::Client,
    api_base: String,
    project_id: String,
    version: String,
    namespace: String,
}

impl LocizeTranslations {
    pub fn new(config: &Config) -> Result<Self> {
        let t = &config.translations;
        let project_id = t
            .project_id
            .clone()
            .ok_or_else(|| anyhow!("translations.project_id required for locize"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: LOCIZE_API_BASE.to_string(),
            project_id,
            version: t.version.clone(),
            namespace: t.namespace.clone(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl TranslationSource for LocizeTranslations {
    fn name(&self) -> &str {
        "locize"
    }

    async fn get_translations(&self, lang: &Locale) -> Result<Translations> {
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.project_id,
            self.version,
            lang,
            self.namespace
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Locize request failed: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Locize API error {}: {}", status, body_text);
        }
        let value: Value = response.json().await.context("Invalid Locize response")?;
        Ok(flatten(&value))
    }
}

pub fn create_translations(config: &Config) -> Result<Arc<dyn TranslationSource>> {
    match config.translations.kind.as_str() {
        "none" => Ok(Arc::new(NoTranslations)),
        "locize" => Ok(Arc::new(LocizeTranslations::new(config)?)),
        "directory" => {
            let root = config
                .translations
                .root
                .clone()
                .ok_or_else(|| anyhow!("translations.root required for directory translations"))?;
            Ok(Arc::new(DirectoryTranslations::new(root)))
        }
        other => bail!("Unknown translations kind: {}", other),
    }
}

/// Flatten nested objects into dotted keys. Non-string leaves are
/// stringified, `null` leaves are skipped.
pub fn flatten(value: &Value) -> Translations {
    let mut out = Translations::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Translations) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, path, out);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_flatten_nested_namespaces() {
        let flat = flatten(&json!({
            "nav": { "home": "Accueil", "count": 3 },
            "title": "Bonjour",
            "empty": null
        }));
        assert_eq!(flat.get("nav.home").map(String::as_str), Some("Accueil"));
        assert_eq!(flat.get("nav.count").map(String::as_str), Some("3"));
        assert_eq!(flat.get("title").map(String::as_str), Some("Bonjour"));
        assert!(!flat.contains_key("empty"));
    }

    #[tokio::test]
    async fn test_directory_translations() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("fr.json"), r#"{"greeting":"Salut"}"#).unwrap();
        let source = DirectoryTranslations::new(tmp.path());
        let fr = source.get_translations(&Locale::new("fr")).await.unwrap();
        assert_eq!(fr.get("greeting").map(String::as_str), Some("Salut"));
        let de = source.get_translations(&Locale::new("de")).await.unwrap();
        assert!(de.is_empty());
    }
}
