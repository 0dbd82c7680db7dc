//! Table source selection and health listing.
//!
//! Also holds the locale-suffix column mapping shared by every connector.
//! One physical table carries all languages side by side (`title_EN`,
//! `title_FR`). For a given locale, the matching suffixed column is renamed
//! to its base name and the other languages' columns are dropped.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

use sheetsnap_core::locale::Locale;
use sheetsnap_core::source::TableSource;

use crate::config::Config;
use crate::connector_airtable::{AirtableSource, AIRTABLE_API_KEY_ENV};
use crate::connector_dir::DirectorySource;

/// Build the table source named by `[source].kind`.
pub fn create_source(config: &Config) -> Result<Arc<dyn TableSource>> {
    match config.source.kind.as_str() {
        "airtable" => Ok(Arc::new(AirtableSource::new(config)?)),
        "directory" => Ok(Arc::new(DirectorySource::new(config)?)),
        other => bail!("Unknown source kind: {}", other),
    }
}

/// Project a row's columns onto one locale.
///
/// `title_FR` becomes `title` when `locale`'s language is `fr`, and is
/// dropped for any other supported language. A suffixed value wins over an
/// unsuffixed column of the same base name. Columns whose suffix is not a
/// supported language pass through untouched.
pub fn localize_columns(fields: Map<String, Value>, locale: &Locale, supported: &[Locale]) -> Map<String, Value> {
    let lang = locale.language();
    let mut plain = Map::new();
    let mut localized = Map::new();

    for (column, value) in fields {
        match split_locale_suffix(&column, supported) {
            Some((base, suffix)) if suffix == lang => {
                localized.insert(base.to_string(), value);
            }
            Some(_) => {}
            None => {
                plain.insert(column, value);
            }
        }
    }

    plain.extend(localized);
    plain
}

fn split_locale_suffix<'a>(column: &'a str, supported: &[Locale]) -> Option<(&'a str, Locale)> {
    let (base, suffix) = column.rsplit_once('_')?;
    if base.is_empty() {
        return None;
    }
    let suffix = Locale::new(suffix);
    supported
        .iter()
        .any(|l| l.language() == suffix)
        .then_some((base, suffix))
}

pub fn list_sources(config: &Config) -> Result<()> {
    let source_status = match config.source.kind.as_str() {
        "airtable" => {
            if std::env::var(AIRTABLE_API_KEY_ENV).is_ok() {
                ("OK", true)
            } else {
                ("NOT CONFIGURED (AIRTABLE_API_KEY not set)", false)
            }
        }
        "directory" => match &config.source.root {
            Some(root) if root.is_dir() => ("OK", true),
            _ => ("NOT CONFIGURED (root does not exist)", false),
        },
        _ => ("UNKNOWN", false),
    };

    let translations_status = match config.translations.kind.as_str() {
        "none" => ("DISABLED", true),
        "locize" => ("OK", config.translations.project_id.is_some()),
        "directory" => match &config.translations.root {
            Some(root) if root.is_dir() => ("OK", true),
            _ => ("NOT CONFIGURED (root does not exist)", false),
        },
        _ => ("UNKNOWN", false),
    };

    let snapshot_status = if config.build.snapshot_path.is_file() {
        ("OK", true)
    } else {
        ("MISSING (run `snap build`)", false)
    };

    println!("{:<14} {:<12} {:<40} HEALTHY", "SOURCE", "KIND", "STATUS");
    println!(
        "{:<14} {:<12} {:<40} {}",
        "tables", config.source.kind, source_status.0, source_status.1
    );
    println!(
        "{:<14} {:<12} {:<40} {}",
        "translations", config.translations.kind, translations_status.0, translations_status.1
    );
    println!(
        "{:<14} {:<12} {:<40} {}",
        "snapshot", "file", snapshot_status.0, snapshot_status.1
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supported() -> Vec<Locale> {
        vec![Locale::new("en"), Locale::new("fr")]
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_suffixed_column_renamed_for_locale() {
        let row = fields(json!({ "title_EN": "Pen", "title_FR": "Stylo", "price": 2 }));
        let fr = localize_columns(row.clone(), &Locale::new("fr"), &supported());
        assert_eq!(fr.get("title"), Some(&json!("Stylo")));
        assert_eq!(fr.get("price"), Some(&json!(2)));
        assert!(!fr.contains_key("title_EN"));
        assert!(!fr.contains_key("title_FR"));

        let en = localize_columns(row, &Locale::new("en-US"), &supported());
        assert_eq!(en.get("title"), Some(&json!("Pen")));
    }

    #[test]
    fn test_suffixed_value_wins_over_plain_column() {
        let row = fields(json!({ "title": "Default", "title_FR": "Stylo" }));
        let fr = localize_columns(row.clone(), &Locale::new("fr"), &supported());
        assert_eq!(fr.get("title"), Some(&json!("Stylo")));
        let en = localize_columns(row, &Locale::new("en"), &supported());
        assert_eq!(en.get("title"), Some(&json!("Default")));
    }

    #[test]
    fn test_unrelated_underscore_columns_pass_through() {
        let row = fields(json!({ "created_at": "2021", "label_DE": "Stift" }));
        let en = localize_columns(row, &Locale::new("en"), &supported());
        assert_eq!(en.get("created_at"), Some(&json!("2021")));
        assert_eq!(en.get("label_DE"), Some(&json!("Stift")));
    }
}
