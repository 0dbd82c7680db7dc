//! Sanitizer: raw rows → typed, locale-resolved records.
//!
//! For a localized table, each chain locale `L` gets one record per id seen
//! in any locale. The record's base fields come from the first locale in
//! `chain.for_locale(L)` that has the id. Every `localized-text` field walks
//! the same order independently and keeps the first non-empty value, noting
//! the locale it came from.
//!
//! Shared tables are sanitized per fetched locale without fallback. The
//! consolidator later checks the copies agree.
//!
//! A value that cannot be coerced drops its record for that locale and is
//! reported as a [`Diagnostic::Coercion`]. Good records are never held back
//! by bad ones.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;

use crate::error::{Diagnostic, Outcome, TypeCoercionError};
use crate::locale::{Locale, LocaleChain};
use crate::models::{FieldValue, RawRecord, RawRecordSet, SanitizedRecord};
use crate::schema::{FieldType, Schema, TableSchema};

const RAW_VALUE_PREVIEW: usize = 200;

/// Records of one (table, locale) set, first copy wins on duplicate ids.
struct IndexedSet<'a> {
    order: Vec<&'a RawRecord>,
    by_id: HashMap<&'a str, &'a RawRecord>,
}

impl<'a> IndexedSet<'a> {
    fn new() -> Self {
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn get(&self, id: &str) -> Option<&'a RawRecord> {
        self.by_id.get(id).copied()
    }
}

pub fn sanitize(
    raw_sets: &[RawRecordSet],
    schema: &Schema,
    chain: &LocaleChain,
) -> Outcome<BTreeMap<Locale, Vec<SanitizedRecord>>> {
    let mut diagnostics = Vec::new();

    let mut indexed: HashMap<(&str, &Locale), IndexedSet<'_>> = HashMap::new();
    for set in raw_sets {
        let entry = indexed
            .entry((set.table.as_str(), &set.locale))
            .or_insert_with(IndexedSet::new);
        for record in &set.records {
            if entry.by_id.contains_key(record.id.as_str()) {
                diagnostics.push(Diagnostic::DuplicateRecord {
                    table: set.table.clone(),
                    id: record.id.clone(),
                    locale: set.locale.clone(),
                });
                continue;
            }
            entry.by_id.insert(record.id.as_str(), record);
            entry.order.push(record);
        }
    }

    let mut out: BTreeMap<Locale, Vec<SanitizedRecord>> = chain
        .locales()
        .iter()
        .map(|l| (l.clone(), Vec::new()))
        .collect();

    for table in schema.tables() {
        for target in chain.locales() {
            let records = out.entry(target.clone()).or_default();

            if table.shared {
                let Some(set) = indexed.get(&(table.name.as_str(), target)) else {
                    continue;
                };
                for raw in &set.order {
                    match sanitize_record(table, &raw.id, target, &[(target, *raw)]) {
                        Ok(record) => records.push(record),
                        Err(e) => diagnostics.push(Diagnostic::Coercion(e)),
                    }
                }
                continue;
            }

            let order = chain.for_locale(target);
            let sets: Vec<(&Locale, &IndexedSet<'_>)> = order
                .iter()
                .filter_map(|l| indexed.get(&(table.name.as_str(), l)).map(|s| (l, s)))
                .collect();

            let mut seen: HashSet<&str> = HashSet::new();
            let mut ids: Vec<&str> = Vec::new();
            for (_, set) in &sets {
                for raw in &set.order {
                    if seen.insert(raw.id.as_str()) {
                        ids.push(raw.id.as_str());
                    }
                }
            }

            for id in ids {
                let variants: Vec<(&Locale, &RawRecord)> = sets
                    .iter()
                    .filter_map(|(l, set)| set.get(id).map(|r| (*l, r)))
                    .collect();
                match sanitize_record(table, id, target, &variants) {
                    Ok(record) => records.push(record),
                    Err(e) => diagnostics.push(Diagnostic::Coercion(e)),
                }
            }
        }
    }

    Outcome::new(out, diagnostics)
}

/// Build one record for `target` from its raw variants, in lookup order.
/// The first variant is the base.
fn sanitize_record(
    table: &TableSchema,
    id: &str,
    target: &Locale,
    variants: &[(&Locale, &RawRecord)],
) -> Result<SanitizedRecord, TypeCoercionError> {
    let (base_locale, base) = variants[0];

    let mut record = SanitizedRecord {
        id: id.to_string(),
        table: table.name.clone(),
        locale: target.clone(),
        resolved_locale: base_locale.clone(),
        fields: BTreeMap::new(),
        field_locales: BTreeMap::new(),
        pending_links: BTreeMap::new(),
    };

    let coercion_error = |field: &str, value: &Value, expected: &'static str| TypeCoercionError {
        table: table.name.clone(),
        id: id.to_string(),
        locale: target.clone(),
        field: field.to_string(),
        raw_value: preview(value),
        expected,
    };

    for descriptor in &table.fields {
        let name = descriptor.name.as_str();
        match &descriptor.field_type {
            FieldType::LocalizedText => {
                for (locale, variant) in variants {
                    let Some(value) = present(variant.fields.get(name)) else {
                        continue;
                    };
                    let text = coerce_text(value)
                        .ok_or_else(|| coercion_error(name, value, "localized-text"))?;
                    if text.trim().is_empty() {
                        continue;
                    }
                    record.fields.insert(name.to_string(), FieldValue::Text(text));
                    record
                        .field_locales
                        .insert(name.to_string(), (*locale).clone());
                    break;
                }
            }
            FieldType::Links { .. } => {
                let ids = match present(base.fields.get(name)) {
                    Some(value) => {
                        coerce_ids(value).ok_or_else(|| coercion_error(name, value, "links"))?
                    }
                    None => Vec::new(),
                };
                record.pending_links.insert(name.to_string(), ids);
            }
            FieldType::Boolean => {
                let flag = match present(base.fields.get(name)) {
                    Some(value) => {
                        coerce_bool(value).ok_or_else(|| coercion_error(name, value, "boolean"))?
                    }
                    None => false,
                };
                record
                    .fields
                    .insert(name.to_string(), FieldValue::Boolean(flag));
            }
            other => {
                let Some(value) = present(base.fields.get(name)) else {
                    continue;
                };
                let coerced = match other {
                    FieldType::Text => coerce_text(value).map(FieldValue::Text),
                    FieldType::TextList => coerce_text_list(value).map(FieldValue::TextList),
                    FieldType::Number => match coerce_number(value) {
                        Some(Some(n)) => Some(FieldValue::Number(n)),
                        Some(None) => continue,
                        None => None,
                    },
                    _ => None,
                };
                let coerced = coerced.ok_or_else(|| coercion_error(name, value, other.label()))?;
                record.fields.insert(name.to_string(), coerced);
            }
        }
    }

    Ok(record)
}

/// `None` for a missing or `null` value.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `Some(None)` for an empty string, which counts as absent.
fn coerce_number(value: &Value) -> Option<Option<f64>> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.trim().is_empty() => return Some(None),
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(Some(n))
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(true),
            "false" | "" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_text_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn coerce_ids(value: &Value) -> Option<Vec<String>> {
    let ids = coerce_text_list(value)?;
    Some(
        ids.into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
    )
}

fn preview(value: &Value) -> String {
    let raw = value.to_string();
    if raw.chars().count() > RAW_VALUE_PREVIEW {
        let cut: String = raw.chars().take(RAW_VALUE_PREVIEW).collect();
        format!("{}…", cut)
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocaleTag;
    use crate::schema::tests::demo_registry;
    use serde_json::json;

    fn set(table: &str, locale: &str, shared: bool, rows: Vec<(&str, Value)>) -> RawRecordSet {
        let locale = Locale::new(locale);
        let tag = if shared {
            LocaleTag::Shared
        } else {
            LocaleTag::Locale(locale.clone())
        };
        RawRecordSet {
            table: table.to_string(),
            locale,
            records: rows
                .into_iter()
                .map(|(id, fields)| RawRecord {
                    id: id.to_string(),
                    fields: fields.as_object().cloned().unwrap_or_default(),
                    tag: tag.clone(),
                })
                .collect(),
        }
    }

    fn find<'a>(records: &'a [SanitizedRecord], table: &str, id: &str) -> &'a SanitizedRecord {
        records
            .iter()
            .find(|r| r.table == table && r.id == id)
            .unwrap_or_else(|| panic!("{}#{} not found", table, id))
    }

    #[test]
    fn test_localized_field_falls_back() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en", "fr"]);
        let raw = vec![
            set("Product", "en", false, vec![("p1", json!({ "price": 3 }))]),
            set("Product", "fr", false, vec![("p1", json!({ "name": "Stylo", "price": 3 }))]),
        ];

        let outcome = sanitize(&raw, &schema, &chain);
        assert!(outcome.diagnostics.is_empty());
        let en = &outcome.value[&Locale::new("en")];
        let p1 = find(en, "Product", "p1");
        assert_eq!(p1.fields["name"], FieldValue::Text("Stylo".into()));
        assert_eq!(p1.field_locales["name"], Locale::new("fr"));
        assert_eq!(p1.resolved_locale, Locale::new("en"));
        assert_eq!(p1.fields["price"], FieldValue::Number(3.0));
    }

    #[test]
    fn test_fields_fall_back_independently() {
        let chain = LocaleChain::new(["en", "fr"]);
        let mut decls = std::collections::BTreeMap::new();
        decls.insert(
            "Page".to_string(),
            crate::schema::tests::decl(false, &[("title", "localized-text"), ("body", "localized-text")]),
        );
        let schema = crate::schema::SchemaRegistry::from_declarations(&decls)
            .unwrap()
            .get_schema();
        let raw = vec![
            set("Page", "fr", false, vec![("pg", json!({ "title": "Titre", "body": "Corps" }))]),
            set("Page", "en", false, vec![("pg", json!({ "title": "Title", "body": "  " }))]),
        ];
        let outcome = sanitize(&raw, &schema, &chain);
        let en = &outcome.value[&Locale::new("en")];
        let pg = find(en, "Page", "pg");
        assert_eq!(pg.field_locales["title"], Locale::new("en"));
        assert_eq!(pg.field_locales["body"], Locale::new("fr"));
        assert_eq!(pg.fields["body"], FieldValue::Text("Corps".into()));
    }

    #[test]
    fn test_record_only_in_fallback_locale_is_kept() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en", "fr"]);
        let raw = vec![
            set("Product", "en", false, vec![("p1", json!({ "name": "Pen" }))]),
            set("Product", "fr", false, vec![("p2", json!({ "name": "Gomme" }))]),
        ];
        let outcome = sanitize(&raw, &schema, &chain);
        let en = &outcome.value[&Locale::new("en")];
        let ids: Vec<_> = en.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(find(en, "Product", "p2").resolved_locale, Locale::new("fr"));

        let fr = &outcome.value[&Locale::new("fr")];
        let ids: Vec<_> = fr.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p1"]);
    }

    #[test]
    fn test_bad_value_drops_only_that_record() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en"]);
        let raw = vec![set(
            "Product",
            "en",
            false,
            vec![
                ("p1", json!({ "name": "Pen", "price": "cheap" })),
                ("p2", json!({ "name": "Ink", "price": "4.5" })),
            ],
        )];
        let outcome = sanitize(&raw, &schema, &chain);
        let en = &outcome.value[&Locale::new("en")];
        assert_eq!(en.len(), 1);
        assert_eq!(en[0].id, "p2");
        assert_eq!(en[0].fields["price"], FieldValue::Number(4.5));

        assert_eq!(outcome.diagnostics.len(), 1);
        match &outcome.diagnostics[0] {
            Diagnostic::Coercion(e) => {
                assert_eq!(e.id, "p1");
                assert_eq!(e.field, "price");
                assert_eq!(e.raw_value, "\"cheap\"");
                assert_eq!(e.expected, "number");
            }
            other => panic!("unexpected diagnostic {:?}", other),
        }
    }

    #[test]
    fn test_links_kept_pending_in_order() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en"]);
        let raw = vec![set(
            "Customer",
            "en",
            true,
            vec![("c1", json!({ "label": "Acme", "products": ["p9", "p1", "p9"] }))],
        )];
        let outcome = sanitize(&raw, &schema, &chain);
        let c1 = find(&outcome.value[&Locale::new("en")], "Customer", "c1");
        assert_eq!(c1.pending_links["products"], vec!["p9", "p1", "p9"]);
        assert!(!c1.fields.contains_key("products"));
    }

    #[test]
    fn test_missing_values_defaults() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en"]);
        let raw = vec![set("Product", "en", false, vec![("p1", json!({ "price": null }))])];
        let outcome = sanitize(&raw, &schema, &chain);
        let p1 = find(&outcome.value[&Locale::new("en")], "Product", "p1");
        assert_eq!(p1.fields["featured"], FieldValue::Boolean(false));
        assert!(!p1.fields.contains_key("price"));
        assert!(!p1.fields.contains_key("name"));
        assert_eq!(p1.pending_links["customers"], Vec::<String>::new());
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en"]);
        let raw = vec![set(
            "Product",
            "en",
            false,
            vec![("p1", json!({ "name": "First" })), ("p1", json!({ "name": "Second" }))],
        )];
        let outcome = sanitize(&raw, &schema, &chain);
        let en = &outcome.value[&Locale::new("en")];
        assert_eq!(en.len(), 1);
        assert_eq!(en[0].fields["name"], FieldValue::Text("First".into()));
        assert!(matches!(
            outcome.diagnostics[0],
            Diagnostic::DuplicateRecord { .. }
        ));
    }

    #[test]
    fn test_shared_table_has_no_fallback() {
        let schema = demo_registry().get_schema();
        let chain = LocaleChain::new(["en", "fr"]);
        let raw = vec![set("Customer", "fr", true, vec![("c1", json!({ "label": "Acme" }))])];
        let outcome = sanitize(&raw, &schema, &chain);
        assert!(outcome.value[&Locale::new("en")].is_empty());
        assert_eq!(outcome.value[&Locale::new("fr")].len(), 1);
    }
}
