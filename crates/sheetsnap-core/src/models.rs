//! Records as they move through the pipeline.
//!
//! ```text
//! RawRow ──fetch──▶ RawRecord ──sanitize──▶ SanitizedRecord ──resolve──▶ ResolvedRecord
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::locale::Locale;

/// Untyped row as returned by a table source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl RawRow {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// Where a raw record's values belong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocaleTag {
    Shared,
    Locale(Locale),
}

/// Raw record produced by the fetcher. Never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub id: String,
    pub fields: Map<String, Value>,
    pub tag: LocaleTag,
}

/// Every raw record of one (table, locale) request.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecordSet {
    pub table: String,
    /// Locale the request was issued for, shared tables included.
    pub locale: Locale,
    pub records: Vec<RawRecord>,
}

/// Index of a record inside the arena that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordRef(pub(crate) u32);

impl RecordRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        RecordRef(index as u32)
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    TextList(Vec<String>),
    /// Resolved references, in source order.
    Links(Vec<RecordRef>),
}

/// Record after type coercion and locale resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedRecord {
    pub id: String,
    pub table: String,
    /// Locale this record was built for.
    pub locale: Locale,
    /// Locale of the raw variant the record's base fields came from.
    pub resolved_locale: Locale,
    pub fields: BTreeMap<String, FieldValue>,
    /// Locale actually used for each localized field.
    pub field_locales: BTreeMap<String, Locale>,
    /// Foreign-key fields still holding raw ids.
    pub pending_links: BTreeMap<String, Vec<String>>,
}

/// Record whose link fields hold [`RecordRef`]s into its arena.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRecord {
    pub id: String,
    pub table: String,
    pub resolved_locale: Locale,
    pub fields: BTreeMap<String, FieldValue>,
    pub field_locales: BTreeMap<String, Locale>,
}

impl ResolvedRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn links(&self, name: &str) -> &[RecordRef] {
        match self.fields.get(name) {
            Some(FieldValue::Links(refs)) => refs,
            _ => &[],
        }
    }
}
