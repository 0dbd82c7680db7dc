//! Cross-reference resolver.
//!
//! Turns the pending id lists of one locale's sanitized records into
//! [`RecordRef`]s into a shared arena. The index over every table is built
//! first. Then each link field is rewritten in a single pass, keeping the
//! source order. There is no graph walk, so cyclic links are harmless.
//!
//! Ids that point nowhere are dropped and reported. The external source
//! does not guarantee referential integrity.

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::error::{Diagnostic, Outcome};
use crate::locale::Locale;
use crate::models::{FieldValue, RecordRef, ResolvedRecord, SanitizedRecord};
use crate::schema::{FieldType, Schema};

/// All resolved records of one locale. Links index into `records`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSet {
    pub locale: Locale,
    pub records: Vec<ResolvedRecord>,
    /// Raw link ids of shared-table records, by field. Every locale fetches
    /// the same shared rows, so these agree across locales even when a
    /// target was dropped in one locale only.
    pub shared_link_ids: HashMap<RecordRef, BTreeMap<String, Vec<String>>>,
}

impl ResolvedSet {
    pub fn get(&self, r: RecordRef) -> &ResolvedRecord {
        &self.records[r.index()]
    }

    pub fn find(&self, table: &str, id: &str) -> Option<RecordRef> {
        self.records
            .iter()
            .position(|rec| rec.table == table && rec.id == id)
            .map(RecordRef::from_index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn resolve(
    locale: &Locale,
    records: Vec<SanitizedRecord>,
    schema: &Schema,
) -> Outcome<ResolvedSet> {
    let mut by_key: HashMap<(String, String), RecordRef> = HashMap::with_capacity(records.len());
    let mut by_id: HashMap<String, Vec<(String, RecordRef)>> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        let r = RecordRef::from_index(index);
        by_key
            .entry((record.table.clone(), record.id.clone()))
            .or_insert(r);
        by_id
            .entry(record.id.clone())
            .or_default()
            .push((record.table.clone(), r));
    }

    let mut diagnostics = Vec::new();
    let mut resolved = Vec::with_capacity(records.len());
    let mut shared_link_ids = HashMap::new();

    for (index, record) in records.into_iter().enumerate() {
        let SanitizedRecord {
            id,
            table,
            resolved_locale,
            mut fields,
            field_locales,
            pending_links,
            ..
        } = record;

        if schema.table(&table).is_some_and(|t| t.shared) {
            shared_link_ids.insert(RecordRef::from_index(index), pending_links.clone());
        }

        for (field, ids) in pending_links {
            let target_table = schema
                .table(&table)
                .and_then(|t| t.field(&field))
                .and_then(|f| match &f.field_type {
                    FieldType::Links { target } => target.clone(),
                    _ => None,
                });

            let mut refs = Vec::with_capacity(ids.len());
            for target in ids {
                let found = match &target_table {
                    Some(t) => by_key.get(&(t.clone(), target.clone())).copied(),
                    None => match by_id.get(&target) {
                        Some(candidates) if candidates.len() == 1 => Some(candidates[0].1),
                        Some(candidates) if !candidates.is_empty() => {
                            diagnostics.push(Diagnostic::AmbiguousReference {
                                table: table.clone(),
                                id: id.clone(),
                                locale: locale.clone(),
                                field: field.clone(),
                                target: target.clone(),
                                candidates: candidates.iter().map(|(t, _)| t.clone()).collect(),
                            });
                            Some(candidates[0].1)
                        }
                        _ => None,
                    },
                };

                match found {
                    Some(r) => refs.push(r),
                    None => {
                        warn!(
                            %locale,
                            table = table.as_str(),
                            id = id.as_str(),
                            field = field.as_str(),
                            target = target.as_str(),
                            "dropping dangling reference"
                        );
                        diagnostics.push(Diagnostic::DanglingReference {
                            table: table.clone(),
                            id: id.clone(),
                            locale: locale.clone(),
                            field: field.clone(),
                            target,
                        });
                    }
                }
            }
            fields.insert(field, FieldValue::Links(refs));
        }

        resolved.push(ResolvedRecord {
            id,
            table,
            resolved_locale,
            fields,
            field_locales,
        });
    }

    Outcome::new(
        ResolvedSet {
            locale: locale.clone(),
            records: resolved,
            shared_link_ids,
        },
        diagnostics,
    )
}
