//! Consolidator and the immutable [`Snapshot`] it produces.
//!
//! The snapshot is an arena of [`RecordNode`]s, one per unique
//! `(table, id)`. A node is either shared (one locale-free copy) or holds
//! one [`ResolvedRecord`] per locale. Link fields point at nodes, not at a
//! particular locale's copy. A reader dereferences them in its own locale
//! through the fallback chain, so a localized page never reaches another
//! locale's data except by fallback.
//!
//! Consolidation is a pure function of its inputs. The snapshot holds no
//! timestamps, no randomness and no interior mutability, and any number of
//! readers can share it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::codec;
use crate::error::{CodecError, ConsistencyError};
use crate::locale::{Locale, LocaleChain};
use crate::models::{FieldValue, RecordRef, ResolvedRecord};
use crate::resolve::ResolvedSet;
use crate::schema::{FieldType, Schema};

#[derive(Debug, Clone, PartialEq)]
pub enum Variants {
    Shared(ResolvedRecord),
    Localized(BTreeMap<Locale, ResolvedRecord>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordNode {
    pub table: String,
    pub id: String,
    pub variants: Variants,
}

impl RecordNode {
    pub fn is_shared(&self) -> bool {
        matches!(self.variants, Variants::Shared(_))
    }

    /// The first variant found walking `order`. Shared nodes ignore it.
    pub fn variant_for(&self, order: &[Locale]) -> Option<&ResolvedRecord> {
        match &self.variants {
            Variants::Shared(record) => Some(record),
            Variants::Localized(by_locale) => order.iter().find_map(|l| by_locale.get(l)),
        }
    }

    pub(crate) fn records_mut(&mut self) -> Vec<(Option<&Locale>, &mut ResolvedRecord)> {
        match &mut self.variants {
            Variants::Shared(record) => vec![(None, record)],
            Variants::Localized(by_locale) => {
                by_locale.iter_mut().map(|(l, r)| (Some(l), r)).collect()
            }
        }
    }
}

/// The complete, consolidated dataset of one build.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    chain: LocaleChain,
    tables: Vec<(String, Vec<RecordRef>)>,
    nodes: Vec<RecordNode>,
    best_locale: BTreeMap<Locale, Locale>,
    index: HashMap<(String, String), RecordRef>,
}

impl Snapshot {
    pub(crate) fn from_parts(
        chain: LocaleChain,
        tables: Vec<(String, Vec<RecordRef>)>,
        nodes: Vec<RecordNode>,
        best_locale: BTreeMap<Locale, Locale>,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| ((n.table.clone(), n.id.clone()), RecordRef::from_index(i)))
            .collect();
        Self {
            chain,
            tables,
            nodes,
            best_locale,
            index,
        }
    }

    pub fn chain(&self) -> &LocaleChain {
        &self.chain
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|(name, _)| name.as_str())
    }

    pub(crate) fn tables(&self) -> &[(String, Vec<RecordRef>)] {
        &self.tables
    }

    pub fn nodes(&self) -> &[RecordNode] {
        &self.nodes
    }

    pub fn node(&self, r: RecordRef) -> &RecordNode {
        &self.nodes[r.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn best_locale_index(&self) -> &BTreeMap<Locale, Locale> {
        &self.best_locale
    }

    /// The locale that will actually serve `requested`.
    pub fn best_locale(&self, requested: &Locale) -> Option<&Locale> {
        let nearest = self.chain.nearest(requested)?;
        self.best_locale.get(nearest).or(Some(nearest))
    }

    /// Lookup order for `requested`, starting from its nearest chain member.
    pub fn lookup_order(&self, requested: &Locale) -> Vec<Locale> {
        match self.chain.nearest(requested) {
            Some(nearest) => self.chain.for_locale(nearest),
            None => vec![requested.clone()],
        }
    }

    pub fn find(&self, table: &str, id: &str) -> Option<RecordRef> {
        self.index
            .get(&(table.to_string(), id.to_string()))
            .copied()
    }

    /// One record as seen from `requested`, walking the fallback chain.
    pub fn get_record(&self, table: &str, id: &str, requested: &Locale) -> Option<RecordView<'_>> {
        let r = self.find(table, id)?;
        self.view(r, &Arc::from(self.lookup_order(requested)))
    }

    /// All records of `table` in source order, as seen from `requested`.
    pub fn records(&self, table: &str, requested: &Locale) -> Vec<RecordView<'_>> {
        let order: Arc<[Locale]> = Arc::from(self.lookup_order(requested));
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, refs)| refs.iter().filter_map(|r| self.view(*r, &order)).collect())
            .unwrap_or_default()
    }

    fn view(&self, r: RecordRef, order: &Arc<[Locale]>) -> Option<RecordView<'_>> {
        let node = self.nodes.get(r.index())?;
        let record = node.variant_for(order)?;
        Some(RecordView {
            snapshot: self,
            node: r,
            record,
            order: Arc::clone(order),
        })
    }

    /// SHA-256 of the canonical serialization. Equal snapshots share it.
    pub fn fingerprint(&self) -> Result<String, CodecError> {
        let payload = codec::serialize(self)?;
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// A record read through a requested locale.
#[derive(Debug, Clone)]
pub struct RecordView<'a> {
    snapshot: &'a Snapshot,
    node: RecordRef,
    record: &'a ResolvedRecord,
    order: Arc<[Locale]>,
}

impl<'a> RecordView<'a> {
    pub fn id(&self) -> &'a str {
        &self.record.id
    }

    pub fn table(&self) -> &'a str {
        &self.record.table
    }

    pub fn node_ref(&self) -> RecordRef {
        self.node
    }

    pub fn is_shared(&self) -> bool {
        self.snapshot.node(self.node).is_shared()
    }

    /// Locale of the variant serving this view.
    pub fn resolved_locale(&self) -> &'a Locale {
        &self.record.resolved_locale
    }

    /// Locale a localized field's value came from.
    pub fn field_locale(&self, name: &str) -> Option<&'a Locale> {
        self.record.field_locales.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&'a str> {
        match self.record.fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        match self.record.fields.get(name) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.record.fields.get(name) {
            Some(FieldValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn text_list(&self, name: &str) -> &'a [String] {
        match self.record.fields.get(name) {
            Some(FieldValue::TextList(items)) => items,
            _ => &[],
        }
    }

    /// Linked records, in source order, read through the same locale.
    pub fn links(&self, name: &str) -> Vec<RecordView<'a>> {
        self.record
            .links(name)
            .iter()
            .filter_map(|r| self.snapshot.view(*r, &self.order))
            .collect()
    }

    /// Flat JSON rendering. Links appear as `{ table, id }` pairs.
    pub fn to_json(&self) -> Value {
        let mut fields = Map::new();
        for (name, value) in &self.record.fields {
            let rendered = match value {
                FieldValue::Text(s) => json!(s),
                FieldValue::Number(n) => json!(n),
                FieldValue::Boolean(b) => json!(b),
                FieldValue::TextList(items) => json!(items),
                FieldValue::Links(refs) => Value::Array(
                    refs.iter()
                        .map(|r| {
                            let node = self.snapshot.node(*r);
                            json!({ "table": node.table, "id": node.id })
                        })
                        .collect(),
                ),
            };
            fields.insert(name.clone(), rendered);
        }
        json!({
            "table": self.record.table,
            "id": self.record.id,
            "resolvedLocale": self.record.resolved_locale,
            "fieldLocales": self.record.field_locales,
            "fields": fields,
        })
    }
}

/// Merge per-locale resolved sets into one snapshot.
///
/// Locales are visited in chain order, then any extra locales in sorted
/// order. For shared tables the first visited locale is authoritative and
/// every other copy must match it exactly.
pub fn consolidate(
    schema: &Schema,
    resolved: BTreeMap<Locale, ResolvedSet>,
    chain: &LocaleChain,
) -> Result<Snapshot, ConsistencyError> {
    let mut order: Vec<&Locale> = chain
        .locales()
        .iter()
        .filter(|l| resolved.contains_key(*l))
        .collect();
    order.extend(resolved.keys().filter(|l| !chain.contains(l)));

    let mut nodes: Vec<RecordNode> = Vec::new();
    let mut node_index: HashMap<(String, String), RecordRef> = HashMap::new();
    let mut shared_links: HashMap<RecordRef, BTreeMap<String, Vec<String>>> = HashMap::new();
    let mut tables = Vec::with_capacity(schema.tables().len());

    for table in schema.tables() {
        let mut refs = Vec::new();

        if table.shared {
            if let Some((authoritative, rest)) = order.split_first() {
                let first_set = &resolved[*authoritative];
                for other in rest {
                    check_shared_table(&table.name, first_set, &resolved[*other])?;
                }
                for (pos, record) in first_set
                    .records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.table == table.name)
                {
                    let r = RecordRef::from_index(nodes.len());
                    node_index.insert((record.table.clone(), record.id.clone()), r);
                    if let Some(ids) = first_set.shared_link_ids.get(&RecordRef::from_index(pos)) {
                        shared_links.insert(r, ids.clone());
                    }
                    nodes.push(RecordNode {
                        table: record.table.clone(),
                        id: record.id.clone(),
                        variants: Variants::Shared(record.clone()),
                    });
                    refs.push(r);
                }
            }
        } else {
            for locale in &order {
                for record in resolved[*locale]
                    .records
                    .iter()
                    .filter(|r| r.table == table.name)
                {
                    let key = (record.table.clone(), record.id.clone());
                    let r = *node_index.entry(key).or_insert_with(|| {
                        let r = RecordRef::from_index(nodes.len());
                        nodes.push(RecordNode {
                            table: record.table.clone(),
                            id: record.id.clone(),
                            variants: Variants::Localized(BTreeMap::new()),
                        });
                        refs.push(r);
                        r
                    });
                    if let Variants::Localized(by_locale) = &mut nodes[r.index()].variants {
                        by_locale.insert((*locale).clone(), record.clone());
                    }
                }
            }
        }

        tables.push((table.name.clone(), refs));
    }

    // Re-point links to snapshot nodes. Localized variants map through
    // their own locale's arena. Shared records map their raw ids against
    // every node, so a target missing from one locale's arena is still
    // reachable through the fallback chain.
    for (index, node) in nodes.iter_mut().enumerate() {
        let node_ref = RecordRef::from_index(index);
        for (locale, record) in node.records_mut() {
            match locale {
                Some(l) => {
                    let Some(source_set) = resolved.get(l) else {
                        continue;
                    };
                    for value in record.fields.values_mut() {
                        if let FieldValue::Links(refs) = value {
                            *refs = refs
                                .iter()
                                .filter_map(|r| {
                                    let target = source_set.get(*r);
                                    node_index
                                        .get(&(target.table.clone(), target.id.clone()))
                                        .copied()
                                })
                                .collect();
                        }
                    }
                }
                None => {
                    let Some(ids_by_field) = shared_links.get(&node_ref) else {
                        continue;
                    };
                    for (field, ids) in ids_by_field {
                        let refs: Vec<RecordRef> = ids
                            .iter()
                            .filter_map(|id| {
                                link_target(schema, &record.table, field, id, |t, i| {
                                    node_index.get(&(t.to_string(), i.to_string())).copied()
                                })
                            })
                            .collect();
                        record.fields.insert(field.clone(), FieldValue::Links(refs));
                    }
                }
            }
        }
    }

    // Locales that supplied data of their own: the base of some localized
    // variant, or the source of one of its localized fields.
    let own_data: BTreeSet<&Locale> = nodes
        .iter()
        .filter_map(|n| match &n.variants {
            Variants::Localized(by_locale) => Some(by_locale.values()),
            Variants::Shared(_) => None,
        })
        .flatten()
        .flat_map(|r| std::iter::once(&r.resolved_locale).chain(r.field_locales.values()))
        .collect();

    let best_locale = chain
        .locales()
        .iter()
        .map(|l| {
            let best = chain
                .for_locale(l)
                .into_iter()
                .find(|c| own_data.contains(c))
                .unwrap_or_else(|| l.clone());
            (l.clone(), best)
        })
        .collect();

    info!(
        nodes = nodes.len(),
        tables = tables.len(),
        locales = order.len(),
        "consolidated snapshot"
    );

    Ok(Snapshot::from_parts(chain.clone(), tables, nodes, best_locale))
}

/// Every copy of a shared table must equal the authoritative one, with
/// links compared by target key.
fn check_shared_table(
    table: &str,
    authoritative: &ResolvedSet,
    other: &ResolvedSet,
) -> Result<(), ConsistencyError> {
    let other_by_id: HashMap<&str, (RecordRef, &ResolvedRecord)> = other
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.table == table)
        .map(|(i, r)| (r.id.as_str(), (RecordRef::from_index(i), r)))
        .collect();

    let mut seen = BTreeSet::new();
    for (pos, record) in authoritative
        .records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.table == table)
    {
        seen.insert(record.id.as_str());
        let Some(&(copy_ref, copy)) = other_by_id.get(record.id.as_str()) else {
            return Err(ConsistencyError::MissingRecord {
                table: table.to_string(),
                id: record.id.clone(),
                authoritative: authoritative.locale.clone(),
                other: other.locale.clone(),
            });
        };

        let record_ref = RecordRef::from_index(pos);
        let names: BTreeSet<&String> = record.fields.keys().chain(copy.fields.keys()).collect();
        for name in names {
            let same = match (record.fields.get(name), copy.fields.get(name)) {
                (Some(FieldValue::Links(_)), Some(FieldValue::Links(_))) => {
                    raw_link_ids(authoritative, record_ref, name) == raw_link_ids(other, copy_ref, name)
                }
                (a, b) => a == b,
            };
            if !same {
                return Err(ConsistencyError::FieldMismatch {
                    table: table.to_string(),
                    id: record.id.clone(),
                    field: name.clone(),
                    authoritative: authoritative.locale.clone(),
                    other: other.locale.clone(),
                });
            }
        }
    }

    if let Some(extra) = other
        .records
        .iter()
        .find(|r| r.table == table && !seen.contains(r.id.as_str()))
    {
        return Err(ConsistencyError::ExtraRecord {
            table: table.to_string(),
            id: extra.id.clone(),
            authoritative: authoritative.locale.clone(),
            other: other.locale.clone(),
        });
    }

    Ok(())
}

fn raw_link_ids<'a>(set: &'a ResolvedSet, r: RecordRef, field: &str) -> &'a [String] {
    set.shared_link_ids
        .get(&r)
        .and_then(|by_field| by_field.get(field))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Node a raw link id points at, looked up through `lookup(table, id)`.
/// Untargeted links take the first declared table holding the id.
pub(crate) fn link_target(
    schema: &Schema,
    table: &str,
    field: &str,
    id: &str,
    lookup: impl Fn(&str, &str) -> Option<RecordRef>,
) -> Option<RecordRef> {
    let target = schema
        .table(table)
        .and_then(|t| t.field(field))
        .and_then(|f| match &f.field_type {
            FieldType::Links { target } => target.clone(),
            _ => None,
        });
    match target {
        Some(t) => lookup(&t, id),
        None => schema.tables().iter().find_map(|t| lookup(&t.name, id)),
    }
}
