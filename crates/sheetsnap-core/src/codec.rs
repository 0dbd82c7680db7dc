//! Snapshot codec.
//!
//! A snapshot is written as one JSON document. Nodes are a flat array in
//! arena order, and links are written as `[table, id]` pairs, so cycles and
//! shared targets need no special casing. Decoding runs in two passes. The
//! first allocates a node per `(table, id)`, and the second maps link pairs
//! back to node refs. A record linked from many places therefore decodes to
//! a single node again.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::consolidate::{RecordNode, Snapshot, Variants};
use crate::error::CodecError;
use crate::locale::{Locale, LocaleChain};
use crate::models::{FieldValue, RecordRef, ResolvedRecord};

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    format: u32,
    chain: LocaleChain,
    best_locale: BTreeMap<Locale, Locale>,
    tables: Vec<String>,
    records: Vec<WireNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireNode {
    table: String,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shared: Option<WireRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    locales: BTreeMap<Locale, WireRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    resolved_locale: Locale,
    fields: BTreeMap<String, WireValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    field_locales: BTreeMap<String, Locale>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
enum WireValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    TextList(Vec<String>),
    Links(Vec<(String, String)>),
}

pub fn serialize(snapshot: &Snapshot) -> Result<String, CodecError> {
    let records = snapshot
        .nodes()
        .iter()
        .map(|node| {
            let (shared, locales) = match &node.variants {
                Variants::Shared(record) => (Some(encode_record(snapshot, record)), BTreeMap::new()),
                Variants::Localized(by_locale) => (
                    None,
                    by_locale
                        .iter()
                        .map(|(l, r)| (l.clone(), encode_record(snapshot, r)))
                        .collect(),
                ),
            };
            WireNode {
                table: node.table.clone(),
                id: node.id.clone(),
                shared,
                locales,
            }
        })
        .collect();

    let payload = Payload {
        format: FORMAT_VERSION,
        chain: snapshot.chain().clone(),
        best_locale: snapshot.best_locale_index().clone(),
        tables: snapshot.table_names().map(str::to_string).collect(),
        records,
    };
    Ok(serde_json::to_string(&payload)?)
}

fn encode_record(snapshot: &Snapshot, record: &ResolvedRecord) -> WireRecord {
    let fields = record
        .fields
        .iter()
        .map(|(name, value)| {
            let wire = match value {
                FieldValue::Text(s) => WireValue::Text(s.clone()),
                FieldValue::Number(n) => WireValue::Number(*n),
                FieldValue::Boolean(b) => WireValue::Boolean(*b),
                FieldValue::TextList(items) => WireValue::TextList(items.clone()),
                FieldValue::Links(refs) => WireValue::Links(
                    refs.iter()
                        .map(|r| {
                            let target = snapshot.node(*r);
                            (target.table.clone(), target.id.clone())
                        })
                        .collect(),
                ),
            };
            (name.clone(), wire)
        })
        .collect();

    WireRecord {
        resolved_locale: record.resolved_locale.clone(),
        fields,
        field_locales: record.field_locales.clone(),
    }
}

pub fn deserialize(payload: &str) -> Result<Snapshot, CodecError> {
    let payload: Payload = serde_json::from_str(payload)?;
    if payload.format != FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat(payload.format));
    }

    let known_tables: HashSet<&str> = payload.tables.iter().map(String::as_str).collect();

    // Pass 1: one node per (table, id).
    let mut index: HashMap<(String, String), RecordRef> = HashMap::with_capacity(payload.records.len());
    for (i, node) in payload.records.iter().enumerate() {
        if !known_tables.contains(node.table.as_str()) {
            return Err(CodecError::UnknownTable {
                table: node.table.clone(),
                id: node.id.clone(),
            });
        }
        if index
            .insert((node.table.clone(), node.id.clone()), RecordRef::from_index(i))
            .is_some()
        {
            return Err(CodecError::DuplicateRecord {
                table: node.table.clone(),
                id: node.id.clone(),
            });
        }
    }

    // Pass 2: rebuild records with links mapped to node refs.
    let mut nodes = Vec::with_capacity(payload.records.len());
    for node in payload.records {
        let variants = match (node.shared, node.locales.is_empty()) {
            (Some(record), true) => Variants::Shared(decode_record(&node.table, &node.id, record, &index)?),
            (None, false) => {
                let mut by_locale = BTreeMap::new();
                for (locale, record) in node.locales {
                    if !payload.chain.contains(&locale) {
                        return Err(CodecError::UnknownLocale {
                            table: node.table,
                            id: node.id,
                            locale,
                        });
                    }
                    let record = decode_record(&node.table, &node.id, record, &index)?;
                    by_locale.insert(locale, record);
                }
                Variants::Localized(by_locale)
            }
            _ => {
                return Err(CodecError::EmptyNode {
                    table: node.table,
                    id: node.id,
                })
            }
        };
        nodes.push(RecordNode {
            table: node.table,
            id: node.id,
            variants,
        });
    }

    let tables = payload
        .tables
        .into_iter()
        .map(|name| {
            let refs = nodes
                .iter()
                .enumerate()
                .filter(|(_, n)| n.table == name)
                .map(|(i, _)| RecordRef::from_index(i))
                .collect();
            (name, refs)
        })
        .collect();

    Ok(Snapshot::from_parts(
        payload.chain,
        tables,
        nodes,
        payload.best_locale,
    ))
}

fn decode_record(
    table: &str,
    id: &str,
    record: WireRecord,
    index: &HashMap<(String, String), RecordRef>,
) -> Result<ResolvedRecord, CodecError> {
    let mut fields = BTreeMap::new();
    for (name, wire) in record.fields {
        let value = match wire {
            WireValue::Text(s) => FieldValue::Text(s),
            WireValue::Number(n) => FieldValue::Number(n),
            WireValue::Boolean(b) => FieldValue::Boolean(b),
            WireValue::TextList(items) => FieldValue::TextList(items),
            WireValue::Links(pairs) => {
                let mut refs = Vec::with_capacity(pairs.len());
                for (target_table, target_id) in pairs {
                    match index.get(&(target_table.clone(), target_id.clone())) {
                        Some(r) => refs.push(*r),
                        None => {
                            return Err(CodecError::DanglingReference {
                                table: table.to_string(),
                                id: id.to_string(),
                                field: name,
                                target_table,
                                target_id,
                            })
                        }
                    }
                }
                FieldValue::Links(refs)
            }
        };
        fields.insert(name, value);
    }

    Ok(ResolvedRecord {
        id: id.to_string(),
        table: table.to_string(),
        resolved_locale: record.resolved_locale,
        fields,
        field_locales: record.field_locales,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::fetch_dataset;
    use crate::pipeline::consolidate_raw;
    use crate::schema::tests::demo_registry;
    use crate::source::memory::MemorySource;
    use futures::executor::block_on;
    use serde_json::json;

    fn demo_snapshot() -> Snapshot {
        let schema = demo_registry().get_schema();
        let mut source = MemorySource::new();
        source
            .insert_shared(
                "Customer",
                "c1",
                json!({ "label": "Acme", "availableLanguages": ["en", "fr"], "products": ["p1", "p2"] }),
            )
            .insert("Product", "en", "p1", json!({ "name": "Pen", "price": 2.5, "featured": true, "customers": ["c1"], "related": ["p2"] }))
            .insert("Product", "fr", "p1", json!({ "name": "Stylo", "price": 2.5, "featured": true, "customers": ["c1"], "related": ["p2"] }))
            .insert("Product", "fr", "p2", json!({ "name": "Gomme", "price": 0.1, "related": ["p1"] }));
        let chain = LocaleChain::new(["en", "fr"]);
        let raw = block_on(fetch_dataset(&schema, &chain, &source, 4)).unwrap();
        consolidate_raw(&schema, &raw, &chain).unwrap().value
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let snapshot = demo_snapshot();
        let payload = serialize(&snapshot).unwrap();
        let decoded = deserialize(&payload).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(serialize(&decoded).unwrap(), payload);
    }

    #[test]
    fn test_round_trip_keeps_every_float_bit() {
        let schema = demo_registry().get_schema();
        let prices: [f64; 4] = [1.0715660391465826e-75, 0.1 + 0.2, 2.2250738585072014e-308, 1.7976931348623157e308];
        let mut source = MemorySource::new();
        for (i, price) in prices.iter().enumerate() {
            source.insert("Product", "en", &format!("p{}", i), json!({ "price": price }));
        }
        let chain = LocaleChain::new(["en"]);
        let raw = block_on(fetch_dataset(&schema, &chain, &source, 4)).unwrap();
        let snapshot = consolidate_raw(&schema, &raw, &chain).unwrap().value;

        let decoded = deserialize(&serialize(&snapshot).unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        for (i, price) in prices.iter().enumerate() {
            let record = decoded
                .get_record("Product", &format!("p{}", i), &Locale::new("en"))
                .unwrap();
            assert_eq!(record.number("price").map(f64::to_bits), Some(price.to_bits()));
        }
    }

    #[test]
    fn test_shared_target_decodes_to_one_node() {
        let decoded = deserialize(&serialize(&demo_snapshot()).unwrap()).unwrap();
        let c1 = decoded.find("Customer", "c1").unwrap();
        for locale in ["en", "fr"] {
            let p1 = decoded.get_record("Product", "p1", &Locale::new(locale)).unwrap();
            assert_eq!(p1.links("customers")[0].node_ref(), c1);
        }
    }

    #[test]
    fn test_cycle_survives_round_trip() {
        let decoded = deserialize(&serialize(&demo_snapshot()).unwrap()).unwrap();
        let p1 = decoded.get_record("Product", "p1", &Locale::new("fr")).unwrap();
        let p2 = &p1.links("related")[0];
        assert_eq!(p2.id(), "p2");
        assert_eq!(p2.links("related")[0].node_ref(), p1.node_ref());
    }

    fn payload_with(records: serde_json::Value) -> String {
        json!({
            "format": 1,
            "chain": ["en"],
            "best_locale": { "en": "en" },
            "tables": ["Product"],
            "records": records,
        })
        .to_string()
    }

    fn product(id: &str, related: &[&str]) -> serde_json::Value {
        let links: Vec<_> = related.iter().map(|r| json!(["Product", r])).collect();
        json!({
            "table": "Product",
            "id": id,
            "locales": {
                "en": {
                    "resolved_locale": "en",
                    "fields": { "related": { "type": "links", "value": links } }
                }
            }
        })
    }

    #[test]
    fn test_rejects_dangling_reference() {
        let payload = payload_with(json!([product("p1", &["p404"])]));
        match deserialize(&payload) {
            Err(CodecError::DanglingReference { target_id, field, .. }) => {
                assert_eq!(target_id, "p404");
                assert_eq!(field, "related");
            }
            other => panic!("expected dangling reference, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_record() {
        let payload = payload_with(json!([product("p1", &[]), product("p1", &[])]));
        assert!(matches!(
            deserialize(&payload),
            Err(CodecError::DuplicateRecord { id, .. }) if id == "p1"
        ));
    }

    #[test]
    fn test_rejects_unknown_format_and_garbage() {
        let payload = json!({
            "format": 7, "chain": [], "best_locale": {}, "tables": [], "records": []
        })
        .to_string();
        assert!(matches!(
            deserialize(&payload),
            Err(CodecError::UnsupportedFormat(7))
        ));
        assert!(matches!(deserialize("{not json"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_rejects_variant_outside_chain() {
        let mut node = product("p1", &[]);
        node["locales"]["de"] = node["locales"]["en"].clone();
        let payload = payload_with(json!([node]));
        assert!(matches!(
            deserialize(&payload),
            Err(CodecError::UnknownLocale { locale, .. }) if locale == Locale::new("de")
        ));
    }

    #[test]
    fn test_rejects_empty_node() {
        let payload = payload_with(json!([{ "table": "Product", "id": "p1" }]));
        assert!(matches!(
            deserialize(&payload),
            Err(CodecError::EmptyNode { .. })
        ));
    }
}
