//! Table schemas known at build time.
//!
//! Each table declares its fields with a type tag and whether the whole
//! table is shared (identical across locales) or localized.
//!
//! # Type tags
//!
//! | Tag | Meaning |
//! |-----|---------|
//! | `text` | plain string |
//! | `localized-text` | string resolved through the fallback chain |
//! | `number` | finite `f64` |
//! | `boolean` | checkbox (missing means `false`) |
//! | `text-list` | multi-select, list of strings |
//! | `links` / `links:<Table>` | list of record ids, optionally bound to a table |

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    LocalizedText,
    Number,
    Boolean,
    TextList,
    Links { target: Option<String> },
}

impl FieldType {
    pub fn is_localized(&self) -> bool {
        matches!(self, FieldType::LocalizedText)
    }

    pub fn is_links(&self) -> bool {
        matches!(self, FieldType::Links { .. })
    }

    /// Human-readable name, used in coercion errors.
    pub fn label(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::LocalizedText => "localized-text",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::TextList => "text-list",
            FieldType::Links { .. } => "links",
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim();
        match tag {
            "text" => Ok(FieldType::Text),
            "localized-text" => Ok(FieldType::LocalizedText),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "text-list" => Ok(FieldType::TextList),
            "links" => Ok(FieldType::Links { target: None }),
            _ => match tag.strip_prefix("links:") {
                Some(target) if !target.trim().is_empty() => Ok(FieldType::Links {
                    target: Some(target.trim().to_string()),
                }),
                _ => Err(tag.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn is_localized(&self) -> bool {
        self.field_type.is_localized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub shared: bool,
    pub fields: Vec<FieldDescriptor>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn link_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.field_type.is_links())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    tables: Vec<TableSchema>,
}

impl Schema {
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }

    pub fn is_shared(&self, table: &str) -> bool {
        self.table(table).map(|t| t.shared).unwrap_or(false)
    }

    pub fn has_localized_tables(&self) -> bool {
        self.tables.iter().any(|t| !t.shared)
    }
}

/// A table as declared in configuration, before type tags are parsed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableDeclaration {
    #[serde(default)]
    pub shared: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// Owns the validated [`Schema`] for the lifetime of a build.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Arc<Schema>,
}

impl SchemaRegistry {
    pub fn from_declarations(
        declarations: &BTreeMap<String, TableDeclaration>,
    ) -> Result<Self, ConfigError> {
        if declarations.is_empty() {
            return Err(ConfigError::EmptySchema);
        }

        let mut tables = Vec::with_capacity(declarations.len());
        for (table_name, decl) in declarations {
            if table_name.trim().is_empty() || table_name.contains('/') {
                return Err(ConfigError::InvalidTableName(table_name.clone()));
            }

            let mut fields = Vec::with_capacity(decl.fields.len());
            for (field_name, tag) in &decl.fields {
                let field_type =
                    tag.parse::<FieldType>()
                        .map_err(|type_tag| ConfigError::UnknownFieldType {
                            table: table_name.clone(),
                            field: field_name.clone(),
                            type_tag,
                        })?;

                if decl.shared && field_type.is_localized() {
                    return Err(ConfigError::LocalizedFieldInSharedTable {
                        table: table_name.clone(),
                        field: field_name.clone(),
                    });
                }

                if let FieldType::Links {
                    target: Some(target),
                } = &field_type
                {
                    if !declarations.contains_key(target) {
                        return Err(ConfigError::UnknownLinkTarget {
                            table: table_name.clone(),
                            field: field_name.clone(),
                            target: target.clone(),
                        });
                    }
                }

                fields.push(FieldDescriptor {
                    name: field_name.clone(),
                    field_type,
                });
            }

            tables.push(TableSchema {
                name: table_name.clone(),
                shared: decl.shared,
                fields,
            });
        }

        Ok(Self {
            schema: Arc::new(Schema { tables }),
        })
    }

    /// The validated schema. Same instance on every call.
    pub fn get_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }
}
