//! Error taxonomy and non-fatal diagnostics.
//!
//! Fatal errors (`ConfigError`, `FetchFailure`, `ConsistencyError`,
//! `CodecError`) abort a build. Per-record problems are [`Diagnostic`]s
//! carried next to a still-usable value in an [`Outcome`].

use std::fmt;

use thiserror::Error;

use crate::locale::Locale;

/// Bad schema declaration. Raised before any fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("schema declares no tables")]
    EmptySchema,

    #[error("unknown field type '{type_tag}' for {table}.{field}")]
    UnknownFieldType {
        table: String,
        field: String,
        type_tag: String,
    },

    #[error("{table}.{field} links to undeclared table '{target}'")]
    UnknownLinkTarget {
        table: String,
        field: String,
        target: String,
    },

    #[error("shared table '{table}' cannot declare localized field '{field}'")]
    LocalizedFieldInSharedTable { table: String, field: String },

    #[error("invalid table name '{0}'")]
    InvalidTableName(String),
}

/// One failed (table, locale) request.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("fetch {table} [{locale}] failed: {cause}")]
pub struct FetchError {
    pub table: String,
    pub locale: Locale,
    pub cause: String,
}

/// Aggregate of every failed pair of a fetch stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub failures: Vec<FetchError>,
    pub attempted: usize,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} table fetches failed",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

/// A raw value that could not be coerced to its declared type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{table}#{id} [{locale}] field '{field}': expected {expected}, got {raw_value}")]
pub struct TypeCoercionError {
    pub table: String,
    pub id: String,
    pub locale: Locale,
    pub field: String,
    pub raw_value: String,
    pub expected: &'static str,
}

/// Shared table copies disagree between locales.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConsistencyError {
    #[error("shared table {table}#{id}: field '{field}' differs between [{authoritative}] and [{other}]")]
    FieldMismatch {
        table: String,
        id: String,
        field: String,
        authoritative: Locale,
        other: Locale,
    },

    #[error("shared table {table}#{id} exists in [{authoritative}] but not in [{other}]")]
    MissingRecord {
        table: String,
        id: String,
        authoritative: Locale,
        other: Locale,
    },

    #[error("shared table {table}#{id} exists in [{other}] but not in [{authoritative}]")]
    ExtraRecord {
        table: String,
        id: String,
        authoritative: Locale,
        other: Locale,
    },
}

/// Malformed serialized snapshot.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed snapshot payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported snapshot format {0}")]
    UnsupportedFormat(u32),

    #[error("duplicate record {table}#{id} in payload")]
    DuplicateRecord { table: String, id: String },

    #[error("record {table}#{id} field '{field}' references missing record {target_table}#{target_id}")]
    DanglingReference {
        table: String,
        id: String,
        field: String,
        target_table: String,
        target_id: String,
    },

    #[error("record {table}#{id} belongs to undeclared table")]
    UnknownTable { table: String, id: String },

    #[error("record {table}#{id} has a variant for locale '{locale}' outside the chain")]
    UnknownLocale {
        table: String,
        id: String,
        locale: Locale,
    },

    #[error("record {table}#{id} has no variants")]
    EmptyNode { table: String, id: String },
}

/// Any fatal failure of a build.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("fallback chain is empty")]
    EmptyChain,
}

/// A non-fatal problem found while building a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Coercion(TypeCoercionError),
    DanglingReference {
        table: String,
        id: String,
        locale: Locale,
        field: String,
        target: String,
    },
    AmbiguousReference {
        table: String,
        id: String,
        locale: Locale,
        field: String,
        target: String,
        candidates: Vec<String>,
    },
    DuplicateRecord {
        table: String,
        id: String,
        locale: Locale,
    },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Coercion(e) => write!(f, "dropped record: {}", e),
            Diagnostic::DanglingReference {
                table,
                id,
                locale,
                field,
                target,
            } => write!(
                f,
                "{}#{} [{}] field '{}' references missing record '{}'",
                table, id, locale, field, target
            ),
            Diagnostic::AmbiguousReference {
                table,
                id,
                locale,
                field,
                target,
                candidates,
            } => write!(
                f,
                "{}#{} [{}] field '{}': id '{}' exists in tables {}, using {}",
                table,
                id,
                locale,
                field,
                target,
                candidates.join(", "),
                candidates.first().map(String::as_str).unwrap_or("none")
            ),
            Diagnostic::DuplicateRecord { table, id, locale } => {
                write!(f, "{}#{} [{}] fetched twice, keeping first", table, id, locale)
            }
        }
    }
}

/// A value together with the non-fatal diagnostics produced while computing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, diagnostics: Vec<Diagnostic>) -> Self {
        Self { value, diagnostics }
    }

    pub fn clean(value: T) -> Self {
        Self::new(value, Vec::new())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            diagnostics: self.diagnostics,
        }
    }

    /// Prepend diagnostics from an earlier stage.
    pub fn merge_diagnostics(mut self, earlier: Vec<Diagnostic>) -> Self {
        let mut all = earlier;
        all.append(&mut self.diagnostics);
        self.diagnostics = all;
        self
    }

    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}
