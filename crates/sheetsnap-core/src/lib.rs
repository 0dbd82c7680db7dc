//! # sheetsnap core
//!
//! Runtime-agnostic logic for sheetsnap: the schema registry, the raw
//! fetcher (over an abstract [`source::TableSource`]), the sanitizer, the
//! cross-reference resolver, the consolidator and the snapshot codec.
//!
//! This crate contains no tokio, HTTP client or filesystem I/O. Concrete
//! table sources live in the `sheetsnap` crate.
//!
//! ```text
//! SchemaRegistry → fetch → sanitize → resolve (per locale) → consolidate → codec
//! ```

pub mod codec;
pub mod consolidate;
pub mod error;
pub mod fetch;
pub mod locale;
pub mod models;
pub mod pipeline;
pub mod resolve;
pub mod sanitize;
pub mod schema;
pub mod source;

pub use consolidate::{RecordView, Snapshot};
pub use error::{Diagnostic, Outcome, PipelineError};
pub use locale::{Locale, LocaleChain};
pub use schema::{Schema, SchemaRegistry};
