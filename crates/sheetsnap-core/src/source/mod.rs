//! Table data source abstraction.
//!
//! The [`TableSource`] trait is the only dependency of the raw fetcher. It
//! lists the rows of one table for one locale. Implementations must be
//! `Send + Sync` so one source can serve many concurrent requests.
//!
//! Rows may carry arbitrary or missing fields. The sanitizer decides what
//! is usable.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::locale::Locale;
use crate::models::RawRow;

/// An external table store (Airtable base, JSON export, test fixture).
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use sheetsnap_core::locale::Locale;
/// use sheetsnap_core::models::RawRow;
/// use sheetsnap_core::source::TableSource;
///
/// struct EmptySource;
///
/// #[async_trait]
/// impl TableSource for EmptySource {
///     fn name(&self) -> &str { "empty" }
///
///     async fn list_records(&self, _table: &str, _locale: &Locale) -> Result<Vec<RawRow>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait TableSource: Send + Sync {
    /// Short label used in logs and `snap sources`.
    fn name(&self) -> &str;

    /// All rows of `table` as seen from `locale`.
    async fn list_records(&self, table: &str, locale: &Locale) -> Result<Vec<RawRow>>;
}
