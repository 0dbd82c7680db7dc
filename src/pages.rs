//! Page-builder boundary.
//!
//! Two entry points feed a static site generator:
//!
//! - [`compute_static_paths`] lists the locales to pre-render. They are the
//!   languages the designated customer record declares as available.
//! - [`compute_static_props`] returns everything one localized page needs,
//!   with the serialized snapshot at its center. It either returns a fully
//!   consolidated snapshot or fails. There is no partial result.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use sheetsnap_core::codec;
use sheetsnap_core::locale::{best_country_codes, Locale, LocaleChain};
use sheetsnap_core::{RecordView, Snapshot};

use crate::config::{Config, SiteConfig};
use crate::provider::DatasetProvider;
use crate::translations::{create_translations, TranslationSource, Translations};

/// Collaborators shared by every page computation.
#[derive(Clone)]
pub struct PageContext {
    pub config: Arc<Config>,
    pub translations: Arc<dyn TranslationSource>,
}

impl PageContext {
    pub fn new(config: Arc<Config>, translations: Arc<dyn TranslationSource>) -> Self {
        Self {
            config,
            translations,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            Arc::new(config.clone()),
            create_translations(config)?,
        ))
    }

    fn is_supported(&self, lang: &Locale) -> bool {
        self.config
            .site
            .supported_locales
            .iter()
            .any(|l| l.language() == *lang)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticPath {
    pub locale: Locale,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticProps {
    pub locale: Locale,
    pub has_locale_from_url: bool,
    pub lang: Locale,
    pub best_country_codes: LocaleChain,
    pub serialized_dataset: String,
    pub dataset_fingerprint: String,
    pub resolved_locale: Locale,
    pub customer_ref: Option<String>,
    pub i18n_translations: Translations,
    pub is_static_rendering: bool,
    pub is_ready_to_render: bool,
    pub preview: bool,
    pub preview_data: Option<Value>,
    pub built_at: String,
    pub revalidate: u64,
    pub warnings: Vec<String>,
}

/// The customer record: the one whose ref field matches `customer_ref`, or
/// the first record of the table when no ref is configured.
pub fn find_customer<'a>(
    snapshot: &'a Snapshot,
    site: &SiteConfig,
    customer_ref: Option<&str>,
    locale: &Locale,
) -> Result<RecordView<'a>> {
    let records = snapshot.records(&site.customer_table, locale);
    let found = match customer_ref {
        Some(wanted) => records
            .into_iter()
            .find(|r| r.text(&site.customer_ref_field) == Some(wanted)),
        None => records.into_iter().next(),
    };
    found.ok_or_else(|| match customer_ref {
        Some(wanted) => anyhow!(
            "customer not found: no {} record with {} = '{}'",
            site.customer_table,
            site.customer_ref_field,
            wanted
        ),
        None => anyhow!("customer not found: {} is empty", site.customer_table),
    })
}

pub async fn compute_static_paths(
    ctx: &PageContext,
    provider: &dyn DatasetProvider,
) -> Result<Vec<StaticPath>> {
    let chain = ctx.config.site.languages();
    let outcome = provider.dataset(&chain).await?;
    customer_paths(ctx, &outcome.value)
}

/// One path per language the customer declares, in order, without repeats.
fn customer_paths(ctx: &PageContext, snapshot: &Snapshot) -> Result<Vec<StaticPath>> {
    let site = &ctx.config.site;
    let head = snapshot
        .chain()
        .first()
        .cloned()
        .unwrap_or_else(|| site.default_locale.clone());
    let customer_ref = ctx.config.customer_ref();
    let customer = find_customer(snapshot, site, customer_ref.as_deref(), &head)?;

    let mut paths: Vec<StaticPath> = Vec::new();
    for lang in customer.text_list(&site.available_languages_field) {
        let locale = Locale::new(lang);
        if locale.as_str().is_empty() || paths.iter().any(|p| p.locale == locale) {
            continue;
        }
        paths.push(StaticPath { locale });
    }
    Ok(paths)
}

/// Props for one page. `locale_param` is the locale segment of the URL,
/// if any. `preview_data` is whatever the previewing client attached. It is
/// dropped outside preview. Only the locales [`compute_static_paths`] lists are renderable.
/// Anything else fails with `unsupported locale`.
pub async fn compute_static_props(
    ctx: &PageContext,
    provider: &dyn DatasetProvider,
    locale_param: Option<&str>,
    preview: bool,
    preview_data: Option<Value>,
) -> Result<StaticProps> {
    let site = &ctx.config.site;
    let has_locale_from_url = locale_param.is_some_and(|l| !l.trim().is_empty());
    let locale = match locale_param {
        Some(l) if has_locale_from_url => Locale::new(l),
        _ => site.default_locale.clone(),
    };
    let lang = locale.language();
    if !ctx.is_supported(&lang) || (has_locale_from_url && locale != lang) {
        bail!("unsupported locale: {}", locale);
    }

    let chain = best_country_codes(&lang, &site.supported_locales, &site.default_locale);
    let i18n_translations = ctx
        .translations
        .get_translations(&lang)
        .await
        .with_context(|| {
            format!(
                "Failed to load translations for {} from {}",
                lang,
                ctx.translations.name()
            )
        })?;

    let outcome = provider.dataset(&chain).await?;
    let snapshot = &outcome.value;
    if has_locale_from_url && !customer_paths(ctx, snapshot)?.iter().any(|p| p.locale == locale) {
        bail!("unsupported locale: {}", locale);
    }
    let serialized_dataset = codec::serialize(snapshot).context("Failed to serialize dataset")?;
    let dataset_fingerprint = snapshot
        .fingerprint()
        .context("Failed to fingerprint dataset")?;
    let resolved_locale = snapshot
        .best_locale(&lang)
        .cloned()
        .unwrap_or_else(|| lang.clone());

    let warnings: Vec<String> = outcome.diagnostics.iter().map(|d| d.to_string()).collect();
    info!(
        %locale,
        %resolved_locale,
        preview,
        warnings = warnings.len(),
        "static props computed"
    );

    Ok(StaticProps {
        locale,
        has_locale_from_url,
        lang,
        best_country_codes: chain,
        serialized_dataset,
        dataset_fingerprint,
        resolved_locale,
        customer_ref: ctx.config.customer_ref(),
        i18n_translations,
        is_static_rendering: true,
        is_ready_to_render: true,
        preview,
        preview_data: preview_data.filter(|_| preview),
        built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        revalidate: ctx.config.server.revalidate_secs,
        warnings,
    })
}
