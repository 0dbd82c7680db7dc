//! Locales and fallback chains.
//!
//! A [`LocaleChain`] is the ordered list of locales a build knows about. It
//! doubles as the fallback order: when a value is missing for the requested
//! locale, the remaining locales are tried in chain order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A locale code such as `en` or `fr-FR`, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The language part of the locale (`fr-fr` → `fr`).
    pub fn language(&self) -> Locale {
        match self.0.split_once('-') {
            Some((lang, _)) => Locale(lang.to_string()),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locale {
    fn from(s: &str) -> Self {
        Locale::new(s)
    }
}

/// Ordered, de-duplicated list of locales.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocaleChain(Vec<Locale>);

impl LocaleChain {
    pub fn new<I, L>(locales: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Locale>,
    {
        let mut chain: Vec<Locale> = Vec::new();
        for locale in locales {
            let locale = locale.into();
            if !locale.as_str().is_empty() && !chain.contains(&locale) {
                chain.push(locale);
            }
        }
        Self(chain)
    }

    pub fn locales(&self) -> &[Locale] {
        &self.0
    }

    pub fn first(&self) -> Option<&Locale> {
        self.0.first()
    }

    pub fn contains(&self, locale: &Locale) -> bool {
        self.0.contains(locale)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The lookup order for `locale`: the locale itself, then the rest of
    /// the chain in order.
    pub fn for_locale(&self, locale: &Locale) -> Vec<Locale> {
        let mut order = Vec::with_capacity(self.0.len() + 1);
        order.push(locale.clone());
        order.extend(self.0.iter().filter(|l| *l != locale).cloned());
        order
    }

    /// Map an arbitrary requested locale onto a chain member: exact match,
    /// then language match, then the chain head.
    pub fn nearest(&self, requested: &Locale) -> Option<&Locale> {
        if let Some(exact) = self.0.iter().find(|l| *l == requested) {
            return Some(exact);
        }
        let lang = requested.language();
        self.0
            .iter()
            .find(|l| l.language() == lang)
            .or_else(|| self.0.first())
    }
}

/// The fallback language for `lang`.
///
/// Any non-default language falls back to the default one. The default
/// language falls back to the first other supported language, so that a
/// page in the default language can still borrow translated content.
pub fn resolve_fallback_language(lang: &Locale, supported: &[Locale], default: &Locale) -> Locale {
    let lang = lang.language();
    let default = default.language();
    if lang != default {
        return default;
    }
    supported
        .iter()
        .map(Locale::language)
        .find(|l| *l != default)
        .unwrap_or(default)
}

/// `[lang, fallback(lang)]`, de-duplicated.
pub fn best_country_codes(lang: &Locale, supported: &[Locale], default: &Locale) -> LocaleChain {
    let lang = lang.language();
    let fallback = resolve_fallback_language(&lang, supported, default);
    LocaleChain::new([lang, fallback])
}
