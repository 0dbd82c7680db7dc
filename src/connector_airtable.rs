//! Airtable table source.
//!
//! Lists a table through the Airtable REST API
//! (`GET /v0/{base}/{table}?pageSize=100`), following the `offset` cursor
//! until the last page. Requires the `AIRTABLE_API_KEY` environment
//! variable.
//!
//! # Retry
//!
//! - HTTP 429 (rate limited) and 5xx → retry with exponential backoff
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors → retry
//!
//! Each request is bounded by `source.timeout_secs`.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use sheetsnap_core::locale::Locale;
use sheetsnap_core::models::RawRow;
use sheetsnap_core::source::TableSource;

use crate::config::Config;
use crate::sources::localize_columns;

pub const AIRTABLE_API_KEY_ENV: &str = "AIRTABLE_API_KEY";
const DEFAULT_API_BASE: &str = "https://api.airtable.com/v0";
const PAGE_SIZE: &str = "100";

pub struct AirtableSource {
    client: reqwest::Client,
    api_base: String,
    base_id: String,
    api_key: String,
    max_retries: u32,
    retry_base: Duration,
    supported: Vec<Locale>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<AirtableRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl AirtableSource {
    /// # Errors
    ///
    /// Returns an error if `source.base_id` is not set or `AIRTABLE_API_KEY`
    /// is not in the environment.
    pub fn new(config: &Config) -> Result<Self> {
        let base_id = config
            .source
            .base_id
            .clone()
            .ok_or_else(|| anyhow!("source.base_id required for airtable source"))?;
        let api_key = std::env::var(AIRTABLE_API_KEY_ENV)
            .map_err(|_| anyhow!("{} environment variable not set", AIRTABLE_API_KEY_ENV))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.source.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            base_id,
            api_key,
            max_retries: config.source.max_retries,
            retry_base: Duration::from_secs(1),
            supported: config.site.supported_locales.clone(),
        })
    }

    /// Point the source at another API root (a proxy or a test server).
    pub fn with_api_base(mut self, api_base: impl Into<String>, retry_base: Duration) -> Self {
        self.api_base = api_base.into();
        self.retry_base = retry_base;
        self
    }

    fn table_url(&self, table: &str, offset: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .with_context(|| format!("Invalid Airtable API base: {}", self.api_base))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Airtable API base cannot be a base URL: {}", self.api_base))?
            .push(&self.base_id)
            .push(table);
        url.query_pairs_mut().append_pair("pageSize", PAGE_SIZE);
        if let Some(offset) = offset {
            url.query_pairs_mut().append_pair("offset", offset);
        }
        Ok(url)
    }

    async fn fetch_page(&self, table: &str, offset: Option<&str>) -> Result<ListResponse> {
        let url = self.table_url(table, offset)?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1x, 2x, 4x, 8x, ...
                let delay = self.retry_base * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .get(url.clone())
                .bearer_auth(&self.api_key)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<ListResponse>()
                            .await
                            .with_context(|| format!("Invalid Airtable response for table {}", table));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(table, attempt, %status, "airtable request failed, retrying");
                        last_err = Some(anyhow!("Airtable API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Airtable API error {}: {}", status, body_text);
                }
                Err(e) => {
                    warn!(table, attempt, error = %e, "airtable request failed, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Airtable request failed after retries")))
    }
}

#[async_trait]
impl TableSource for AirtableSource {
    fn name(&self) -> &str {
        "airtable"
    }

    async fn list_records(&self, table: &str, locale: &Locale) -> Result<Vec<RawRow>> {
        let mut rows = Vec::new();
        let mut offset: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(table, offset.as_deref()).await?;
            pages += 1;
            rows.extend(page.records.into_iter().map(|r| RawRow {
                id: r.id,
                fields: localize_columns(r.fields, locale, &self.supported),
            }));
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(table, %locale, pages, rows = rows.len(), "airtable table listed");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::config::tests::sample_toml;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Fake {
        hits: Arc<AtomicUsize>,
        fail_first: usize,
    }

    async fn list(
        State(fake): State<Fake>,
        Path((base, table)): Path<(String, String)>,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        let hit = fake.hits.fetch_add(1, Ordering::SeqCst);
        if hit < fake.fail_first {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer key123") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        assert_eq!(base, "appTEST");
        assert_eq!(table, "Product Catalog");
        assert_eq!(query.get("pageSize").map(String::as_str), Some("100"));
        let body = match query.get("offset").map(String::as_str) {
            None => json!({
                "records": [{ "id": "rec1", "fields": { "title_EN": "Pen", "title_FR": "Stylo" } }],
                "offset": "page2"
            }),
            Some("page2") => json!({
                "records": [{ "id": "rec2", "fields": { "title_FR": "Gomme" } }]
            }),
            Some(_) => return Err(StatusCode::BAD_REQUEST),
        };
        Ok(Json(body))
    }

    async fn spawn(fake: Fake) -> String {
        let app = Router::new()
            .route("/v0/{base}/{table}", get(list))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v0", addr)
    }

    fn source(api_base: &str, api_key: &str, max_retries: u32) -> AirtableSource {
        let config = parse_config(&sample_toml("./data")).unwrap();
        AirtableSource {
            client: reqwest::Client::new(),
            api_base: String::new(),
            base_id: "appTEST".to_string(),
            api_key: api_key.to_string(),
            max_retries,
            retry_base: Duration::from_millis(1),
            supported: config.site.supported_locales,
        }
        .with_api_base(api_base, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_follows_offset_pagination() {
        let api = spawn(Fake::default()).await;
        let rows = source(&api, "key123", 0)
            .list_records("Product Catalog", &Locale::new("fr"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "rec1");
        assert_eq!(rows[0].fields.get("title"), Some(&json!("Stylo")));
        assert_eq!(rows[1].fields.get("title"), Some(&json!("Gomme")));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let fake = Fake {
            fail_first: 2,
            ..Fake::default()
        };
        let hits = fake.hits.clone();
        let api = spawn(fake).await;
        let rows = source(&api, "key123", 3)
            .list_records("Product Catalog", &Locale::new("en"))
            .await
            .unwrap();
        assert_eq!(rows[0].fields.get("title"), Some(&json!("Pen")));
        assert!(rows[1].fields.get("title").is_none());
        // Two failures, then two pages.
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let fake = Fake::default();
        let hits = fake.hits.clone();
        let api = spawn(fake).await;
        let err = source(&api, "wrong", 3)
            .list_records("Product Catalog", &Locale::new("en"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
