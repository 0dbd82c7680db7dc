//! HTTP server for static-site builds and previews.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/paths` | Static paths: one entry per customer language |
//! | `GET`  | `/props/{locale}?preview=bool&preview_data=json` | Static props for one locale |
//!
//! # Revalidation
//!
//! Non-preview props are cached per locale. Once an entry is older than
//! `server.revalidate_secs`, the stale entry keeps being served while one
//! background regeneration runs for that locale. A failed regeneration
//! keeps the old entry. Preview requests always run the live pipeline and
//! are never cached. Only locales listed by `/paths` are rendered, so the
//! cache holds at most one entry per customer language.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "unsupported locale: de" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `build_failed` (500).
//! In preview mode the message carries the full aggregated error chain.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use sheetsnap_core::locale::Locale;

use crate::config::Config;
use crate::pages::{compute_static_paths, compute_static_props, PageContext, StaticPath, StaticProps};
use crate::provider::{provider_for, DatasetProvider};

struct CacheEntry {
    props: StaticProps,
    generated_at: Instant,
}

#[derive(Default)]
struct PropsCache {
    entries: RwLock<HashMap<Locale, CacheEntry>>,
    in_flight: Mutex<HashSet<Locale>>,
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pages: PageContext,
    /// Provider for regular requests, chosen once from `build.mode`.
    provider: Arc<dyn DatasetProvider>,
    /// Live provider for preview requests, if one could be configured.
    preview: Option<Arc<dyn DatasetProvider>>,
    revalidate: Duration,
    cache: Arc<PropsCache>,
}

impl AppState {
    pub fn new(
        pages: PageContext,
        provider: Arc<dyn DatasetProvider>,
        preview: Option<Arc<dyn DatasetProvider>>,
    ) -> Self {
        let revalidate = Duration::from_secs(pages.config.server.revalidate_secs);
        Self {
            pages,
            provider,
            preview,
            revalidate,
            cache: Arc::new(PropsCache::default()),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/paths", get(handle_paths))
        .route("/props/{locale}", get(handle_props))
        .layer(cors)
        .with_state(state)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pages = PageContext::from_config(config)?;
    let provider = provider_for(config, false)?;
    let preview = match provider_for(config, true) {
        Ok(p) => Some(p),
        Err(e) => {
            let reason = format!("{:#}", e);
            warn!(error = %reason, "preview disabled");
            None
        }
    };

    let app = create_router(AppState::new(pages, provider, preview));

    println!("sheetsnap server listening on http://{}", bind_addr);
    info!(bind = bind_addr.as_str(), mode = ?config.build.mode, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Map a page build error. Preview keeps the whole chain so the editor
/// sees every failed fetch at once.
fn classify_build_error(err: anyhow::Error, preview: bool) -> AppError {
    let message = if preview {
        format!("{:#}", err)
    } else {
        err.to_string()
    };

    if err.to_string().starts_with("unsupported locale") {
        AppError {
            status: StatusCode::NOT_FOUND,
            code: "not_found".to_string(),
            message,
        }
    } else {
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "build_failed".to_string(),
            message,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /paths ============

#[derive(Serialize)]
struct PathsResponse {
    paths: Vec<StaticPath>,
}

async fn handle_paths(State(state): State<AppState>) -> Result<Json<PathsResponse>, AppError> {
    let paths = compute_static_paths(&state.pages, state.provider.as_ref())
        .await
        .map_err(|e| classify_build_error(e, false))?;
    Ok(Json(PathsResponse { paths }))
}

// ============ GET /props/{locale} ============

#[derive(Debug, Deserialize)]
struct PropsQuery {
    #[serde(default)]
    preview: bool,
    /// JSON attached to a preview request.
    #[serde(default)]
    preview_data: Option<String>,
}

async fn handle_props(
    State(state): State<AppState>,
    Path(locale): Path<String>,
    Query(query): Query<PropsQuery>,
) -> Result<Json<StaticProps>, AppError> {
    if query.preview {
        let provider = state
            .preview
            .as_ref()
            .ok_or_else(|| bad_request("preview is not available: live source is not configured"))?;
        let preview_data = query
            .preview_data
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| bad_request(format!("preview_data is not valid JSON: {}", e)))?;
        let props = compute_static_props(
            &state.pages,
            provider.as_ref(),
            Some(locale.as_str()),
            true,
            preview_data,
        )
        .await
        .map_err(|e| classify_build_error(e, true))?;
        return Ok(Json(props));
    }

    let key = Locale::new(&locale);

    {
        let entries = state.cache.entries.read().await;
        if let Some(entry) = entries.get(&key) {
            if entry.generated_at.elapsed() >= state.revalidate {
                spawn_regeneration(state.clone(), key.clone()).await;
            }
            return Ok(Json(entry.props.clone()));
        }
    }

    let props = compute_static_props(&state.pages, state.provider.as_ref(), Some(locale.as_str()), false, None)
        .await
        .map_err(|e| classify_build_error(e, false))?;
    state.cache.entries.write().await.insert(
        key,
        CacheEntry {
            props: props.clone(),
            generated_at: Instant::now(),
        },
    );
    Ok(Json(props))
}

/// Start a background regeneration for `locale` unless one is running.
async fn spawn_regeneration(state: AppState, locale: Locale) {
    if !state.cache.in_flight.lock().await.insert(locale.clone()) {
        return;
    }

    tokio::spawn(async move {
        let result = compute_static_props(
            &state.pages,
            state.provider.as_ref(),
            Some(locale.as_str()),
            false,
            None,
        )
        .await;

        match result {
            Ok(props) => {
                state.cache.entries.write().await.insert(
                    locale.clone(),
                    CacheEntry {
                        props,
                        generated_at: Instant::now(),
                    },
                );
                info!(%locale, "props regenerated");
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(%locale, error = %reason, "regeneration failed, serving stale props");
            }
        }

        state.cache.in_flight.lock().await.remove(&locale);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::config::tests::sample_toml;
    use crate::provider::tests::{demo_registry, demo_source};
    use crate::provider::LiveProvider;
    use crate::translations::NoTranslations;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use sheetsnap_core::models::RawRow;
    use sheetsnap_core::source::memory::MemorySource;
    use sheetsnap_core::source::TableSource;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    /// A source that can be switched off mid-test.
    struct Switchable {
        inner: MemorySource,
        broken: AtomicBool,
    }

    #[async_trait]
    impl TableSource for Switchable {
        fn name(&self) -> &str {
            "switchable"
        }

        async fn list_records(&self, table: &str, locale: &Locale) -> anyhow::Result<Vec<RawRow>> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("source offline");
            }
            self.inner.list_records(table, locale).await
        }
    }

    fn state_with(source: Arc<dyn TableSource>, revalidate_secs: u64) -> AppState {
        let mut config = parse_config(&sample_toml("./data")).unwrap();
        config.server.revalidate_secs = revalidate_secs;
        let pages = PageContext::new(Arc::new(config), Arc::new(NoTranslations));
        let provider: Arc<dyn DatasetProvider> = Arc::new(LiveProvider::new(
            demo_registry(),
            source,
            4,
            Duration::from_secs(5),
        ));
        AppState::new(pages, provider.clone(), Some(provider))
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state_with(Arc::new(demo_source()), 30));
        let (status, body) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_paths_endpoint() {
        let app = create_router(state_with(Arc::new(demo_source()), 30));
        let (status, body) = get_json(&app, "/paths").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paths"][0]["locale"], "fr");
        assert_eq!(body["paths"][1]["locale"], "en");
    }

    #[tokio::test]
    async fn test_props_are_cached_until_stale() {
        let source = Arc::new(demo_source());
        let app = create_router(state_with(source.clone(), 3600));
        let (status, first) = get_json(&app, "/props/fr").await;
        assert_eq!(status, StatusCode::OK);
        let calls = source.calls();
        let (_, second) = get_json(&app, "/props/fr").await;
        assert_eq!(source.calls(), calls);
        assert_eq!(first["builtAt"], second["builtAt"]);
    }

    #[tokio::test]
    async fn test_unsupported_locale_is_not_found() {
        let app = create_router(state_with(Arc::new(demo_source()), 30));
        let (status, body) = get_json(&app, "/props/de").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_unlisted_locales_are_not_rendered_or_cached() {
        let state = state_with(Arc::new(demo_source()), 30);
        let app = create_router(state.clone());
        for i in 0..5 {
            let (status, body) = get_json(&app, &format!("/props/fr-zz{}", i)).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["error"]["code"], "not_found");
        }
        assert!(state.cache.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_preview_data_passed_through() {
        let app = create_router(state_with(Arc::new(demo_source()), 30));
        let (status, body) = get_json(&app, "/props/fr?preview=true&preview_data=%7B%22draft%22%3A1%7D").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previewData"]["draft"], 1);

        let (status, body) = get_json(&app, "/props/fr?preview=true&preview_data=%7Bnope").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_preview_surfaces_full_error_chain() {
        let mut source = demo_source();
        source.fail("Product", "fr").fail("Customer", "en");
        let app = create_router(state_with(Arc::new(source), 30));

        let (status, body) = get_json(&app, "/props/fr?preview=true").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.contains("2 of 4"));
        assert!(message.contains("fetch Product [fr] failed"));
        assert!(message.contains("fetch Customer [en] failed"));

        let (_, body) = get_json(&app, "/props/fr").await;
        let message = body["error"]["message"].as_str().unwrap();
        assert!(!message.contains("fetch Product [fr] failed"));
    }

    #[tokio::test]
    async fn test_failed_regeneration_keeps_stale_props() {
        let source = Arc::new(Switchable {
            inner: demo_source(),
            broken: AtomicBool::new(false),
        });
        let state = state_with(source.clone(), 0);
        let app = create_router(state.clone());

        let (status, first) = get_json(&app, "/props/en").await;
        assert_eq!(status, StatusCode::OK);

        source.broken.store(true, Ordering::SeqCst);
        let (status, stale) = get_json(&app, "/props/en").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stale["serializedDataset"], first["serializedDataset"]);

        // Let the background regeneration finish and fail.
        for _ in 0..50 {
            if state.cache.in_flight.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (status, still) = get_json(&app, "/props/en").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(still["builtAt"], first["builtAt"]);
    }
}
