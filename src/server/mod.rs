//! HTTP surface: request routing, validation, rate limiting and error
//! translation. Handlers hold no state of their own; everything is injected
//! through [`AppState`].

pub mod range;
pub mod ratelimit;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{ConnectInfo, Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::AudioCache;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::extractor::{invoker::probe_tool_version, is_valid_media_id, AudioExtractor, SingleFlight};

use self::ratelimit::RateLimiter;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: AudioCache,
    pub extractor: Arc<dyn AudioExtractor>,
    pub limiter: Arc<RateLimiter>,
    pub flight: Arc<SingleFlight>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, extractor: Arc<dyn AudioExtractor>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            cache: AudioCache::new(Duration::from_secs(config.cache_ttl_secs)),
            limiter: Arc::new(RateLimiter::new(
                config.rate_limit_max,
                Duration::from_secs(config.rate_limit_window_secs),
            )),
            flight: Arc::new(SingleFlight::new()),
            config: Arc::new(config),
            extractor,
            http,
        })
    }

    /// Cache-then-extract path. Concurrent requests for one identifier
    /// collapse onto a single extraction; followers pick the payload up from
    /// the cache once the leader stores it.
    pub async fn fetch_audio(&self, media_id: &str) -> AppResult<Bytes> {
        if let Some(hit) = self.cache.get(&media_id.to_string()) {
            debug!("💾 cache hit for {}", media_id);
            return Ok(hit);
        }

        self.flight
            .run(media_id, || async {
                if let Some(hit) = self.cache.get(&media_id.to_string()) {
                    debug!("💾 cache hit for {} (populated in flight)", media_id);
                    return Ok(hit);
                }

                let payload = self.extractor.extract(media_id).await?;
                self.cache.insert(media_id.to_string(), payload.clone());
                info!("📥 cached {} bytes for {}", payload.len(), media_id);
                Ok(payload)
            })
            .await
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/audio/{id}", get(fetch_audio))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/debug", get(debug_info))
        .route("/clear-cache", post(clear_cache))
        .layer(middleware::from_fn_with_state(state.clone(), cors))
        .with_state(state)
}

/// CORS for the single configured frontend origin. Preflights are answered
/// directly; every other response gets the allow headers appended.
async fn cors(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut(), &state.config.frontend_origin);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), &state.config.frontend_origin);
    response
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Range, Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Range, Accept-Ranges, Content-Length"),
    );
}

/// GET /audio/{id} — validate, rate limit, fetch, answer range-aware.
async fn fetch_audio(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if !is_valid_media_id(&id) {
        return Err(AppError::InvalidMediaId(id));
    }

    state
        .limiter
        .check(addr.ip())
        .map_err(|retry_after_secs| AppError::RateLimited { retry_after_secs })?;

    let payload = state.fetch_audio(&id).await?;

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    Ok(range::audio_response(payload, range))
}

/// GET /health — liveness only, no dependencies touched.
async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    ok: bool,
    upstream_reachable: bool,
    extractor_version: Option<String>,
    cached_entries: usize,
}

/// GET /status — probes upstream reachability and extractor availability.
async fn status(State(state): State<AppState>) -> AppResult<Json<StatusResponse>> {
    let upstream_reachable = state
        .http
        .head("https://www.youtube.com")
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map(|response| {
            response.status().is_success() || response.status().is_redirection()
        })
        .unwrap_or(false);

    let extractor_version = probe_tool_version(&state.config.ytdlp_bin, "--version").await.ok();

    let response = StatusResponse {
        ok: upstream_reachable && extractor_version.is_some(),
        upstream_reachable,
        extractor_version,
        cached_entries: state.cache.len(),
    };

    if !response.ok {
        return Err(AppError::UpstreamProbe(format!(
            "upstream reachable: {}, extractor available: {}",
            response.upstream_reachable,
            response.extractor_version.is_some()
        )));
    }

    Ok(Json(response))
}

/// GET /debug — fixed allow-list of diagnostics, never free-form commands.
async fn debug_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let extractor_version = probe_tool_version(&state.config.ytdlp_bin, "--version").await.ok();

    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "extractor_bin": state.config.ytdlp_bin,
        "extractor_version": extractor_version,
        "fallback_bin": state.config.fallback_bin,
        "ffmpeg_bin": state.config.ffmpeg_bin,
        "scratch_dir": state.config.scratch_dir,
        "frontend_origin": state.config.frontend_origin,
        "cookies_provisioned": state.config.cookie_file.is_some(),
        "cache": {
            "entries": state.cache.len(),
            "ttl_secs": state.config.cache_ttl_secs,
        },
    }))
}

#[derive(Debug, Serialize)]
struct ClearCacheResponse {
    success: bool,
    deleted: usize,
}

/// POST /clear-cache — unconditional eviction, reports the count removed.
async fn clear_cache(State(state): State<AppState>) -> Json<ClearCacheResponse> {
    let deleted = state.cache.clear();
    info!("🧹 cache cleared, {} entries removed", deleted);
    Json(ClearCacheResponse {
        success: true,
        deleted,
    })
}
