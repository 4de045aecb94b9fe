use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use reqwest::Url;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod fetch;
pub mod fingerprint;
pub mod logging;
pub mod transform;

use crate::cache::{Cache, CacheError, DiskBackend, LruCache, MemoryBackend};
use crate::config::{PreviewerConfig, DEFAULT_CACHE_CONTROL};
use crate::fetch::{FetchError, Fetcher};
use crate::fingerprint::{Fingerprint, Operation, TransformRequest};

#[derive(Error, Debug)]
pub enum PreviewerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, PreviewerError>;

impl PreviewerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PreviewerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            PreviewerError::NotFound(_) => StatusCode::NOT_FOUND,
            PreviewerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            PreviewerError::Fetch(e) | PreviewerError::Cache(CacheError::Fetch(e)) => {
                e.status_hint()
            }
            PreviewerError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Storage errors may carry filesystem paths; keep them out of bodies.
    fn public_message(&self) -> String {
        match self {
            PreviewerError::Cache(CacheError::Storage(_)) => "internal storage error".into(),
            PreviewerError::Cache(CacheError::InvalidCapacity) => "internal error".into(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for PreviewerError {
    fn into_response(self) -> Response {
        (self.status_code(), self.public_message()).into_response()
    }
}

/// Builds the shared cache described by `config`: disk-backed when a
/// storage directory is configured, in-memory otherwise.
pub async fn build_cache(
    config: &PreviewerConfig,
    fetcher: Arc<dyn Fetcher>,
) -> std::result::Result<Arc<dyn Cache>, CacheError> {
    let cache: Arc<dyn Cache> = match &config.storage_dir {
        Some(dir) => {
            let backend = DiskBackend::open(dir.clone()).await?;
            tracing::info!(
                "Disk cache at {} with capacity {}",
                dir.display(),
                config.cache_capacity
            );
            Arc::new(LruCache::new(
                config.cache_capacity,
                backend,
                fetcher,
                config.miss_strategy,
            )?)
        }
        None => {
            tracing::info!("Memory cache with capacity {}", config.cache_capacity);
            Arc::new(LruCache::new(
                config.cache_capacity,
                MemoryBackend::new(),
                fetcher,
                config.miss_strategy,
            )?)
        }
    };
    Ok(cache)
}

/// Largest accepted output width or height. The fill buffer scales with
/// both, so unbounded values could exhaust memory.
pub const MAX_DIMENSION: u32 = 10_000;

/// Parses `/{operation}/{width}/{height}/{source}` plus the query string.
///
/// The source is either `host/path` (fetched over `http://`) or a full
/// `http://`/`https://` URL.
pub fn parse_transform_path(path: &str, query: Option<&str>) -> Result<TransformRequest> {
    let (operation, rest) = split_operation(path)?;

    let mut parts = rest.splitn(3, '/');
    let (w, h, source) = match (parts.next(), parts.next(), parts.next()) {
        (Some(w), Some(h), Some(src)) if !src.is_empty() => (w, h, src),
        _ => {
            return Err(PreviewerError::InvalidArgument(format!(
                "invalid URL path format: {:?}",
                path
            )))
        }
    };

    let width: u32 = w
        .parse()
        .map_err(|e| PreviewerError::InvalidArgument(format!("invalid width parameter: {}", e)))?;
    let height: u32 = h
        .parse()
        .map_err(|e| PreviewerError::InvalidArgument(format!("invalid height parameter: {}", e)))?;

    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(PreviewerError::InvalidArgument(format!(
            "width and height must not exceed {}",
            MAX_DIMENSION
        )));
    }

    let mut source_url = source_to_url(source);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        source_url.push('?');
        source_url.push_str(q);
    }
    let url = Url::parse(&source_url)
        .ok()
        .filter(|u| u.host_str().is_some())
        .ok_or_else(|| {
            PreviewerError::InvalidArgument(format!("invalid image URL: {:?}", source_url))
        })?;

    TransformRequest::new(url, width, height, None, operation).ok_or_else(|| {
        PreviewerError::InvalidArgument("width and height must be positive integers".into())
    })
}

/// Parses the leading operation segment and returns it with the rest of
/// the path.
///
/// A lone segment that is not an operation (`/favicon.ico`) is not a route.
fn split_operation(path: &str) -> Result<(Operation, &str)> {
    let trimmed = path.trim_start_matches('/');
    let (op, rest) = match trimmed.split_once('/') {
        Some((op, rest)) => (op, Some(rest)),
        None => (trimmed, None),
    };
    match (op.parse::<Operation>(), rest) {
        (Ok(operation), rest) => Ok((operation, rest.unwrap_or(""))),
        (Err(_), None) => Err(PreviewerError::NotFound(format!("no route for {:?}", path))),
        (Err(e), Some(_)) => Err(e.into()),
    }
}

fn source_to_url(source: &str) -> String {
    for scheme in ["http", "https"] {
        if let Some(rest) = source.strip_prefix(scheme).and_then(|s| s.strip_prefix(':')) {
            // Clients and proxies may collapse `//` in paths.
            let rest = rest.trim_start_matches('/');
            return format!("{}://{}", scheme, rest);
        }
    }
    format!("http://{}", source)
}

async fn transform_handler(
    State(cache): State<Arc<dyn Cache>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    if method != Method::GET {
        split_operation(uri.path())?;
        return Err(PreviewerError::MethodNotAllowed(method.to_string()));
    }
    let request = parse_transform_path(uri.path(), uri.query()).map_err(|e| {
        tracing::warn!("Rejected request {}: {}", uri, e);
        e
    })?;

    tracing::debug!(
        "Processing image request: url={}, w={}, h={}, op={}",
        request.source_url(),
        request.width(),
        request.height(),
        request.operation()
    );

    let data = cache.get(&request, headers).await.map_err(|e| {
        tracing::error!("Failed to get image for {}: {}", request.source_url(), e);
        PreviewerError::from(e)
    })?;

    let content_type = config::ImageFormat::from_bytes(&data)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream");
    let etag = Fingerprint::of(&request).etag();

    let mut out = HeaderMap::new();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    out.insert(header::CACHE_CONTROL, HeaderValue::from_static(DEFAULT_CACHE_CONTROL));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(data.len()));
    if let Ok(v) = HeaderValue::from_str(&etag) {
        out.insert(header::ETAG, v);
    }
    Ok((out, Body::from(data)).into_response())
}

async fn health_handler() -> impl IntoResponse {
    use serde_json::json;

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "previewer"
    }))
}

async fn cache_stats_handler(State(cache): State<Arc<dyn Cache>>) -> impl IntoResponse {
    use serde_json::json;

    let stats = cache.stats().await;
    Json(json!({
        "cache": {
            "entry_count": stats.entries,
            "capacity": stats.capacity,
            "usage_percent": (stats.entries as f64 / stats.capacity as f64) * 100.0,
        },
        "requests": {
            "cache_hits": stats.hits,
            "cache_misses": stats.misses,
            "total": stats.hits + stats.misses,
            "hit_rate_percent": stats.hit_rate_percent(),
        }
    }))
}

/// Prometheus-compatible plain text.
async fn metrics_handler(State(cache): State<Arc<dyn Cache>>) -> impl IntoResponse {
    let stats = cache.stats().await;
    let metrics = format!(
        "# HELP previewer_cache_hits_total Total number of cache hits\n\
         # TYPE previewer_cache_hits_total counter\n\
         previewer_cache_hits_total {}\n\
         # HELP previewer_cache_misses_total Total number of cache misses\n\
         # TYPE previewer_cache_misses_total counter\n\
         previewer_cache_misses_total {}\n\
         # HELP previewer_cache_entries Number of cached variants\n\
         # TYPE previewer_cache_entries gauge\n\
         previewer_cache_entries {}\n",
        stats.hits, stats.misses, stats.entries
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics,
    )
}

/// Builds the full router: observability endpoints plus the transform
/// handler for every other path.
pub fn router(cache: Arc<dyn Cache>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats/cache", get(cache_stats_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(transform_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_path_source() {
        let req = parse_transform_path("/fill/300/200/example.com/img/cat.jpg", None).unwrap();
        assert_eq!(req.width(), 300);
        assert_eq!(req.height(), 200);
        assert_eq!(req.operation(), Operation::Fill);
        assert_eq!(req.source_url().as_str(), "http://example.com/img/cat.jpg");
    }

    #[test]
    fn parses_explicit_and_collapsed_schemes() {
        let req = parse_transform_path("/fill/10/10/https://example.com/a.png", None).unwrap();
        assert_eq!(req.source_url().as_str(), "https://example.com/a.png");
        let req = parse_transform_path("/fill/10/10/http:/example.com/a.png", None).unwrap();
        assert_eq!(req.source_url().as_str(), "http://example.com/a.png");
    }

    #[test]
    fn query_belongs_to_the_source() {
        let req = parse_transform_path("/fill/10/10/example.com/a.png", Some("v=2")).unwrap();
        assert_eq!(req.source_url().as_str(), "http://example.com/a.png?v=2");
    }

    #[test]
    fn rejects_bad_dimensions() {
        for path in [
            "/fill/0/10/example.com/a.png",
            "/fill/10/0/example.com/a.png",
            "/fill/-5/10/example.com/a.png",
            "/fill/abc/10/example.com/a.png",
            "/fill/60000/60000/example.com/a.png",
            "/fill/10/10001/example.com/a.png",
            "/fill",
            "/fill/",
            "/fill/10",
            "/fill/10/10",
            "/fill/10/10/",
        ] {
            let err = parse_transform_path(path, None).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST, "{}", path);
        }
    }

    #[test]
    fn unknown_operation_is_405_and_bare_paths_404() {
        let err = parse_transform_path("/blur/10/10/example.com/a.png", None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        for path in ["/favicon.ico", "/"] {
            let err = parse_transform_path(path, None).unwrap_err();
            assert_eq!(err.status_code(), StatusCode::NOT_FOUND, "{}", path);
        }
    }

    #[test]
    fn storage_errors_hide_details() {
        let err = PreviewerError::Cache(CacheError::Storage(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/var/cache/previewer/abc: permission denied",
        )));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "internal storage error");
    }
}
