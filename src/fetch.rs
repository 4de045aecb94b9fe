use crate::fingerprint::TransformRequest;
use crate::transform;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, HeaderName, StatusCode};
use mime::Mime;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Upstream and transform failures, each carrying a suggested status code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("bad upstream: {0}")]
    BadUpstream(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("method not supported: {0}")]
    MethodNotSupported(String),
    #[error("transform failed: {0}")]
    Transform(String),
}

impl FetchError {
    pub fn status_hint(&self) -> StatusCode {
        match self {
            FetchError::BadUpstream(_) | FetchError::Transform(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FetchError::NotFound(_) => StatusCode::NOT_FOUND,
            FetchError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FetchError::MethodNotSupported(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

/// Produces transformed bytes for a request.
///
/// `headers` are the client's request headers, forwarded upstream.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &TransformRequest, headers: HeaderMap)
        -> Result<Bytes, FetchError>;
}

// Connection-scoped headers that must not travel to a different host.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "accept-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
];

fn forwardable(mut headers: HeaderMap) -> HeaderMap {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    let proxy: Vec<HeaderName> = headers
        .keys()
        .filter(|k| k.as_str().starts_with("proxy-"))
        .cloned()
        .collect();
    for name in proxy {
        headers.remove(name);
    }
    headers
}

/// Fetches source images over HTTP and runs the requested transform.
pub struct HttpFetcher {
    client: Client,
    max_input_size: usize,
}

impl HttpFetcher {
    pub fn new(max_input_size: usize, timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            max_input_size,
        })
    }

    /// Downloads the source body after validating status and content type.
    ///
    /// Size is enforced from `Content-Length` up front and again while
    /// streaming, since the header can lie.
    async fn download(
        &self,
        request: &TransformRequest,
        headers: HeaderMap,
    ) -> Result<Bytes, FetchError> {
        let resp = self
            .client
            .get(request.source_url().clone())
            .headers(forwardable(headers))
            .send()
            .await
            .map_err(|e| FetchError::BadUpstream(format!("failed to download image: {}", e)))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(format!(
                "upstream returned {} for {}",
                status,
                request.source_url()
            )));
        }
        if !status.is_success() {
            return Err(FetchError::BadUpstream(format!(
                "unexpected status code: {}",
                status
            )));
        }

        let ct = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match ct.parse::<Mime>() {
            Ok(m) if m.type_() == mime::IMAGE => {}
            _ => {
                return Err(FetchError::UnsupportedMediaType(
                    "file is not an image".into(),
                ))
            }
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_input_size as u64 {
                return Err(FetchError::BadUpstream("input exceeds size limit".into()));
            }
        }

        let mut buf = BytesMut::with_capacity(8192);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream
            .next()
            .await
            .transpose()
            .map_err(|e| FetchError::BadUpstream(format!("failed to read image data: {}", e)))?
        {
            if buf.len() + chunk.len() > self.max_input_size {
                return Err(FetchError::BadUpstream("input exceeds size limit".into()));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: &TransformRequest,
        headers: HeaderMap,
    ) -> Result<Bytes, FetchError> {
        let source = self.download(request, headers).await?;
        tracing::debug!(
            "Fetched {} bytes from {}",
            source.len(),
            request.source_url()
        );

        let req = request.clone();
        let out = tokio::task::spawn_blocking(move || {
            transform::apply(req.operation(), &source, req.width(), req.height(), req.format())
        })
        .await
        .map_err(|e| FetchError::Transform(format!("transform task failed: {}", e)))??;

        Ok(Bytes::from(out))
    }
}
