use crate::config::ImageFormat;
use crate::fetch::FetchError;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// Transformations the proxy knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Resize to cover the target box, then crop the centre.
    Fill,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Fill => write!(f, "fill"),
        }
    }
}

impl FromStr for Operation {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fill" => Ok(Operation::Fill),
            other => Err(FetchError::MethodNotSupported(format!(
                "operation not allowed: {}",
                other
            ))),
        }
    }
}

/// A fully validated transform request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformRequest {
    source_url: Url,
    width: NonZeroU32,
    height: NonZeroU32,
    format: Option<ImageFormat>,
    operation: Operation,
}

impl TransformRequest {
    /// Returns `None` when either dimension is zero.
    pub fn new(
        source_url: Url,
        width: u32,
        height: u32,
        format: Option<ImageFormat>,
        operation: Operation,
    ) -> Option<Self> {
        Some(Self {
            source_url,
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
            format,
            operation,
        })
    }

    pub fn source_url(&self) -> &Url {
        &self.source_url
    }

    pub fn width(&self) -> u32 {
        self.width.get()
    }

    pub fn height(&self) -> u32 {
        self.height.get()
    }

    /// `None` keeps the source format.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }
}

/// Hex SHA-256 identity of a [`TransformRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(request: &TransformRequest) -> Self {
        let format = request
            .format
            .map(|f| f.to_string())
            .unwrap_or_else(|| "auto".into());
        let canonical = format!(
            "{}|{}|{}|{}|{}",
            request.source_url, request.width, request.height, format, request.operation
        );
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn etag(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
impl From<&str> for Fingerprint {
    fn from(s: &str) -> Self {
        Fingerprint(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str, w: u32, h: u32, f: Option<ImageFormat>) -> TransformRequest {
        TransformRequest::new(Url::parse(url).unwrap(), w, h, f, Operation::Fill).unwrap()
    }

    #[test]
    fn identical_requests_share_a_fingerprint() {
        let a = request("http://example.com/cat.jpg", 300, 200, None);
        let b = request("http://example.com/cat.jpg", 300, 200, None);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn every_field_changes_the_fingerprint() {
        let base = Fingerprint::of(&request("http://example.com/cat.jpg", 300, 200, None));
        let variants = [
            request("http://example.com/dog.jpg", 300, 200, None),
            request("http://example.com/cat.jpg", 301, 200, None),
            request("http://example.com/cat.jpg", 300, 201, None),
            request("http://example.com/cat.jpg", 300, 200, Some(ImageFormat::png)),
        ];
        for v in &variants {
            assert_ne!(base, Fingerprint::of(v), "{:?}", v);
        }
        // Swapped dimensions must not alias.
        assert_ne!(
            Fingerprint::of(&request("http://example.com/cat.jpg", 200, 300, None)),
            base
        );
    }

    #[test]
    fn fingerprint_is_hex_digest() {
        let fp = Fingerprint::of(&request("http://example.com/a/../b.jpg", 1, 1, None));
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(fp.etag(), format!("\"{}\"", fp));
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let url = Url::parse("http://example.com/a.jpg").unwrap();
        assert!(TransformRequest::new(url.clone(), 0, 10, None, Operation::Fill).is_none());
        assert!(TransformRequest::new(url, 10, 0, None, Operation::Fill).is_none());
    }

    #[test]
    fn unknown_operation_is_not_supported() {
        assert_eq!("fill".parse::<Operation>().unwrap(), Operation::Fill);
        let err = "blur".parse::<Operation>().unwrap_err();
        assert_eq!(err.status_hint(), http::StatusCode::METHOD_NOT_ALLOWED);
    }
}
