//! Response-side value types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};

use crate::net::error::NetError;

/// Response metadata delivered to peers and handlers.
#[derive(Debug, Clone)]
pub struct ResponseInfo {
    /// HTTP status code.
    pub status: StatusCode,

    /// Status text, e.g. "OK".
    pub status_text: String,

    /// MIME type without parameters.
    pub mime_type: String,

    /// Charset parameter of the content type, if any.
    pub charset: Option<String>,

    /// Response headers.
    pub headers: HeaderMap,

    /// Declared body length, if known.
    pub content_length: Option<u64>,

    /// File the body was written to in download-to-file mode.
    pub download_file_path: Option<PathBuf>,

    /// When the request was issued.
    pub request_time: DateTime<Utc>,

    /// When the response headers arrived.
    pub response_time: DateTime<Utc>,
}

impl ResponseInfo {
    /// Creates response info with the given status and no headers.
    pub fn new(status: StatusCode) -> Self {
        let now = Utc::now();
        Self {
            status,
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            mime_type: String::new(),
            charset: None,
            headers: HeaderMap::new(),
            content_length: None,
            download_file_path: None,
            request_time: now,
            response_time: now,
        }
    }

    /// Creates response info from a status and header map, deriving the MIME
    /// type, charset and content length from the headers.
    pub fn from_headers(status: StatusCode, headers: HeaderMap) -> Self {
        let mut info = Self::new(status);
        info.headers = headers;
        info.refresh_from_headers();
        info
    }

    /// Re-derives MIME type, charset and content length from the headers.
    pub fn refresh_from_headers(&mut self) {
        if let Some(content_type) = self.header_str(CONTENT_TYPE.as_str()) {
            let (mime, charset) = parse_content_type(content_type);
            self.mime_type = mime;
            self.charset = charset;
        }
        if let Some(length) = self
            .header_str(CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
        {
            self.content_length = Some(length);
        }
    }

    /// Returns the first value of a header as a string.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the `Location` header, if present.
    pub fn location(&self) -> Option<&str> {
        self.header_str(LOCATION.as_str())
    }

    /// Returns true if the response asks to be saved as an attachment.
    pub fn is_attachment(&self) -> bool {
        self.header_str(CONTENT_DISPOSITION.as_str())
            .map(|v| v.trim_start().to_ascii_lowercase().starts_with("attachment"))
            .unwrap_or(false)
    }

    /// Returns the file name suggested by `Content-Disposition`, if any.
    pub fn suggested_file_name(&self) -> Option<String> {
        let disposition = self.header_str(CONTENT_DISPOSITION.as_str())?;
        disposition.split(';').find_map(|part| {
            let (key, value) = part.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("filename") {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }
}

impl Default for ResponseInfo {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

fn parse_content_type(value: &str) -> (String, Option<String>) {
    let mut parts = value.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    });
    (mime, charset)
}

/// Final outcome of a load, carried by the single completion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// The load finished normally.
    Success,
    /// The load was cancelled by the owner, a handler, or a denied redirect.
    Canceled,
    /// The load failed.
    Failed(NetError),
}

impl RequestStatus {
    /// Converts a transaction error into a status. Aborts count as cancellation.
    pub fn from_error(error: NetError) -> Self {
        match error {
            NetError::Aborted => RequestStatus::Canceled,
            other => RequestStatus::Failed(other),
        }
    }

    /// Returns the numeric error code (0 on success).
    pub fn error_code(&self) -> i32 {
        match self {
            RequestStatus::Success => 0,
            RequestStatus::Canceled => NetError::Aborted.code(),
            RequestStatus::Failed(error) => error.code(),
        }
    }

    /// Returns true for [`RequestStatus::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, RequestStatus::Success)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestStatus::Success => write!(f, "success"),
            RequestStatus::Canceled => write!(f, "canceled"),
            RequestStatus::Failed(error) => write!(f, "failed: {} ({})", error, error.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_from_headers_parses_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Text/HTML; charset=\"utf-8\""),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("42"));

        let info = ResponseInfo::from_headers(StatusCode::OK, headers);
        assert_eq!(info.mime_type, "text/html");
        assert_eq!(info.charset.as_deref(), Some("utf-8"));
        assert_eq!(info.content_length, Some(42));
        assert_eq!(info.status_text, "OK");
    }

    #[test]
    fn test_attachment_detection() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report.pdf\""),
        );
        let info = ResponseInfo::from_headers(StatusCode::OK, headers);
        assert!(info.is_attachment());
        assert_eq!(info.suggested_file_name().as_deref(), Some("report.pdf"));

        assert!(!ResponseInfo::default().is_attachment());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(RequestStatus::Success.error_code(), 0);
        assert_eq!(RequestStatus::Canceled.error_code(), -3);
        assert_eq!(RequestStatus::from_error(NetError::Aborted), RequestStatus::Canceled);
        assert_eq!(
            RequestStatus::from_error(NetError::ConnectionFailed).error_code(),
            -104
        );
    }
}
