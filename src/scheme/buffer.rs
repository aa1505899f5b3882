//! Scheme handler serving an in-memory body.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;

use crate::handler::scheme::{ReadOutcome, ResponseHeaders, SchemeHandler, SchemeHandlerCallback};
use crate::net::request::Request;
use crate::net::response::ResponseInfo;

/// Answers with a fixed status, MIME type and body as soon as it is asked.
#[derive(Debug, Clone)]
pub struct BufferSchemeHandler {
    response: ResponseInfo,
    data: Bytes,
    offset: usize,
}

impl BufferSchemeHandler {
    pub fn new(status: StatusCode, mime_type: &str, data: impl Into<Bytes>) -> Self {
        let mut response = ResponseInfo::new(status);
        if let Ok(value) = HeaderValue::from_str(mime_type) {
            response.headers.insert(CONTENT_TYPE, value);
        }
        response.refresh_from_headers();
        Self {
            response,
            data: data.into(),
            offset: 0,
        }
    }

    /// A plain-text error page.
    pub fn error(status: StatusCode) -> Self {
        let body = format!(
            "{} {}\n",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        Self::new(status, "text/plain", body)
    }

    pub fn response(&self) -> &ResponseInfo {
        &self.response
    }
}

impl SchemeHandler for BufferSchemeHandler {
    fn process_request(&mut self, _request: &Request, callback: SchemeHandlerCallback) -> bool {
        callback.headers_available();
        true
    }

    fn get_response_headers(&mut self) -> ResponseHeaders {
        ResponseHeaders::new(self.response.clone()).with_content_length(self.data.len() as u64)
    }

    fn read_response(&mut self, buf: &mut [u8], _callback: &SchemeHandlerCallback) -> ReadOutcome {
        let remaining = &self.data[self.offset..];
        if remaining.is_empty() {
            return ReadOutcome::Complete;
        }
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        ReadOutcome::Data(n)
    }
}
