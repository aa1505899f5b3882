//! Loader-internal pages under `ki://`.
//!
//! The registry keeps this factory installed at all times, including after
//! `clear_factories`.

use http::StatusCode;
use serde::Serialize;

use crate::handler::scheme::{SchemeHandler, SchemeHandlerFactory};
use crate::net::request::{BrowserInfo, Request};
use crate::scheme::buffer::BufferSchemeHandler;

/// Scheme served by [`InternalSchemeHandlerFactory`].
pub const INTERNAL_SCHEME: &str = "ki";

#[derive(Serialize)]
struct VersionPage<'a> {
    name: &'a str,
    version: &'a str,
    browser: Option<String>,
}

/// Serves `ki://version/`.
#[derive(Debug, Default, Clone, Copy)]
pub struct InternalSchemeHandlerFactory;

impl SchemeHandlerFactory for InternalSchemeHandlerFactory {
    fn create(
        &self,
        browser: Option<&BrowserInfo>,
        _scheme: &str,
        request: &Request,
    ) -> Option<Box<dyn SchemeHandler>> {
        let handler = match request.url.host_str() {
            Some("version") => {
                let page = VersionPage {
                    name: crate::NAME,
                    version: crate::VERSION,
                    browser: browser.map(|b| b.id.to_string()),
                };
                match serde_json::to_vec_pretty(&page) {
                    Ok(body) => BufferSchemeHandler::new(StatusCode::OK, "application/json", body),
                    Err(_) => BufferSchemeHandler::error(StatusCode::INTERNAL_SERVER_ERROR),
                }
            }
            _ => BufferSchemeHandler::error(StatusCode::NOT_FOUND),
        };
        Some(Box::new(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_page() {
        let request = Request::parse("ki://version/").unwrap();
        let mut handler = InternalSchemeHandlerFactory
            .create(None, INTERNAL_SCHEME, &request)
            .unwrap();
        let headers = handler.get_response_headers();
        assert_eq!(headers.response.status, StatusCode::OK);
        assert_eq!(headers.response.mime_type, "application/json");
    }

    #[test]
    fn test_unknown_page() {
        let request = Request::parse("ki://nothing/").unwrap();
        let mut handler = InternalSchemeHandlerFactory
            .create(None, INTERNAL_SCHEME, &request)
            .unwrap();
        assert_eq!(handler.get_response_headers().response.status, StatusCode::NOT_FOUND);
    }
}
