//! Host application interfaces.
//!
//! The embedding application customises loading through these traits:
//!
//! - [`RequestHandler`] - observes and steers every request on the IO thread
//! - [`SchemeHandler`] / [`SchemeHandlerFactory`] - serve custom URL schemes
//! - [`DownloadHandler`] - receives the body of attachment responses
//! - [`ContentFilter`] - rewrites body bytes before they reach the peer
//!
//! Every method has a default so implementors only override what they need.
//! All of them are called from the IO thread and must not block for long.

pub mod scheme;

use std::io::Read;

use url::Url;

use crate::net::request::{BrowserInfo, Request};
use crate::net::response::ResponseInfo;
use crate::net::transaction::{AuthChallenge, Credentials};

pub use scheme::{
    ReadOutcome, ResponseHeaders, SchemeHandler, SchemeHandlerCallback, SchemeHandlerFactory,
};

/// What to do with a request before it reaches the network.
pub enum BeforeLoadAction {
    /// Load normally, using any mutations applied to the request.
    Continue,
    /// Abort the request.
    Cancel,
    /// Load this URL instead. Reported to the peer as a redirect.
    Redirect(Url),
    /// Answer the request directly from `stream`.
    Respond {
        response: ResponseInfo,
        stream: Box<dyn Read + Send>,
    },
}

impl std::fmt::Debug for BeforeLoadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeforeLoadAction::Continue => write!(f, "Continue"),
            BeforeLoadAction::Cancel => write!(f, "Cancel"),
            BeforeLoadAction::Redirect(url) => write!(f, "Redirect({})", url),
            BeforeLoadAction::Respond { response, .. } => {
                write!(f, "Respond({})", response.status)
            }
        }
    }
}

/// Per-request hooks supplied by the host application.
pub trait RequestHandler: Send + Sync {
    /// Called before a request starts. The handler may mutate `request`.
    fn on_before_resource_load(
        &self,
        _browser: Option<&BrowserInfo>,
        _request: &mut Request,
    ) -> BeforeLoadAction {
        BeforeLoadAction::Continue
    }

    /// Called when a redirect was received. The handler may change `new_url`.
    fn on_resource_redirect(&self, _browser: Option<&BrowserInfo>, _old_url: &Url, _new_url: &mut Url) {
    }

    /// Called when response headers arrive. A returned filter sees every
    /// body chunk before the peer does.
    fn on_resource_response(
        &self,
        _browser: Option<&BrowserInfo>,
        _url: &Url,
        _response: &ResponseInfo,
    ) -> Option<Box<dyn ContentFilter>> {
        None
    }

    /// Supplies credentials for an authentication challenge. `None` lets
    /// the request continue without them.
    fn get_auth_credentials(
        &self,
        _browser: Option<&BrowserInfo>,
        _challenge: &AuthChallenge,
    ) -> Option<Credentials> {
        None
    }

    /// Called for URLs no transaction source understands. Returns true if
    /// the URL was handed to an external application.
    fn on_protocol_execution(&self, _browser: Option<&BrowserInfo>, _url: &Url) -> bool {
        false
    }

    /// Called for `Content-Disposition: attachment` responses. A returned
    /// handler takes over the body; the load can then no longer be canceled
    /// by its owner.
    fn get_download_handler(
        &self,
        _browser: Option<&BrowserInfo>,
        _mime_type: &str,
        _file_name: &str,
        _content_length: Option<u64>,
    ) -> Option<Box<dyn DownloadHandler>> {
        None
    }
}

/// Request handler that changes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRequestHandler;

impl RequestHandler for DefaultRequestHandler {}

/// Receives a downloaded body.
pub trait DownloadHandler: Send {
    /// Accepts the next chunk. Returning false aborts the download.
    fn received_data(&mut self, data: &[u8]) -> bool;

    /// The body is complete or the load ended.
    fn complete(&mut self);
}

/// Rewrites body data on its way to the peer.
pub trait ContentFilter: Send {
    /// Transforms one chunk. May buffer and return less.
    fn process_data(&mut self, data: &[u8]) -> Vec<u8>;

    /// Returns whatever is still buffered once the body ended.
    fn drain(&mut self) -> Vec<u8> {
        Vec::new()
    }
}
