//! Custom scheme handler interfaces.
//!
//! A [`SchemeHandler`] acts as a virtual network transaction. It is given
//! the request and a [`SchemeHandlerCallback`], reports headers with
//! [`SchemeHandlerCallback::headers_available`] and body availability with
//! [`SchemeHandlerCallback::bytes_available`]. Both may be called from any
//! thread; the call is queued onto the job that owns the handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::net::request::{BrowserInfo, Request};
use crate::net::response::ResponseInfo;

/// Headers reported by a scheme handler.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    pub response: ResponseInfo,
    /// Body length if known. Overrides any `Content-Length` header.
    pub content_length: Option<u64>,
    /// Answer with a redirect to this URL instead of a body.
    pub redirect_url: Option<Url>,
}

impl ResponseHeaders {
    pub fn new(response: ResponseInfo) -> Self {
        Self {
            response,
            content_length: None,
            redirect_url: None,
        }
    }

    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn with_redirect(mut self, url: Url) -> Self {
        self.redirect_url = Some(url);
        self
    }
}

/// Result of [`SchemeHandler::read_response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the buffer. `Data(0)` ends the body.
    Data(usize),
    /// Nothing yet; the handler will call `bytes_available` later.
    Pending,
    /// The body is complete.
    Complete,
}

/// Serves one request for a custom scheme.
pub trait SchemeHandler: Send {
    /// Starts processing. Returns false to decline the request, which
    /// completes it as aborted.
    fn process_request(&mut self, request: &Request, callback: SchemeHandlerCallback) -> bool;

    /// Returns the response headers. Called once after `headers_available`.
    fn get_response_headers(&mut self) -> ResponseHeaders;

    /// Copies body data into `buf`.
    fn read_response(&mut self, buf: &mut [u8], callback: &SchemeHandlerCallback) -> ReadOutcome;

    /// The request was canceled. Called at most once.
    fn cancel(&mut self) {}
}

/// Creates scheme handlers for registered (scheme, domain) pairs.
pub trait SchemeHandlerFactory: Send + Sync {
    /// Returns a handler for `request`, or `None` to let the request fall
    /// through to the network stack.
    fn create(
        &self,
        browser: Option<&BrowserInfo>,
        scheme: &str,
        request: &Request,
    ) -> Option<Box<dyn SchemeHandler>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackSignal {
    HeadersAvailable,
    BytesAvailable,
    Cancel,
}

struct CallbackInner {
    signals: mpsc::UnboundedSender<CallbackSignal>,
    detached: AtomicBool,
}

/// Continuation handed to a [`SchemeHandler`].
///
/// Once the job is canceled or finished the callback is detached and every
/// method becomes a no-op.
#[derive(Clone)]
pub struct SchemeHandlerCallback {
    inner: Arc<CallbackInner>,
}

impl SchemeHandlerCallback {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<CallbackSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let callback = Self {
            inner: Arc::new(CallbackInner {
                signals,
                detached: AtomicBool::new(false),
            }),
        };
        (callback, rx)
    }

    /// Response headers can now be fetched.
    pub fn headers_available(&self) {
        self.signal(CallbackSignal::HeadersAvailable);
    }

    /// Body data for the pending read can now be fetched.
    pub fn bytes_available(&self) {
        self.signal(CallbackSignal::BytesAvailable);
    }

    /// The handler gives up on the request.
    pub fn cancel(&self) {
        self.signal(CallbackSignal::Cancel);
    }

    /// Returns true once the owning job no longer listens.
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    pub(crate) fn detach(&self) {
        self.inner.detached.store(true, Ordering::SeqCst);
    }

    fn signal(&self, signal: CallbackSignal) {
        if self.is_detached() {
            trace!("Ignoring {:?} on detached scheme callback", signal);
            return;
        }
        let _ = self.inner.signals.send(signal);
    }
}

impl std::fmt::Debug for SchemeHandlerCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeHandlerCallback")
            .field("detached", &self.is_detached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_are_queued_in_order() {
        let (callback, mut rx) = SchemeHandlerCallback::new();
        let from_thread = callback.clone();
        std::thread::spawn(move || from_thread.headers_available())
            .join()
            .unwrap();
        callback.bytes_available();

        assert_eq!(rx.try_recv().unwrap(), CallbackSignal::HeadersAvailable);
        assert_eq!(rx.try_recv().unwrap(), CallbackSignal::BytesAvailable);
    }

    #[test]
    fn test_detached_callback_is_noop() {
        let (callback, mut rx) = SchemeHandlerCallback::new();
        let clone = callback.clone();
        callback.detach();

        assert!(clone.is_detached());
        clone.headers_available();
        clone.cancel();
        assert!(rx.try_recv().is_err());
    }
}
