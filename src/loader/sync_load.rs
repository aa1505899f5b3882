//! Synchronous loads.
//!
//! The proxy runs as usual on the IO thread, but its delegate fills one
//! [`SyncLoadResponse`] in place and signals a [`WaitableEvent`] when the
//! load completes. The owner thread blocks on that event. Cross-origin
//! redirects are always denied because nobody can be asked to approve them.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::loader::delegate::{LoadDelegate, RedirectAction};
use crate::net::response::{RequestStatus, ResponseInfo};
use crate::net::transaction::UploadProgress;
use crate::runtime::WaitableEvent;

/// Everything a synchronous load produced.
#[derive(Debug, Clone)]
pub struct SyncLoadResponse {
    /// The URL the body came from, after redirects.
    pub url: Url,
    pub info: ResponseInfo,
    pub data: Vec<u8>,
    pub status: RequestStatus,
    /// Bytes written to the download file in download-to-file mode.
    pub downloaded_file_length: u64,
}

impl SyncLoadResponse {
    fn new(url: Url) -> Self {
        Self {
            url,
            info: ResponseInfo::default(),
            data: Vec::new(),
            status: RequestStatus::Success,
            downloaded_file_length: 0,
        }
    }
}

/// Slot the delegate hands its result over in.
pub(crate) type SyncSlot = Arc<Mutex<Option<SyncLoadResponse>>>;

pub(crate) struct SyncDelegate {
    response: Option<SyncLoadResponse>,
    slot: SyncSlot,
    event: Arc<WaitableEvent>,
}

impl SyncDelegate {
    pub(crate) fn new(url: Url, slot: SyncSlot, event: Arc<WaitableEvent>) -> Self {
        Self {
            response: Some(SyncLoadResponse::new(url)),
            slot,
            event,
        }
    }
}

/// Scheme, host and port comparison. Opaque origins (custom non-standard
/// schemes) compare by the same three parts.
pub(crate) fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

impl LoadDelegate for SyncDelegate {
    fn on_upload_progress(&mut self, _progress: UploadProgress) {}

    fn on_received_redirect(&mut self, new_url: &Url, _info: &ResponseInfo) -> RedirectAction {
        let Some(response) = self.response.as_mut() else {
            return RedirectAction::Cancel;
        };
        if !same_origin(&response.url, new_url) {
            warn!(
                "Denying cross-origin redirect from {} to {} in synchronous load",
                response.url, new_url
            );
            return RedirectAction::Cancel;
        }
        debug!("Synchronous load following redirect to {}", new_url);
        response.url = new_url.clone();
        RedirectAction::Follow
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        if let Some(response) = self.response.as_mut() {
            response.info = info.clone();
        }
    }

    fn on_received_data(&mut self, data: Bytes) {
        if let Some(response) = self.response.as_mut() {
            response.data.extend_from_slice(&data);
        }
    }

    fn on_downloaded_data(&mut self, len: usize) {
        if let Some(response) = self.response.as_mut() {
            response.downloaded_file_length += len as u64;
        }
    }

    fn on_completed_request(&mut self, status: RequestStatus) {
        if let Some(mut response) = self.response.take() {
            response.status = status;
            *self.slot.lock() = Some(response);
        }
        self.event.signal();
    }
}
