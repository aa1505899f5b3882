//! The owner-thread consumer of a load.

use std::sync::Arc;

use parking_lot::Mutex;
use url::Url;

use crate::net::response::{RequestStatus, ResponseInfo};

/// Answer to [`ResourcePeer::on_received_redirect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Follow the redirect.
    Follow,
    /// Follow, using a new first-party URL for cookie decisions.
    FollowWithFirstParty(Url),
    /// Cancel the load.
    Deny,
}

/// Receives the progress of one load on the owner thread.
///
/// Calls arrive in the order redirect* → response → data* → completion.
/// `on_completed_request` is called at most once and nothing follows it.
pub trait ResourcePeer: Send {
    fn on_upload_progress(&mut self, _position: u64, _size: u64) {}

    /// A redirect was received. The load waits for the answer.
    fn on_received_redirect(&mut self, _new_url: &Url, _info: &ResponseInfo) -> RedirectDecision {
        RedirectDecision::Follow
    }

    fn on_received_response(&mut self, info: &ResponseInfo);

    /// `len` bytes were written to the download file.
    fn on_downloaded_data(&mut self, _len: usize) {}

    fn on_received_data(&mut self, data: &[u8]);

    fn on_completed_request(&mut self, status: &RequestStatus);
}

#[derive(Default)]
struct PeerSlot {
    peer: Option<Box<dyn ResourcePeer>>,
    dropped: bool,
}

/// Holds the peer of one load.
///
/// The peer is taken out of the cell while it is being called, so a peer
/// may drop its own bridge from inside a callback.
#[derive(Default)]
pub(crate) struct PeerCell {
    slot: Mutex<PeerSlot>,
}

impl PeerCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set(&self, peer: Box<dyn ResourcePeer>) {
        let mut slot = self.slot.lock();
        slot.peer = Some(peer);
        slot.dropped = false;
    }

    /// Calls `f` with the peer, if it is still attached.
    pub(crate) fn with<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn ResourcePeer),
    {
        let Some(mut peer) = self.slot.lock().peer.take() else {
            return;
        };
        f(peer.as_mut());

        let mut slot = self.slot.lock();
        if !slot.dropped {
            slot.peer = Some(peer);
        }
    }

    /// Detaches the peer for good and returns it.
    pub(crate) fn take(&self) -> Option<Box<dyn ResourcePeer>> {
        let mut slot = self.slot.lock();
        slot.dropped = true;
        slot.peer.take()
    }

    /// Detaches the peer; no further calls reach it.
    pub(crate) fn drop_peer(&self) {
        let peer = self.take();
        drop(peer);
    }

    pub(crate) fn is_attached(&self) -> bool {
        let slot = self.slot.lock();
        !slot.dropped && slot.peer.is_some()
    }
}
