//! Where the proxy sends its notifications.
//!
//! The asynchronous delegate posts each notification to the owner loop; the
//! synchronous one (in `sync_load`) collects them in place.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;
use url::Url;

use crate::loader::peer::{PeerCell, RedirectDecision};
use crate::loader::proxy::ProxyCommand;
use crate::net::response::{RequestStatus, ResponseInfo};
use crate::net::transaction::{RequestId, UploadProgress};
use crate::runtime::OwnerTaskRunner;

/// How the proxy continues after a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RedirectAction {
    Follow,
    Cancel,
    /// An answer will arrive as a proxy command.
    AwaitApproval,
}

/// Receiver of proxy notifications. Lives on the IO thread.
pub(crate) trait LoadDelegate: Send {
    fn on_upload_progress(&mut self, progress: UploadProgress);

    fn on_received_redirect(&mut self, new_url: &Url, info: &ResponseInfo) -> RedirectAction;

    fn on_received_response(&mut self, info: &ResponseInfo);

    fn on_received_data(&mut self, data: Bytes);

    fn on_downloaded_data(&mut self, len: usize);

    fn on_completed_request(&mut self, status: RequestStatus);
}

/// Posts every notification to the owner thread's peer.
pub(crate) struct AsyncDelegate {
    request_id: RequestId,
    owner: OwnerTaskRunner,
    peer: Arc<PeerCell>,
    commands: mpsc::UnboundedSender<ProxyCommand>,
}

impl AsyncDelegate {
    pub(crate) fn new(
        request_id: RequestId,
        owner: OwnerTaskRunner,
        peer: Arc<PeerCell>,
        commands: mpsc::UnboundedSender<ProxyCommand>,
    ) -> Self {
        Self {
            request_id,
            owner,
            peer,
            commands,
        }
    }

    fn post<F>(&self, f: F)
    where
        F: FnOnce(&Arc<PeerCell>) + Send + 'static,
    {
        let peer = self.peer.clone();
        if !self.owner.post(move || f(&peer)) {
            trace!("Owner loop gone; dropping notification for request {}", self.request_id);
        }
    }
}

impl LoadDelegate for AsyncDelegate {
    fn on_upload_progress(&mut self, progress: UploadProgress) {
        self.post(move |peer| {
            peer.with(|p| p.on_upload_progress(progress.position, progress.size));
        });
    }

    fn on_received_redirect(&mut self, new_url: &Url, info: &ResponseInfo) -> RedirectAction {
        let new_url = new_url.clone();
        let info = info.clone();
        let commands = self.commands.clone();
        self.post(move |peer| {
            // A detached peer cannot approve anything; the load is being
            // released anyway.
            let mut decision = RedirectDecision::Deny;
            peer.with(|p| decision = p.on_received_redirect(&new_url, &info));

            let command = match decision {
                RedirectDecision::Follow => ProxyCommand::FollowDeferredRedirect {
                    new_first_party: None,
                },
                RedirectDecision::FollowWithFirstParty(url) => {
                    ProxyCommand::FollowDeferredRedirect {
                        new_first_party: Some(url),
                    }
                }
                RedirectDecision::Deny => ProxyCommand::Cancel,
            };
            let _ = commands.send(command);
        });
        RedirectAction::AwaitApproval
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        let info = info.clone();
        self.post(move |peer| peer.with(|p| p.on_received_response(&info)));
    }

    fn on_received_data(&mut self, data: Bytes) {
        self.post(move |peer| peer.with(|p| p.on_received_data(&data)));
    }

    fn on_downloaded_data(&mut self, len: usize) {
        self.post(move |peer| peer.with(|p| p.on_downloaded_data(len)));
    }

    fn on_completed_request(&mut self, status: RequestStatus) {
        self.post(move |peer| {
            if let Some(mut p) = peer.take() {
                p.on_completed_request(&status);
            }
        });
    }
}
