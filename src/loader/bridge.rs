//! The owner-thread handle of one load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::loader::context::LoaderContext;
use crate::loader::delegate::AsyncDelegate;
use crate::loader::peer::{PeerCell, ResourcePeer};
use crate::loader::proxy::{ProxyCommand, RequestProxy};
use crate::loader::sync_load::{SyncDelegate, SyncLoadResponse, SyncSlot};
use crate::loader::LoadError;
use crate::net::request::RequestParams;
use crate::net::transaction::{next_request_id, RequestId};
use crate::runtime::{OwnerTaskRunner, WaitableEvent};

/// Owner-side handle of a single request.
///
/// The bridge never touches IO-side state. Everything it asks of the load
/// is posted to the proxy task; everything the load reports arrives at the
/// peer through the owner loop.
pub struct ResourceLoaderBridge {
    context: Arc<LoaderContext>,
    params: Option<RequestParams>,
    owner: OwnerTaskRunner,
    peer: Arc<PeerCell>,
    commands: Option<mpsc::UnboundedSender<ProxyCommand>>,
    download_claimed: Arc<AtomicBool>,
    request_id: RequestId,
}

impl ResourceLoaderBridge {
    pub fn new(context: Arc<LoaderContext>, params: RequestParams, owner: OwnerTaskRunner) -> Self {
        Self {
            context,
            params: Some(params),
            owner,
            peer: PeerCell::new(),
            commands: None,
            download_claimed: Arc::new(AtomicBool::new(false)),
            request_id: next_request_id(),
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Starts the load. Returns immediately; progress arrives at `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::AlreadyStarted`] if the request was already
    /// started or loaded synchronously.
    pub fn start(&mut self, peer: Box<dyn ResourcePeer>) -> Result<(), LoadError> {
        let params = self.params.take().ok_or(LoadError::AlreadyStarted)?;
        self.peer.set(peer);

        let (tx, rx) = mpsc::unbounded_channel();
        let delegate = AsyncDelegate::new(
            self.request_id,
            self.owner.clone(),
            self.peer.clone(),
            tx.clone(),
        );
        let proxy = RequestProxy::new(
            self.request_id,
            self.context.services(),
            params,
            Box::new(delegate),
            rx,
            self.download_claimed.clone(),
        );

        self.context.io_thread().spawn(proxy.run());
        self.commands = Some(tx);
        debug!("Request {} started", self.request_id);
        Ok(())
    }

    /// Cancels the load. Has no effect once a download handler took over
    /// the response.
    pub fn cancel(&self) {
        if self.download_claimed.load(Ordering::SeqCst) {
            warn!(
                "Request {}: cancel refused, a download handler owns the response",
                self.request_id
            );
            return;
        }
        self.post(ProxyCommand::Cancel);
    }

    /// Pauses or resumes reading the response body.
    pub fn set_defers_loading(&self, defers: bool) {
        self.post(ProxyCommand::SetDefersLoading(defers));
    }

    /// Loads the request and blocks until it completes.
    ///
    /// Cross-origin redirects end the load as canceled. With
    /// `sync_load_timeout_ms` configured the load is canceled when the
    /// timeout expires.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::BlockingOnIoThread`] when called from the IO
    /// thread, [`LoadError::AlreadyStarted`] for a started request and
    /// [`LoadError::Timeout`] when the configured timeout expires.
    pub fn sync_load(&mut self) -> Result<SyncLoadResponse, LoadError> {
        if self.context.io_thread().is_current() {
            return Err(LoadError::BlockingOnIoThread);
        }
        let params = self.params.take().ok_or(LoadError::AlreadyStarted)?;

        let slot: SyncSlot = Arc::new(Mutex::new(None));
        let event = Arc::new(WaitableEvent::new(true, false));
        let delegate = SyncDelegate::new(params.request.url.clone(), slot.clone(), event.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        let proxy = RequestProxy::new(
            self.request_id,
            self.context.services(),
            params,
            Box::new(delegate),
            rx,
            self.download_claimed.clone(),
        );
        self.context.io_thread().spawn(proxy.run());
        debug!("Request {} loading synchronously", self.request_id);

        match self.context.settings().sync_load_timeout() {
            Some(timeout) => {
                if !event.timed_wait(timeout) {
                    warn!(
                        "Request {}: synchronous load timed out after {:?}",
                        self.request_id, timeout
                    );
                    let _ = tx.send(ProxyCommand::Cancel);
                    return Err(LoadError::Timeout);
                }
            }
            None => event.wait(),
        }
        // The sender stays alive until here; dropping it releases the proxy.
        drop(tx);

        let response = slot.lock().take();
        response.ok_or(LoadError::IoThreadGone)
    }

    fn post(&self, command: ProxyCommand) {
        match &self.commands {
            Some(commands) => {
                if commands.send(command).is_err() {
                    debug!("Request {} already finished", self.request_id);
                }
            }
            None => debug!("Request {} not started; ignoring {:?}", self.request_id, command),
        }
    }
}

impl Drop for ResourceLoaderBridge {
    fn drop(&mut self) {
        self.peer.drop_peer();
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(ProxyCommand::Release);
        }
    }
}

impl std::fmt::Debug for ResourceLoaderBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceLoaderBridge")
            .field("request_id", &self.request_id)
            .field("started", &self.params.is_none())
            .field("peer_attached", &self.peer.is_attached())
            .finish()
    }
}
