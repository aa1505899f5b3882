//! The boundary to the network layer.
//!
//! A [`NetworkTransaction`] is driven by the request proxy through plain
//! method calls and reports progress by sending [`NetEvent`]s over the channel
//! it was created with. Transactions are always created and driven from the
//! IO runtime, so implementations may `tokio::spawn` their own work.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::net::error::NetError;
use crate::net::request::{Request, RequestPriority, ResourceType};
use crate::net::response::ResponseInfo;

/// Identifier assigned to every load.
pub type RequestId = u64;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a new process-unique request id.
pub fn next_request_id() -> RequestId {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// Per-request context attached to every transaction so that code further
/// down the stack can recover who issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub request_id: RequestId,
    pub browser_id: Option<Uuid>,
    pub resource_type: ResourceType,
}

/// A request handed to the network layer.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub request: Request,
    pub priority: RequestPriority,
    pub metadata: RequestMetadata,
}

/// Upload position sampled from a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub position: u64,
    pub size: u64,
}

/// Authentication challenge raised by a server or proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub is_proxy: bool,
    pub host: String,
    pub port: u16,
    pub realm: String,
    pub scheme: String,
}

/// Credentials supplied in answer to an [`AuthChallenge`].
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Progress reported by a transaction.
#[derive(Debug)]
pub enum NetEvent {
    /// The server answered with a redirect. The transaction stays paused
    /// until it is dropped; following happens with a fresh transaction.
    ReceivedRedirect { new_url: Url, info: ResponseInfo },

    /// Response headers are complete, or the transaction failed before that.
    ResponseStarted(Result<ResponseInfo, NetError>),

    /// A read finished. An empty buffer marks the end of the body.
    ReadCompleted(Result<Bytes, NetError>),

    /// Credentials are needed to continue.
    AuthRequired(AuthChallenge),
}

/// Sender half handed to transactions.
pub type NetEventSender = mpsc::UnboundedSender<NetEvent>;

/// Receiver half owned by the request proxy.
pub type NetEventReceiver = mpsc::UnboundedReceiver<NetEvent>;

/// A single request/response exchange with the network layer.
pub trait NetworkTransaction: Send {
    /// Begins the exchange. Answers with `ReceivedRedirect`, `ResponseStarted`
    /// or `AuthRequired`.
    fn start(&mut self);

    /// Requests up to `max_bytes` of body. Answers with `ReadCompleted`.
    fn read(&mut self, max_bytes: usize);

    /// Aborts the exchange. No further events are expected afterwards.
    fn cancel(&mut self);

    /// Samples upload progress.
    fn upload_progress(&self) -> UploadProgress {
        UploadProgress::default()
    }

    /// Answers an authentication challenge. `None` continues without
    /// credentials.
    fn set_auth(&mut self, _credentials: Option<Credentials>) {}
}

/// Creates transactions for the schemes it understands.
pub trait NetworkStack: Send + Sync {
    /// Returns true if this stack can load URLs with `scheme`.
    fn handles_scheme(&self, scheme: &str) -> bool;

    /// Creates a transaction for `request` reporting on `events`.
    fn create_transaction(
        &self,
        request: NetworkRequest,
        events: NetEventSender,
    ) -> Box<dyn NetworkTransaction>;
}
