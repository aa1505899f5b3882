//! Resource loading across the owner and IO threads.
//!
//! A [`ResourceLoaderBridge`] is created on the owner thread for each
//! request. Starting it moves the request into a proxy task on the IO
//! thread, which drives the transaction and posts notifications back to the
//! bridge's [`ResourcePeer`] through the owner loop:
//!
//! ```text
//! owner thread                      IO thread
//! ------------                      ---------
//! bridge.start(peer) ── spawn ───▶ proxy: before-load hook
//!                                   job factory → transaction
//! peer.on_received_redirect ◀────── redirect (awaits approval)
//!           └──── follow / cancel ─▶ new transaction
//! peer.on_received_response ◀────── response
//! peer.on_received_data ◀────────── data (next read already queued)
//! peer.on_completed_request ◀────── done
//! ```

mod bridge;
mod context;
mod delegate;
mod peer;
mod proxy;
mod sync_load;

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::error::NetError;

pub use bridge::ResourceLoaderBridge;
pub use context::{LoaderContext, LoaderContextBuilder};
pub use peer::{RedirectDecision, ResourcePeer};
pub use proxy::ProxyState;
pub use sync_load::SyncLoadResponse;

/// Errors reported by the bridge itself. Failures of the load are
/// reported through [`ResourcePeer::on_completed_request`] instead.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("request was already started")]
    AlreadyStarted,

    #[error("synchronous load called from the IO thread")]
    BlockingOnIoThread,

    #[error("synchronous load timed out")]
    Timeout,

    #[error("IO thread stopped before the load completed")]
    IoThreadGone,

    #[error("network stack error: {0}")]
    Network(#[from] NetError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
