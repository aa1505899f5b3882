//! Per-scheme dispatch of requests to transactions.
//!
//! The scheme registry installs a [`ProtocolHandler`] here for every scheme
//! that has a handler factory; everything else goes to the network stack.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::net::error::NetError;
use crate::net::transaction::{NetEventSender, NetworkRequest, NetworkStack, NetworkTransaction};

/// Creates transactions for one scheme.
pub trait ProtocolHandler: Send + Sync {
    /// Returns a transaction for `request`, or `None` to fall through to the
    /// network stack.
    fn create_job(
        &self,
        request: &NetworkRequest,
        events: &NetEventSender,
    ) -> Option<Box<dyn NetworkTransaction>>;
}

/// Chooses the transaction implementation for each request.
pub struct JobFactory {
    handlers: RwLock<HashMap<String, Arc<dyn ProtocolHandler>>>,
    network: Arc<dyn NetworkStack>,
}

impl JobFactory {
    /// Creates a factory that falls back to `network`.
    pub fn new(network: Arc<dyn NetworkStack>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            network,
        }
    }

    /// Installs or, with `None`, removes the protocol handler for `scheme`.
    /// Returns true if a handler was previously installed.
    pub fn set_protocol_handler(
        &self,
        scheme: &str,
        handler: Option<Arc<dyn ProtocolHandler>>,
    ) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        let mut handlers = self.handlers.write();
        match handler {
            Some(handler) => handlers.insert(scheme, handler).is_some(),
            None => handlers.remove(&scheme).is_some(),
        }
    }

    /// Returns true if a protocol handler is installed for `scheme`.
    pub fn has_protocol_handler(&self, scheme: &str) -> bool {
        self.handlers.read().contains_key(&scheme.to_ascii_lowercase())
    }

    /// Returns true if any transaction source can load `scheme`.
    pub fn is_handled_scheme(&self, scheme: &str) -> bool {
        self.has_protocol_handler(scheme) || self.network.handles_scheme(scheme)
    }

    /// Creates a transaction for `request`.
    pub fn create_transaction(
        &self,
        request: NetworkRequest,
        events: NetEventSender,
    ) -> Result<Box<dyn NetworkTransaction>, NetError> {
        let scheme = request.request.url.scheme().to_ascii_lowercase();
        let handler = self.handlers.read().get(&scheme).cloned();

        if let Some(handler) = handler {
            if let Some(job) = handler.create_job(&request, &events) {
                trace!(
                    "Request {} served by protocol handler for {}",
                    request.metadata.request_id,
                    scheme
                );
                return Ok(job);
            }
        }

        if self.network.handles_scheme(&scheme) {
            return Ok(self.network.create_transaction(request, events));
        }

        Err(NetError::UnknownUrlScheme)
    }
}

impl std::fmt::Debug for JobFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<String> = self.handlers.read().keys().cloned().collect();
        schemes.sort();
        f.debug_struct("JobFactory")
            .field("protocol_handlers", &schemes)
            .finish()
    }
}
