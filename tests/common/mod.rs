//! Shared fixtures for the integration tests.
//!
//! A [`RecordingPeer`] logs every notification it receives so tests can
//! assert on ordering; [`Harness`] wires a loader context around a
//! [`MockNetworkStack`] and pumps an owner loop on the test thread.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use ki_resource_loader::config::LoaderSettings;
use ki_resource_loader::handler::RequestHandler;
use ki_resource_loader::loader::{
    LoaderContext, LoaderContextBuilder, RedirectDecision, ResourceLoaderBridge, ResourcePeer,
};
use ki_resource_loader::net::{MockNetworkStack, RequestParams, RequestStatus, ResponseInfo};
use ki_resource_loader::runtime::OwnerLoop;

pub const WAIT: Duration = Duration::from_secs(5);

/// One notification seen by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    UploadProgress(u64, u64),
    Redirect(String),
    Response(u16),
    Data(Vec<u8>),
    Downloaded(usize),
    Complete(RequestStatus),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// Peer that records notifications and answers redirects with a fixed
/// decision.
pub struct RecordingPeer {
    log: EventLog,
    redirect_decision: RedirectDecision,
}

impl RecordingPeer {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            redirect_decision: RedirectDecision::Follow,
        }
    }

    pub fn with_redirect_decision(mut self, decision: RedirectDecision) -> Self {
        self.redirect_decision = decision;
        self
    }
}

impl ResourcePeer for RecordingPeer {
    fn on_upload_progress(&mut self, position: u64, size: u64) {
        self.log.lock().push(Event::UploadProgress(position, size));
    }

    fn on_received_redirect(&mut self, new_url: &Url, _info: &ResponseInfo) -> RedirectDecision {
        self.log.lock().push(Event::Redirect(new_url.to_string()));
        self.redirect_decision.clone()
    }

    fn on_received_response(&mut self, info: &ResponseInfo) {
        self.log.lock().push(Event::Response(info.status.as_u16()));
    }

    fn on_downloaded_data(&mut self, len: usize) {
        self.log.lock().push(Event::Downloaded(len));
    }

    fn on_received_data(&mut self, data: &[u8]) {
        self.log.lock().push(Event::Data(data.to_vec()));
    }

    fn on_completed_request(&mut self, status: &RequestStatus) {
        self.log.lock().push(Event::Complete(status.clone()));
    }
}

/// Loader context plus an owner loop on the current thread.
pub struct Harness {
    pub context: Arc<LoaderContext>,
    pub network: Arc<MockNetworkStack>,
    pub owner: OwnerLoop,
}

impl Harness {
    pub fn new(network: MockNetworkStack) -> Self {
        Self::with_settings(network, LoaderSettings::default(), None)
    }

    pub fn with_settings(
        network: MockNetworkStack,
        settings: LoaderSettings,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Self {
        Self::with_builder(network, settings, |builder| match handler {
            Some(handler) => builder.request_handler(handler),
            None => builder,
        })
    }

    /// Builds the context after `configure` had its say.
    pub fn with_builder<F>(network: MockNetworkStack, settings: LoaderSettings, configure: F) -> Self
    where
        F: FnOnce(LoaderContextBuilder) -> LoaderContextBuilder,
    {
        let network = Arc::new(network);
        let builder = LoaderContext::builder(settings).network_stack(network.clone());
        let context = Arc::new(configure(builder).build().expect("loader context"));
        Self {
            context,
            network,
            owner: OwnerLoop::new().expect("owner loop"),
        }
    }

    pub fn bridge(&self, params: RequestParams) -> ResourceLoaderBridge {
        ResourceLoaderBridge::new(self.context.clone(), params, self.owner.runner())
    }

    /// Starts `params` with a recording peer and returns the bridge.
    pub fn start(&self, params: RequestParams, log: &EventLog) -> ResourceLoaderBridge {
        self.start_with(params, RecordingPeer::new(log.clone()))
    }

    pub fn start_with(&self, params: RequestParams, peer: RecordingPeer) -> ResourceLoaderBridge {
        let mut bridge = self.bridge(params);
        bridge.start(Box::new(peer)).expect("start");
        bridge
    }

    /// Pumps the owner loop until `log` satisfies `pred`.
    pub fn wait_for<F>(&mut self, log: &EventLog, pred: F) -> bool
    where
        F: Fn(&[Event]) -> bool,
    {
        self.owner.run_until(|| pred(log.lock().as_slice()), WAIT)
    }

    /// Pumps the owner loop until the load completed.
    pub fn wait_for_completion(&mut self, log: &EventLog) -> bool {
        self.wait_for(log, |events| {
            events.iter().any(|e| matches!(e, Event::Complete(_)))
        })
    }
}

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn params(url: &str) -> RequestParams {
    RequestParams::parse(url).expect("valid url")
}

/// Concatenates every `Data` event.
pub fn body(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Data(data) => Some(data.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

pub fn completions(events: &[Event]) -> Vec<RequestStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Complete(status) => Some(status.clone()),
            _ => None,
        })
        .collect()
}

/// Polls `pred` until it holds or [`WAIT`] elapses. For state that changes
/// without anything being posted to the owner loop.
pub fn poll_until<F>(pred: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = std::time::Instant::now() + WAIT;
    while std::time::Instant::now() < deadline {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    pred()
}
