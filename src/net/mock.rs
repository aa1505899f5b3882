//! Scripted network stack for tests.
//!
//! [`MockNetworkStack`] serves canned responses, redirects and failures
//! without touching the network, in the same spirit as a mock browser engine:
//! deterministic behaviour for unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, StatusCode};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use crate::net::error::NetError;
use crate::net::response::ResponseInfo;
use crate::net::transaction::{
    AuthChallenge, Credentials, NetEvent, NetEventSender, NetworkRequest, NetworkStack,
    NetworkTransaction, UploadProgress,
};

/// Releases body chunks of a gated [`MockResponse`] one at a time.
#[derive(Debug, Clone)]
pub struct MockGate {
    permits: Arc<Semaphore>,
}

impl MockGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Allows `chunks` more body chunks through.
    pub fn release(&self, chunks: usize) {
        self.permits.add_permits(chunks);
    }
}

impl Default for MockGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub chunks: Vec<Bytes>,
    pub gate: Option<MockGate>,
    /// Bytes the upload advances per progress sample; 0 completes at once.
    /// With a non-zero step the response starts only once the upload is done.
    pub upload_step: u64,
}

impl MockResponse {
    /// Creates a response with a single-chunk body.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: HeaderMap::new(),
            chunks: if body.is_empty() { Vec::new() } else { vec![body] },
            gate: None,
            upload_step: 0,
        }
    }

    /// Creates a `200 OK` text/html response.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
    }

    /// Replaces the body with several chunks, each delivered by its own read.
    pub fn with_chunks<I, B>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Makes every chunk wait for a permit from `gate`.
    pub fn with_gate(mut self, gate: MockGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Advances the upload by `step` bytes per progress sample.
    pub fn with_upload_step(mut self, step: u64) -> Self {
        self.upload_step = step;
        self
    }

    fn info(&self) -> ResponseInfo {
        ResponseInfo::from_headers(self.status, self.headers.clone())
    }
}

/// What a route does when requested.
#[derive(Debug, Clone)]
pub enum MockRoute {
    /// Serve a response.
    Respond(MockResponse),
    /// Answer with a redirect to `location` (resolved against the request URL).
    Redirect { status: StatusCode, location: String },
    /// Fail before headers.
    Fail(NetError),
    /// Ask for credentials; serve `response` only if `expected` is supplied.
    Auth {
        challenge: AuthChallenge,
        expected: Credentials,
        response: MockResponse,
    },
}

/// Network stack serving [`MockRoute`]s keyed by URL.
pub struct MockNetworkStack {
    schemes: Vec<String>,
    routes: RwLock<HashMap<String, MockRoute>>,
    requests: Mutex<Vec<NetworkRequest>>,
}

impl MockNetworkStack {
    /// Creates a stack handling `http` and `https` with no routes.
    pub fn new() -> Self {
        Self {
            schemes: vec!["http".to_string(), "https".to_string()],
            routes: RwLock::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Adds a route.
    pub fn with_route(self, url: &str, route: MockRoute) -> Self {
        self.add_route(url, route);
        self
    }

    /// Adds a route to an existing stack.
    pub fn add_route(&self, url: &str, route: MockRoute) {
        self.routes.write().insert(normalize(url), route);
    }

    /// Adds a `200 OK` route serving `body`.
    pub fn with_response(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.with_route(url, MockRoute::Respond(MockResponse::ok(body)))
    }

    /// Returns every request seen so far, in order.
    pub fn requests(&self) -> Vec<NetworkRequest> {
        self.requests.lock().clone()
    }
}

impl Default for MockNetworkStack {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

impl NetworkStack for MockNetworkStack {
    fn handles_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme))
    }

    fn create_transaction(
        &self,
        request: NetworkRequest,
        events: NetEventSender,
    ) -> Box<dyn NetworkTransaction> {
        let route = self
            .routes
            .read()
            .get(request.request.url.as_str())
            .cloned()
            .unwrap_or_else(|| {
                MockRoute::Respond(MockResponse::new(StatusCode::NOT_FOUND, "not found"))
            });
        self.requests.lock().push(request.clone());

        let upload_size = request
            .request
            .upload
            .as_ref()
            .map(|u| u.size())
            .unwrap_or(0);

        Box::new(MockTransaction {
            request,
            route,
            events,
            chunks: VecDeque::new(),
            gate: None,
            upload_size,
            upload_step: 0,
            upload_position: AtomicU64::new(0),
            held_response: Mutex::new(None),
            canceled: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct MockTransaction {
    request: NetworkRequest,
    route: MockRoute,
    events: NetEventSender,
    chunks: VecDeque<Bytes>,
    gate: Option<MockGate>,
    upload_size: u64,
    upload_step: u64,
    upload_position: AtomicU64,
    held_response: Mutex<Option<ResponseInfo>>,
    canceled: Arc<AtomicBool>,
}

impl MockTransaction {
    fn respond(&mut self, response: MockResponse) {
        self.chunks = response.chunks.iter().cloned().collect();
        self.gate = response.gate.clone();
        self.upload_step = response.upload_step;
        if self.upload_step == 0 || self.upload_size == 0 {
            self.upload_step = 0;
            self.upload_position.store(self.upload_size, Ordering::SeqCst);
            let _ = self.events.send(NetEvent::ResponseStarted(Ok(response.info())));
        } else {
            *self.held_response.lock() = Some(response.info());
        }
    }
}

impl NetworkTransaction for MockTransaction {
    fn start(&mut self) {
        match self.route.clone() {
            MockRoute::Respond(response) => self.respond(response),
            MockRoute::Redirect { status, location } => {
                let event = match self.request.request.url.join(&location) {
                    Ok(new_url) => {
                        let mut info = ResponseInfo::new(status);
                        if let Ok(value) = HeaderValue::from_str(new_url.as_str()) {
                            info.headers.insert(http::header::LOCATION, value);
                        }
                        NetEvent::ReceivedRedirect { new_url, info }
                    }
                    Err(_) => NetEvent::ResponseStarted(Err(NetError::InvalidUrl)),
                };
                let _ = self.events.send(event);
            }
            MockRoute::Fail(error) => {
                let _ = self.events.send(NetEvent::ResponseStarted(Err(error)));
            }
            MockRoute::Auth { challenge, .. } => {
                let _ = self.events.send(NetEvent::AuthRequired(challenge));
            }
        }
    }

    fn read(&mut self, max_bytes: usize) {
        let chunk = match self.chunks.pop_front() {
            Some(mut chunk) if chunk.len() > max_bytes => {
                let rest = chunk.split_off(max_bytes);
                self.chunks.push_front(rest);
                chunk
            }
            Some(chunk) => chunk,
            None => Bytes::new(),
        };

        match (&self.gate, chunk.is_empty()) {
            (Some(gate), false) => {
                let permits = gate.permits.clone();
                let events = self.events.clone();
                let canceled = self.canceled.clone();
                tokio::spawn(async move {
                    if let Ok(permit) = permits.acquire().await {
                        permit.forget();
                        if !canceled.load(Ordering::SeqCst) {
                            let _ = events.send(NetEvent::ReadCompleted(Ok(chunk)));
                        }
                    }
                });
            }
            _ => {
                let _ = self.events.send(NetEvent::ReadCompleted(Ok(chunk)));
            }
        }
    }

    fn cancel(&mut self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    fn upload_progress(&self) -> UploadProgress {
        let position = if self.upload_step == 0 {
            self.upload_position.load(Ordering::SeqCst)
        } else {
            let previous = self.upload_position.load(Ordering::SeqCst);
            let next = (previous + self.upload_step).min(self.upload_size);
            self.upload_position.store(next, Ordering::SeqCst);
            if next == self.upload_size && !self.canceled.load(Ordering::SeqCst) {
                if let Some(info) = self.held_response.lock().take() {
                    let _ = self.events.send(NetEvent::ResponseStarted(Ok(info)));
                }
            }
            next
        };
        UploadProgress {
            position,
            size: self.upload_size,
        }
    }

    fn set_auth(&mut self, credentials: Option<Credentials>) {
        let MockRoute::Auth {
            expected, response, ..
        } = self.route.clone()
        else {
            return;
        };
        if credentials.as_ref() == Some(&expected) {
            self.respond(response);
        } else {
            self.respond(MockResponse::new(StatusCode::UNAUTHORIZED, "unauthorized"));
        }
    }
}
