//! http/https transactions backed by `reqwest`.
//!
//! Redirects are never followed here: they are reported as
//! [`NetEvent::ReceivedRedirect`] so the request proxy can ask for approval.
//! Cookies go through the shared [`CookieStore`] using the same helpers as
//! the scheme job, so request headers carry resolved cookies and response
//! headers are reported only after every cookie write finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::header::{HeaderValue, CONTENT_LENGTH, REFERER, USER_AGENT, WWW_AUTHENTICATE};
use http::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::ProxyConfig;
use crate::net::cookies::{attach_request_cookies, save_response_cookies, CookiePolicy, CookieStore};
use crate::net::error::NetError;
use crate::net::request::Request;
use crate::net::response::ResponseInfo;
use crate::net::transaction::{
    AuthChallenge, Credentials, NetEvent, NetEventSender, NetworkRequest, NetworkStack,
    NetworkTransaction, UploadProgress,
};

/// Upload bodies are streamed in pieces of this size so progress can be
/// sampled while the body is sent.
const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Network stack for `http` and `https` URLs.
pub struct HttpNetworkStack {
    client: reqwest::Client,
    user_agent: Option<String>,
    cookie_store: Arc<dyn CookieStore>,
    cookie_policy: Arc<dyn CookiePolicy>,
}

impl HttpNetworkStack {
    /// Creates the stack, optionally routing every request through `proxy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the HTTP client cannot
    /// be constructed.
    pub fn new(
        user_agent: Option<String>,
        proxy: Option<&ProxyConfig>,
        cookie_store: Arc<dyn CookieStore>,
        cookie_policy: Arc<dyn CookiePolicy>,
    ) -> Result<Self, NetError> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(30));

        if let Some(config) = proxy {
            builder = builder.proxy(upstream_proxy(config)?);
        }

        let client = builder
            .build()
            .map_err(|e| {
                warn!("Failed to build HTTP client: {}", e);
                NetError::Failed
            })?;

        Ok(Self {
            client,
            user_agent,
            cookie_store,
            cookie_policy,
        })
    }
}

impl NetworkStack for HttpNetworkStack {
    fn handles_scheme(&self, scheme: &str) -> bool {
        scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https")
    }

    fn create_transaction(
        &self,
        request: NetworkRequest,
        events: NetEventSender,
    ) -> Box<dyn NetworkTransaction> {
        let upload_size = request
            .request
            .upload
            .as_ref()
            .map(|u| u.size())
            .unwrap_or(0);

        Box::new(HttpTransaction {
            pending: Some(request),
            driver: Some(Driver {
                client: self.client.clone(),
                user_agent: self.user_agent.clone(),
                cookie_store: self.cookie_store.clone(),
                cookie_policy: self.cookie_policy.clone(),
                events,
                upload_position: Arc::new(AtomicU64::new(0)),
            }),
            commands: None,
            task: None,
            upload_position: None,
            upload_size,
        })
    }
}

enum DriverCommand {
    Read(usize),
    Auth(Option<Credentials>),
}

struct HttpTransaction {
    pending: Option<NetworkRequest>,
    driver: Option<Driver>,
    commands: Option<mpsc::UnboundedSender<DriverCommand>>,
    task: Option<JoinHandle<()>>,
    upload_position: Option<Arc<AtomicU64>>,
    upload_size: u64,
}

impl NetworkTransaction for HttpTransaction {
    fn start(&mut self) {
        let (Some(request), Some(driver)) = (self.pending.take(), self.driver.take()) else {
            return;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        self.commands = Some(tx);
        self.upload_position = Some(driver.upload_position.clone());
        self.task = Some(tokio::spawn(driver.run(request, rx)));
    }

    fn read(&mut self, max_bytes: usize) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(DriverCommand::Read(max_bytes));
        }
    }

    fn cancel(&mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn upload_progress(&self) -> UploadProgress {
        UploadProgress {
            position: self
                .upload_position
                .as_ref()
                .map(|p| p.load(Ordering::SeqCst).min(self.upload_size))
                .unwrap_or(0),
            size: self.upload_size,
        }
    }

    fn set_auth(&mut self, credentials: Option<Credentials>) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(DriverCommand::Auth(credentials));
        }
    }
}

impl Drop for HttpTransaction {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Driver {
    client: reqwest::Client,
    user_agent: Option<String>,
    cookie_store: Arc<dyn CookieStore>,
    cookie_policy: Arc<dyn CookiePolicy>,
    events: NetEventSender,
    upload_position: Arc<AtomicU64>,
}

impl Driver {
    async fn run(self, request: NetworkRequest, mut commands: mpsc::UnboundedReceiver<DriverCommand>) {
        let request_id = request.metadata.request_id;
        let mut request = request.request;
        attach_request_cookies(&*self.cookie_store, &*self.cookie_policy, &mut request).await;

        let request_time = chrono::Utc::now();
        let mut response = match self.send(&request, None).await {
            Ok(response) => response,
            Err(error) => {
                let _ = self.events.send(NetEvent::ResponseStarted(Err(error)));
                return;
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(challenge) = parse_challenge(&request, &response) {
                debug!("Request {} requires credentials for {}", request_id, challenge.host);
                let _ = self.events.send(NetEvent::AuthRequired(challenge));
                let credentials = loop {
                    match commands.recv().await {
                        Some(DriverCommand::Auth(credentials)) => break credentials,
                        Some(DriverCommand::Read(_)) => continue,
                        None => return,
                    }
                };
                if let Some(credentials) = credentials {
                    response = match self.send(&request, Some(&credentials)).await {
                        Ok(response) => response,
                        Err(error) => {
                            let _ = self.events.send(NetEvent::ResponseStarted(Err(error)));
                            return;
                        }
                    };
                }
            }
        }

        let mut info = ResponseInfo::from_headers(response.status(), response.headers().clone());
        info.request_time = request_time;
        save_response_cookies(
            &*self.cookie_store,
            &*self.cookie_policy,
            &request,
            &info.headers,
        )
        .await;

        if info.status.is_redirection() {
            if let Some(new_url) = info.location().and_then(|l| request.url.join(l).ok()) {
                let _ = self.events.send(NetEvent::ReceivedRedirect { new_url, info });
                return;
            }
        }

        let _ = self.events.send(NetEvent::ResponseStarted(Ok(info)));

        let mut leftover = Bytes::new();
        while let Some(command) = commands.recv().await {
            let DriverCommand::Read(max_bytes) = command else {
                continue;
            };
            if leftover.is_empty() {
                match response.chunk().await {
                    Ok(Some(chunk)) => leftover = chunk,
                    Ok(None) => {
                        let _ = self.events.send(NetEvent::ReadCompleted(Ok(Bytes::new())));
                        return;
                    }
                    Err(e) => {
                        warn!("Request {} body read failed: {}", request_id, e);
                        let _ = self.events.send(NetEvent::ReadCompleted(Err(map_error(&e))));
                        return;
                    }
                }
            }
            let out = if leftover.len() > max_bytes {
                let rest = leftover.split_off(max_bytes);
                std::mem::replace(&mut leftover, rest)
            } else {
                std::mem::take(&mut leftover)
            };
            trace!("Request {} read {} bytes", request_id, out.len());
            let _ = self.events.send(NetEvent::ReadCompleted(Ok(out)));
        }
    }

    async fn send(
        &self,
        request: &Request,
        credentials: Option<&Credentials>,
    ) -> Result<reqwest::Response, NetError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(user_agent) = &self.user_agent {
            if !request.headers.contains_key(USER_AGENT) {
                builder = builder.header(USER_AGENT, user_agent.as_str());
            }
        }
        if let Some(referrer) = &request.referrer {
            if let Ok(value) = HeaderValue::from_str(referrer.as_str()) {
                builder = builder.header(REFERER, value);
            }
        }
        if let Some(credentials) = credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        if let Some(upload) = request.upload.clone().filter(|u| !u.is_empty()) {
            let data = tokio::task::spawn_blocking(move || upload.read_all())
                .await
                .map_err(|_| NetError::Failed)?
                .map_err(|_| NetError::FileNotFound)?;
            let length = data.len();
            self.upload_position.store(0, Ordering::SeqCst);
            let position = self.upload_position.clone();
            let pieces: Vec<Bytes> = data
                .chunks(UPLOAD_CHUNK_SIZE)
                .map(Bytes::copy_from_slice)
                .collect();
            let stream = futures::stream::iter(pieces).map(move |piece| {
                position.fetch_add(piece.len() as u64, Ordering::SeqCst);
                Ok::<_, std::io::Error>(piece)
            });
            builder = builder
                .header(CONTENT_LENGTH, length)
                .body(reqwest::Body::wrap_stream(stream));
        }

        builder.send().await.map_err(|e| {
            debug!("Request to {} failed: {}", request.url, e);
            map_error(&e)
        })
    }
}

fn map_error(error: &reqwest::Error) -> NetError {
    if error.is_connect() {
        NetError::ConnectionFailed
    } else if error.is_builder() {
        NetError::InvalidUrl
    } else {
        NetError::Failed
    }
}

fn parse_challenge(request: &Request, response: &reqwest::Response) -> Option<AuthChallenge> {
    let header = response.headers().get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
    let realm = params
        .split(',')
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .unwrap_or_default();

    Some(AuthChallenge {
        is_proxy: false,
        host: request.url.host_str().unwrap_or_default().to_string(),
        port: request.url.port_or_known_default().unwrap_or(0),
        realm,
        scheme: scheme.to_ascii_lowercase(),
    })
}

/// Translates the configured proxy. Credentials go into
/// `Proxy-Authorization`, never into the URL.
fn upstream_proxy(config: &ProxyConfig) -> Result<reqwest::Proxy, NetError> {
    let endpoint = config.endpoint().map_err(|e| {
        warn!("{}", e);
        NetError::InvalidArgument
    })?;
    let mut proxy = reqwest::Proxy::all(endpoint.as_str()).map_err(|e| {
        warn!("Invalid proxy {}: {}", endpoint, e);
        NetError::InvalidArgument
    })?;
    if let Some(username) = &config.username {
        proxy = proxy.basic_auth(username, config.password.as_deref().unwrap_or_default());
    }
    if let Some(bypass) = config.bypass_list() {
        debug!("Proxy bypass: {}", bypass);
        proxy = proxy.no_proxy(reqwest::NoProxy::from_string(&bypass));
    }
    Ok(proxy)
}
