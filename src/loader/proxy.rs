//! The IO-thread request proxy.
//!
//! One proxy task exists per load. It owns the request, the transaction and
//! every piece of IO-side state; the owner thread only reaches it through
//! [`ProxyCommand`]s. The task loop is biased towards commands, so a cancel
//! takes effect before any event that is already queued.
//!
//! ```text
//! Idle → Starting → Handled ─────────────┐
//!                 └→ NetworkActive → Responding → Streaming → Done
//! ```

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, LOCATION};
use http::{Method, StatusCode};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::handler::{BeforeLoadAction, ContentFilter, DownloadHandler};
use crate::loader::context::LoaderServices;
use crate::loader::delegate::{LoadDelegate, RedirectAction};
use crate::net::error::NetError;
use crate::net::request::{LoadFlags, Request, RequestParams};
use crate::net::response::{RequestStatus, ResponseInfo};
use crate::net::transaction::{
    AuthChallenge, NetEvent, NetEventReceiver, NetworkRequest, NetworkTransaction, RequestId,
    RequestMetadata, UploadProgress,
};

/// Lifecycle of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Idle,
    Starting,
    /// The request handler answers the request from a stream.
    Handled,
    /// A transaction is running and no response arrived yet.
    NetworkActive,
    /// A redirect or response is being reported.
    Responding,
    Streaming,
    Done,
}

/// Messages from the owner thread.
#[derive(Debug)]
pub(crate) enum ProxyCommand {
    Cancel,
    SetDefersLoading(bool),
    FollowDeferredRedirect { new_first_party: Option<Url> },
    /// The bridge is gone.
    Release,
}

/// Redirect waiting for approval.
#[derive(Debug)]
struct PendingRedirect {
    new_url: Url,
    status: StatusCode,
}

/// Upload progress throttle state.
#[derive(Debug)]
struct UploadTracker {
    last_position: u64,
    last_update: Instant,
    finished_sent: bool,
}

/// Updates are sent when the upload advanced by more than 1/200 of its size.
const UPLOAD_PROGRESS_STEPS: u64 = 200;

pub(crate) struct RequestProxy {
    id: RequestId,
    services: Arc<LoaderServices>,
    params: RequestParams,
    delegate: Box<dyn LoadDelegate>,
    commands: mpsc::UnboundedReceiver<ProxyCommand>,
    released: bool,
    state: ProxyState,

    transaction: Option<Box<dyn NetworkTransaction>>,
    events: Option<NetEventReceiver>,
    handled_stream: Option<Box<dyn Read + Send>>,
    stream_read_queued: bool,

    defers_loading: bool,
    read_wanted: bool,
    deferred_read: Option<Result<Bytes, NetError>>,

    pending_redirect: Option<PendingRedirect>,
    redirect_count: u32,

    upload: Option<UploadTracker>,
    upload_timer: Option<Interval>,

    filter: Option<Box<dyn ContentFilter>>,
    download: Option<Box<dyn DownloadHandler>>,
    download_claimed: Arc<AtomicBool>,
    download_file: Option<NamedTempFile>,
}

impl RequestProxy {
    pub(crate) fn new(
        id: RequestId,
        services: Arc<LoaderServices>,
        params: RequestParams,
        delegate: Box<dyn LoadDelegate>,
        commands: mpsc::UnboundedReceiver<ProxyCommand>,
        download_claimed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            services,
            params,
            delegate,
            commands,
            released: false,
            state: ProxyState::Idle,
            transaction: None,
            events: None,
            handled_stream: None,
            stream_read_queued: false,
            defers_loading: false,
            read_wanted: false,
            deferred_read: None,
            pending_redirect: None,
            redirect_count: 0,
            upload: None,
            upload_timer: None,
            filter: None,
            download: None,
            download_claimed,
            download_file: None,
        }
    }

    /// Drives the load until it is done.
    pub(crate) async fn run(mut self) {
        debug!(
            "Request {} starting: {} {}",
            self.id, self.params.request.method, self.params.request.url
        );
        self.async_start();

        while self.state != ProxyState::Done {
            tokio::select! {
                biased;
                command = self.commands.recv(), if !self.released => match command {
                    Some(command) => self.handle_command(command),
                    None => self.handle_command(ProxyCommand::Release),
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        // A transaction may hang up after reporting a redirect or
                        // its final read; a held read is replayed on resume.
                        self.events = None;
                        if self.pending_redirect.is_none()
                            && self.handled_stream.is_none()
                            && self.deferred_read.is_none()
                        {
                            warn!("Request {}: transaction went away", self.id);
                            self.done(RequestStatus::Failed(NetError::Failed));
                        }
                    }
                },
                _ = std::future::ready(()), if self.stream_read_queued => {
                    self.stream_read_queued = false;
                    self.read_handled_stream();
                },
                _ = next_tick(&mut self.upload_timer) => self.maybe_update_upload_progress(false),
            }
        }

        trace!("Request {} proxy finished", self.id);
    }

    fn handle_command(&mut self, command: ProxyCommand) {
        trace!("Request {} command {:?}", self.id, command);
        match command {
            ProxyCommand::Cancel => self.cancel(),
            ProxyCommand::SetDefersLoading(defers) => self.set_defers_loading(defers),
            ProxyCommand::FollowDeferredRedirect { new_first_party } => {
                self.follow_deferred_redirect(new_first_party)
            }
            ProxyCommand::Release => {
                self.released = true;
                if self.download_claimed.load(Ordering::SeqCst) {
                    debug!(
                        "Request {} released; download handler keeps it running",
                        self.id
                    );
                } else {
                    self.cancel();
                }
            }
        }
    }

    fn handle_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::ReceivedRedirect { new_url, info } => self.on_received_redirect(new_url, info),
            NetEvent::ResponseStarted(result) => self.on_response_started(result),
            NetEvent::ReadCompleted(result) => self.on_transaction_read(result),
            NetEvent::AuthRequired(challenge) => self.on_auth_required(challenge),
        }
    }

    // ========================================================================
    // Starting
    // ========================================================================

    /// Gives the request handler the first say, then starts the load.
    fn async_start(&mut self) {
        self.state = ProxyState::Starting;

        let handler = self.services.request_handler.clone();
        let action =
            handler.on_before_resource_load(self.params.browser.as_ref(), &mut self.params.request);

        match action {
            BeforeLoadAction::Continue => self.network_start(),
            BeforeLoadAction::Cancel => {
                debug!("Request {} canceled by request handler", self.id);
                self.done(RequestStatus::Canceled);
            }
            BeforeLoadAction::Redirect(new_url) => {
                debug!("Request {} redirected by request handler to {}", self.id, new_url);
                let mut info = ResponseInfo::new(StatusCode::TEMPORARY_REDIRECT);
                if let Ok(location) = HeaderValue::from_str(new_url.as_str()) {
                    info.headers.insert(LOCATION, location);
                }
                self.on_received_redirect(new_url, info);
            }
            BeforeLoadAction::Respond { response, stream } => {
                debug!("Request {} answered by request handler", self.id);
                self.state = ProxyState::Handled;
                self.handled_stream = Some(stream);
                self.on_response_started(Ok(response));
            }
        }
    }

    /// Creates and starts a transaction for the current request.
    fn network_start(&mut self) {
        self.state = ProxyState::NetworkActive;

        let request = &self.params.request;
        let network_request = NetworkRequest {
            request: request.clone(),
            priority: self.params.priority,
            metadata: RequestMetadata {
                request_id: self.id,
                browser_id: self.params.browser.map(|b| b.id),
                resource_type: request.resource_type,
            },
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut transaction = match self
            .services
            .job_factory
            .create_transaction(network_request, events_tx)
        {
            Ok(transaction) => transaction,
            Err(NetError::UnknownUrlScheme) => {
                let url = self.params.request.url.clone();
                let launched = self
                    .services
                    .request_handler
                    .on_protocol_execution(self.params.browser.as_ref(), &url);
                info!(
                    "Request {}: no handler for scheme '{}' (external launch: {})",
                    self.id,
                    url.scheme(),
                    launched
                );
                self.done(RequestStatus::Failed(NetError::UnknownUrlScheme));
                return;
            }
            Err(e) => {
                warn!("Request {}: cannot create transaction: {}", self.id, e);
                self.done(RequestStatus::Failed(e));
                return;
            }
        };

        if self.params.request.load_flags.contains(LoadFlags::DOWNLOAD_TO_FILE)
            && self.download_file.is_none()
        {
            match self.create_download_file() {
                Ok(file) => self.download_file = Some(file),
                Err(e) => {
                    error!("Request {}: cannot create download file: {}", self.id, e);
                    transaction.cancel();
                    self.done(RequestStatus::Failed(NetError::AccessDenied));
                    return;
                }
            }
        }

        let report_upload = self
            .params
            .request
            .load_flags
            .contains(LoadFlags::REPORT_UPLOAD_PROGRESS);
        let has_upload = self
            .params
            .request
            .upload
            .as_ref()
            .is_some_and(|u| !u.is_empty());
        if report_upload && has_upload && self.upload.is_none() {
            self.start_upload_progress_timer();
        }

        transaction.start();
        self.transaction = Some(transaction);
        self.events = Some(events_rx);
    }

    fn create_download_file(&self) -> std::io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ki-download-");
        match &self.services.settings.download_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }

    // ========================================================================
    // Redirects
    // ========================================================================

    fn on_received_redirect(&mut self, mut new_url: Url, info: ResponseInfo) {
        self.redirect_count += 1;
        if self.redirect_count > self.services.settings.max_redirects {
            warn!(
                "Request {}: more than {} redirects",
                self.id, self.services.settings.max_redirects
            );
            self.done(RequestStatus::Failed(NetError::TooManyRedirects));
            return;
        }

        let old_url = self.params.request.url.clone();
        self.services.request_handler.on_resource_redirect(
            self.params.browser.as_ref(),
            &old_url,
            &mut new_url,
        );
        debug!("Request {} redirect {} -> {}", self.id, old_url, new_url);

        self.state = ProxyState::Responding;
        self.pending_redirect = Some(PendingRedirect {
            new_url: new_url.clone(),
            status: info.status,
        });

        match self.delegate.on_received_redirect(&new_url, &info) {
            RedirectAction::Follow => self.follow_deferred_redirect(None),
            RedirectAction::Cancel => self.cancel(),
            RedirectAction::AwaitApproval => {}
        }
    }

    fn follow_deferred_redirect(&mut self, new_first_party: Option<Url>) {
        let Some(redirect) = self.pending_redirect.take() else {
            warn!("Request {}: no redirect to follow", self.id);
            return;
        };
        if self.state == ProxyState::Done {
            return;
        }

        if let Some(mut transaction) = self.transaction.take() {
            transaction.cancel();
        }
        self.events = None;

        if let Some(first_party) = new_first_party {
            self.params.request.first_party_for_cookies = Some(first_party);
        }
        rewrite_for_redirect(&mut self.params.request, redirect.status, redirect.new_url);
        self.network_start();
    }

    // ========================================================================
    // Response and body
    // ========================================================================

    fn on_response_started(&mut self, result: Result<ResponseInfo, NetError>) {
        let mut info = match result {
            Ok(info) => info,
            Err(e) => {
                debug!("Request {} failed before response: {}", self.id, e);
                self.done(RequestStatus::from_error(e));
                return;
            }
        };

        self.stop_upload_progress_timer();
        self.state = ProxyState::Responding;

        if let Some(file) = &self.download_file {
            info.download_file_path = Some(file.path().to_path_buf());
        }

        let handler = self.services.request_handler.clone();
        let browser = self.params.browser;
        let url = self.params.request.url.clone();

        self.filter = handler.on_resource_response(browser.as_ref(), &url, &info);

        if info.is_attachment() {
            let file_name = info
                .suggested_file_name()
                .or_else(|| {
                    url.path_segments()
                        .and_then(|mut segments| segments.next_back().map(str::to_string))
                        .filter(|name| !name.is_empty())
                })
                .unwrap_or_else(|| "download".to_string());
            if let Some(download) = handler.get_download_handler(
                browser.as_ref(),
                &info.mime_type,
                &file_name,
                info.content_length,
            ) {
                debug!("Request {}: download handler claimed '{}'", self.id, file_name);
                self.download = Some(download);
                self.download_claimed.store(true, Ordering::SeqCst);
            }
        }

        debug!("Request {} response {} ({})", self.id, info.status, info.mime_type);
        self.delegate.on_received_response(&info);

        self.state = ProxyState::Streaming;
        self.async_read_data();
    }

    /// Queues the next read unless loading is deferred.
    fn async_read_data(&mut self) {
        if self.state != ProxyState::Streaming {
            return;
        }
        if self.defers_loading {
            self.read_wanted = true;
            return;
        }
        self.read_wanted = false;

        if self.handled_stream.is_some() {
            self.stream_read_queued = true;
        } else if let Some(transaction) = self.transaction.as_mut() {
            transaction.read(self.services.settings.read_buffer_size);
        }
    }

    fn read_handled_stream(&mut self) {
        let Some(stream) = self.handled_stream.as_mut() else {
            return;
        };
        let mut buf = vec![0u8; self.services.settings.read_buffer_size];
        let result = match stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(e) => {
                warn!("Request {}: handler stream failed: {}", self.id, e);
                Err(NetError::Failed)
            }
        };
        self.on_transaction_read(result);
    }

    /// A read finished. Held back while loading is deferred.
    fn on_transaction_read(&mut self, result: Result<Bytes, NetError>) {
        if self.state != ProxyState::Streaming {
            return;
        }
        if self.defers_loading {
            trace!("Request {}: holding read while deferred", self.id);
            self.deferred_read = Some(result);
            return;
        }
        self.on_read_completed(result);
    }

    fn on_read_completed(&mut self, result: Result<Bytes, NetError>) {
        match result {
            Err(e) => self.done(RequestStatus::from_error(e)),
            Ok(data) if data.is_empty() => self.done(RequestStatus::Success),
            Ok(data) => {
                // The next read is queued before anyone sees this data.
                self.async_read_data();
                self.deliver(data);
            }
        }
    }

    fn deliver(&mut self, data: Bytes) {
        if let Some(download) = self.download.as_mut() {
            if !download.received_data(&data) {
                info!("Request {}: download handler stopped the download", self.id);
                self.abort_transaction();
                self.done(RequestStatus::Canceled);
            }
            return;
        }

        if let Some(file) = self.download_file.as_mut() {
            if let Err(e) = file.write_all(&data) {
                error!("Request {}: writing download file failed: {}", self.id, e);
                self.abort_transaction();
                self.done(RequestStatus::Failed(NetError::Failed));
                return;
            }
            self.delegate.on_downloaded_data(data.len());
            return;
        }

        let data = match self.filter.as_mut() {
            Some(filter) => Bytes::from(filter.process_data(&data)),
            None => data,
        };
        if !data.is_empty() {
            self.delegate.on_received_data(data);
        }
    }

    fn on_auth_required(&mut self, challenge: AuthChallenge) {
        let credentials = self
            .services
            .request_handler
            .get_auth_credentials(self.params.browser.as_ref(), &challenge);
        debug!(
            "Request {}: auth challenge from {}:{} ({} credentials)",
            self.id,
            challenge.host,
            challenge.port,
            if credentials.is_some() { "with" } else { "without" }
        );
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.set_auth(credentials);
        }
    }

    // ========================================================================
    // Owner commands
    // ========================================================================

    fn cancel(&mut self) {
        if self.state == ProxyState::Done {
            return;
        }
        debug!("Request {} canceled", self.id);
        self.abort_transaction();
        self.done(RequestStatus::Canceled);
    }

    fn set_defers_loading(&mut self, defers: bool) {
        if self.defers_loading == defers {
            return;
        }
        self.defers_loading = defers;
        if defers {
            return;
        }

        if let Some(result) = self.deferred_read.take() {
            self.on_read_completed(result);
        } else if self.read_wanted {
            self.async_read_data();
        }
    }

    fn abort_transaction(&mut self) {
        if let Some(mut transaction) = self.transaction.take() {
            transaction.cancel();
        }
        self.events = None;
        self.handled_stream = None;
        self.stream_read_queued = false;
    }

    // ========================================================================
    // Upload progress
    // ========================================================================

    fn start_upload_progress_timer(&mut self) {
        let period = self.services.settings.upload_progress_interval();
        let mut timer = interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.upload_timer = Some(timer);
        self.upload = Some(UploadTracker {
            last_position: 0,
            last_update: Instant::now(),
            finished_sent: false,
        });
    }

    /// Takes one last sample and stops the timer. The response started, so
    /// the whole body was sent.
    fn stop_upload_progress_timer(&mut self) {
        if self.upload_timer.take().is_some() {
            self.maybe_update_upload_progress(true);
        }
    }

    fn maybe_update_upload_progress(&mut self, response_started: bool) {
        let Some(transaction) = self.transaction.as_ref() else {
            return;
        };
        let sampled = transaction.upload_progress();
        let max_delay = self.services.settings.upload_progress_max_delay();
        let size = self
            .params
            .request
            .upload
            .as_ref()
            .map(|u| u.size())
            .unwrap_or(sampled.size);

        let Some(tracker) = self.upload.as_mut() else {
            return;
        };
        if let Some(progress) = throttle(tracker, sampled, size, response_started, max_delay) {
            self.delegate.on_upload_progress(progress);
        }
    }

    // ========================================================================
    // Completion
    // ========================================================================

    fn done(&mut self, status: RequestStatus) {
        if self.state == ProxyState::Done {
            return;
        }
        self.state = ProxyState::Done;
        self.upload_timer = None;
        self.pending_redirect = None;
        self.deferred_read = None;

        // Nothing is delivered after a cancel.
        if let Some(mut filter) = self.filter.take() {
            if status != RequestStatus::Canceled {
                let rest = filter.drain();
                if !rest.is_empty() {
                    self.delegate.on_received_data(Bytes::from(rest));
                }
            }
        }

        if let Some(mut download) = self.download.take() {
            download.complete();
        }

        if let Some(file) = self.download_file.take() {
            if status.is_success() {
                match file.keep() {
                    Ok((_, path)) => debug!("Request {} downloaded to {}", self.id, path.display()),
                    Err(e) => warn!("Request {}: keeping download file failed: {}", self.id, e),
                }
            }
        }

        // A finished transaction is dropped; anything else was canceled
        // by whoever ended the load.
        self.transaction = None;
        self.events = None;
        self.handled_stream = None;

        if status.is_success() {
            debug!("Request {} complete", self.id);
        } else {
            debug!("Request {} ended: {}", self.id, status);
        }
        self.delegate.on_completed_request(status);
    }
}

/// Applies the throttle to one upload sample. Returns the update to send.
fn throttle(
    tracker: &mut UploadTracker,
    sampled: UploadProgress,
    size: u64,
    force_finished: bool,
    max_delay: Duration,
) -> Option<UploadProgress> {
    if tracker.finished_sent {
        return None;
    }

    let mut position = sampled.position.min(size).max(tracker.last_position);
    if force_finished {
        position = size;
    }

    let finished = position == size;
    let advanced = position - tracker.last_position;
    let enough_progress = advanced > size / UPLOAD_PROGRESS_STEPS;
    let too_long = tracker.last_update.elapsed() > max_delay;

    if !(finished || enough_progress || too_long) {
        return None;
    }

    tracker.last_position = position;
    tracker.last_update = Instant::now();
    tracker.finished_sent = finished;
    Some(UploadProgress { position, size })
}

/// Prepares `request` for following a redirect with `status` to `new_url`.
fn rewrite_for_redirect(request: &mut Request, status: StatusCode, new_url: Url) {
    let switch_to_get = (status == StatusCode::SEE_OTHER && request.method != Method::HEAD)
        || ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
            && request.method == Method::POST);

    if switch_to_get {
        request.method = Method::GET;
        request.upload = None;
        request.headers.remove(CONTENT_TYPE);
        request.headers.remove(CONTENT_LENGTH);
    }
    // Cookies are resolved again for the new URL.
    request.headers.remove(COOKIE);
    request.url = new_url;
}

async fn next_event(events: &mut Option<NetEventReceiver>) -> Option<NetEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
