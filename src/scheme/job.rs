//! A [`NetworkTransaction`] driving a host [`SchemeHandler`].
//!
//! The job runs as its own task on the IO runtime. Commands from the proxy
//! and signals from the handler's callback are both queued onto that task,
//! so the handler is only ever called from one place:
//!
//! 1. request cookies are resolved into the `Cookie` header
//! 2. `process_request` hands the request and callback to the handler
//! 3. on `headers_available`, headers are captured and every `Set-Cookie`
//!    is saved, one awaited write at a time
//! 4. only then is a redirect or the response reported
//! 5. each `bytes_available` makes exactly one read attempt for the
//!    pending read

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;

use crate::handler::scheme::{
    CallbackSignal, ReadOutcome, ResponseHeaders, SchemeHandler, SchemeHandlerCallback,
};
use crate::net::cookies::{attach_request_cookies, save_response_cookies, CookiePolicy, CookieStore};
use crate::net::error::NetError;
use crate::net::response::ResponseInfo;
use crate::net::transaction::{NetEvent, NetEventSender, NetworkRequest, NetworkTransaction};

#[derive(Debug)]
enum JobCommand {
    Read(usize),
    Cancel,
}

/// Transaction for one request served by a scheme handler.
pub struct SchemeJob {
    task: Option<JobTask>,
    commands: mpsc::UnboundedSender<JobCommand>,
    handle: Option<JoinHandle<()>>,
    callback: SchemeHandlerCallback,
}

impl SchemeJob {
    /// Creates a job for `request`. Nothing happens until [`NetworkTransaction::start`].
    pub fn new(
        handler: Box<dyn SchemeHandler>,
        request: NetworkRequest,
        events: NetEventSender,
        cookie_store: Option<Arc<dyn CookieStore>>,
        cookie_policy: Arc<dyn CookiePolicy>,
    ) -> Self {
        let (callback, signals) = SchemeHandlerCallback::new();
        let (commands, commands_rx) = mpsc::unbounded_channel();

        Self {
            task: Some(JobTask {
                handler,
                request,
                events,
                cookie_store,
                cookie_policy,
                callback: callback.clone(),
                commands: commands_rx,
                signals,
                pending_read: None,
                read_buf: Vec::new(),
                headers_reported: false,
                handler_canceled: false,
            }),
            commands,
            handle: None,
            callback,
        }
    }
}

impl NetworkTransaction for SchemeJob {
    fn start(&mut self) {
        if let Some(task) = self.task.take() {
            self.handle = Some(tokio::spawn(task.run()));
        }
    }

    fn read(&mut self, max_bytes: usize) {
        let _ = self.commands.send(JobCommand::Read(max_bytes));
    }

    fn cancel(&mut self) {
        self.callback.detach();
        let _ = self.commands.send(JobCommand::Cancel);
    }
}

impl Drop for SchemeJob {
    fn drop(&mut self) {
        // A finished task has already dropped its receiver.
        self.cancel();
    }
}

impl std::fmt::Debug for SchemeJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemeJob")
            .field("started", &self.handle.is_some())
            .field("callback", &self.callback)
            .finish()
    }
}

struct JobTask {
    handler: Box<dyn SchemeHandler>,
    request: NetworkRequest,
    events: NetEventSender,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cookie_policy: Arc<dyn CookiePolicy>,
    callback: SchemeHandlerCallback,
    commands: mpsc::UnboundedReceiver<JobCommand>,
    signals: mpsc::UnboundedReceiver<CallbackSignal>,
    pending_read: Option<usize>,
    /// Reused across reads; grown to the largest requested size.
    read_buf: Vec<u8>,
    headers_reported: bool,
    handler_canceled: bool,
}

/// Whether the job keeps running after handling a message.
enum Flow {
    Continue,
    Finished,
}

impl JobTask {
    async fn run(mut self) {
        let id = self.request.metadata.request_id;

        if let Some(store) = self.cookie_store.clone() {
            attach_request_cookies(store.as_ref(), self.cookie_policy.as_ref(), &mut self.request.request)
                .await;
        }

        // A cancel queued while cookies were resolved wins over the handler.
        match self.commands.try_recv() {
            Ok(JobCommand::Cancel) | Err(mpsc::error::TryRecvError::Disconnected) => {
                debug!("Scheme job {} canceled before processing", id);
                self.callback.detach();
                return;
            }
            Ok(JobCommand::Read(max_bytes)) => self.pending_read = Some(max_bytes),
            Err(mpsc::error::TryRecvError::Empty) => {}
        }

        if !self.handler.process_request(&self.request.request, self.callback.clone()) {
            debug!("Scheme handler declined request {}", id);
            self.finish(Err(NetError::Aborted));
            return;
        }

        loop {
            let flow = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(JobCommand::Read(max_bytes)) => {
                        self.pending_read = Some(max_bytes);
                        self.try_read()
                    }
                    Some(JobCommand::Cancel) | None => {
                        self.cancel_handler();
                        Flow::Finished
                    }
                },
                signal = self.signals.recv() => match signal {
                    Some(CallbackSignal::HeadersAvailable) => self.on_headers_available().await,
                    Some(CallbackSignal::BytesAvailable) => {
                        if self.pending_read.is_some() {
                            self.try_read()
                        } else {
                            trace!("Scheme job {}: bytes available with no pending read", id);
                            Flow::Continue
                        }
                    }
                    Some(CallbackSignal::Cancel) | None => {
                        debug!("Scheme handler canceled request {}", id);
                        self.finish(Err(NetError::Aborted));
                        Flow::Finished
                    }
                },
            };

            if let Flow::Finished = flow {
                break;
            }
        }

        self.callback.detach();
        trace!("Scheme job {} finished", id);
    }

    async fn on_headers_available(&mut self) -> Flow {
        if self.headers_reported {
            warn!(
                "Scheme handler reported headers twice for request {}",
                self.request.metadata.request_id
            );
            return Flow::Continue;
        }
        self.headers_reported = true;

        let ResponseHeaders {
            mut response,
            content_length,
            redirect_url,
        } = self.handler.get_response_headers();
        response.refresh_from_headers();
        if content_length.is_some() {
            response.content_length = content_length;
        }
        response.response_time = chrono::Utc::now();

        if let Some(store) = self.cookie_store.clone() {
            let saved = save_response_cookies(
                store.as_ref(),
                self.cookie_policy.as_ref(),
                &self.request.request,
                &response.headers,
            )
            .await;
            if saved > 0 {
                trace!(
                    "Scheme job {} saved {} cookies",
                    self.request.metadata.request_id,
                    saved
                );
            }
        }

        match self.redirect_target(redirect_url, &response) {
            Some(new_url) => {
                debug!(
                    "Scheme job {} redirects to {}",
                    self.request.metadata.request_id, new_url
                );
                let _ = self.events.send(NetEvent::ReceivedRedirect {
                    new_url,
                    info: response,
                });
            }
            None => {
                let _ = self.events.send(NetEvent::ResponseStarted(Ok(response)));
            }
        }
        Flow::Continue
    }

    /// An explicit redirect URL wins; otherwise a 302 or 303 with a
    /// resolvable `Location` header is a redirect.
    fn redirect_target(&self, explicit: Option<Url>, response: &ResponseInfo) -> Option<Url> {
        if explicit.is_some() {
            return explicit;
        }
        if response.status != StatusCode::FOUND && response.status != StatusCode::SEE_OTHER {
            return None;
        }
        let location = response.location()?;
        match self.request.request.url.join(location) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Ignoring unresolvable Location '{}': {}", location, e);
                None
            }
        }
    }

    fn try_read(&mut self) -> Flow {
        let Some(max_bytes) = self.pending_read else {
            return Flow::Continue;
        };

        let len = max_bytes.max(1);
        if self.read_buf.len() < len {
            self.read_buf.resize(len, 0);
        }
        let buf = &mut self.read_buf[..len];
        match self.handler.read_response(buf, &self.callback) {
            ReadOutcome::Pending => Flow::Continue,
            ReadOutcome::Data(n) if n > 0 => {
                self.pending_read = None;
                let data = Bytes::copy_from_slice(&buf[..n.min(len)]);
                let _ = self.events.send(NetEvent::ReadCompleted(Ok(data)));
                Flow::Continue
            }
            ReadOutcome::Data(_) | ReadOutcome::Complete => {
                self.pending_read = None;
                self.finish(Ok(()));
                Flow::Finished
            }
        }
    }

    fn cancel_handler(&mut self) {
        self.callback.detach();
        if !self.handler_canceled {
            self.handler_canceled = true;
            self.handler.cancel();
        }
    }

    /// Reports the terminal event.
    fn finish(&mut self, result: Result<(), NetError>) {
        self.callback.detach();
        let event = match result {
            Ok(()) => NetEvent::ReadCompleted(Ok(Bytes::new())),
            Err(error) if !self.headers_reported => NetEvent::ResponseStarted(Err(error)),
            Err(error) => NetEvent::ReadCompleted(Err(error)),
        };
        let _ = self.events.send(event);
    }
}
