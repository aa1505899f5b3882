//! Integration tests for the loader
//!
//! Drives real loads through the bridge, the IO thread and the owner loop
//! against a scripted network stack: notification order, cancellation,
//! deferred loading, request hooks, downloads and upload progress.

mod common;

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderValue, CONTENT_DISPOSITION};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use url::Url;

use common::*;
use ki_resource_loader::config::LoaderSettings;
use ki_resource_loader::handler::{BeforeLoadAction, ContentFilter, DownloadHandler, RequestHandler};
use ki_resource_loader::loader::{LoadError, RedirectDecision, ResourcePeer};
use ki_resource_loader::net::{
    AuthChallenge, BrowserInfo, Credentials, LoadFlags, MockGate, MockNetworkStack, MockResponse,
    MockRoute, NetError, Request, RequestStatus, ResourceType, ResponseInfo, UploadBody,
};

fn redirect(status: StatusCode, location: &str) -> MockRoute {
    MockRoute::Redirect {
        status,
        location: location.to_string(),
    }
}

// ============================================================================
// Ordering and completion
// ============================================================================

#[test]
fn test_redirects_then_response_then_data_then_completion() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/start", redirect(StatusCode::FOUND, "/middle"))
        .with_route(
            "http://a.test/middle",
            redirect(StatusCode::MOVED_PERMANENTLY, "http://b.test/end"),
        )
        .with_route(
            "http://b.test/end",
            MockRoute::Respond(MockResponse::ok("").with_chunks(["he", "llo"])),
        );
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/start"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Redirect("http://a.test/middle".to_string()));
    assert_eq!(events[1], Event::Redirect("http://b.test/end".to_string()));
    assert_eq!(events[2], Event::Response(200));
    assert_eq!(body(&events), b"hello");
    assert_eq!(events.last(), Some(&Event::Complete(RequestStatus::Success)));
    assert_eq!(completions(&events).len(), 1);

    let urls: Vec<String> = harness
        .network
        .requests()
        .iter()
        .map(|r| r.request.url.to_string())
        .collect();
    assert_eq!(
        urls,
        vec!["http://a.test/start", "http://a.test/middle", "http://b.test/end"]
    );
}

#[test]
fn test_failure_before_response() {
    let network = MockNetworkStack::new().with_route(
        "http://a.test/",
        MockRoute::Fail(NetError::ConnectionFailed),
    );
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for_completion(&log));

    assert_eq!(
        *log.lock(),
        vec![Event::Complete(RequestStatus::Failed(NetError::ConnectionFailed))]
    );
}

#[test]
fn test_start_twice_is_an_error() {
    let mut harness = Harness::new(MockNetworkStack::new().with_response("http://a.test/", "x"));
    let log = new_log();

    let mut bridge = harness.start(params("http://a.test/"), &log);
    let second = bridge.start(Box::new(RecordingPeer::new(log.clone())));
    assert!(matches!(second, Err(LoadError::AlreadyStarted)));

    assert!(harness.wait_for_completion(&log));
    assert_eq!(completions(&log.lock()), vec![RequestStatus::Success]);
}

#[test]
fn test_metadata_reaches_network() {
    let mut harness = Harness::new(MockNetworkStack::new().with_response("http://a.test/img", "x"));
    let log = new_log();
    let browser = BrowserInfo::new();

    let bridge = harness.start(
        params("http://a.test/img")
            .with_browser(browser)
            .with_resource_type(ResourceType::Image),
        &log,
    );
    assert!(harness.wait_for_completion(&log));

    let requests = harness.network.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].metadata.browser_id, Some(browser.id));
    assert_eq!(requests[0].metadata.resource_type, ResourceType::Image);
    assert_eq!(requests[0].metadata.request_id, bridge.request_id());
}

// ============================================================================
// Redirect handling
// ============================================================================

#[test]
fn test_denied_redirect_cancels() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/", redirect(StatusCode::FOUND, "http://b.test/"))
        .with_response("http://b.test/", "never");
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start_with(
        params("http://a.test/"),
        RecordingPeer::new(log.clone()).with_redirect_decision(RedirectDecision::Deny),
    );
    assert!(harness.wait_for_completion(&log));

    assert_eq!(
        *log.lock(),
        vec![
            Event::Redirect("http://b.test/".to_string()),
            Event::Complete(RequestStatus::Canceled),
        ]
    );
    assert_eq!(harness.network.requests().len(), 1);
}

#[test]
fn test_too_many_redirects() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/loop", redirect(StatusCode::FOUND, "/loop"));
    let settings = LoaderSettings::default().with_max_redirects(2);
    let mut harness = Harness::with_settings(network, settings, None);
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/loop"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    let redirects = events
        .iter()
        .filter(|e| matches!(e, Event::Redirect(_)))
        .count();
    assert_eq!(redirects, 2);
    assert_eq!(
        events.last(),
        Some(&Event::Complete(RequestStatus::Failed(NetError::TooManyRedirects)))
    );
}

#[test]
fn test_post_becomes_get_after_302() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/form", redirect(StatusCode::FOUND, "/done"))
        .with_response("http://a.test/done", "thanks");
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start(
        params("http://a.test/form")
            .with_method(Method::POST)
            .with_upload(UploadBody::from_bytes("a=1")),
        &log,
    );
    assert!(harness.wait_for_completion(&log));

    let requests = harness.network.requests();
    assert_eq!(requests[0].request.method, Method::POST);
    assert_eq!(requests[1].request.method, Method::GET);
    assert!(requests[1].request.upload.is_none());
    assert_eq!(body(&log.lock()), b"thanks");
}

#[test]
fn test_new_first_party_applies_to_followed_request() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/", redirect(StatusCode::FOUND, "http://b.test/"))
        .with_response("http://b.test/", "ok");
    let mut harness = Harness::new(network);
    let log = new_log();
    let first_party = Url::parse("http://b.test/").unwrap();

    let _bridge = harness.start_with(
        params("http://a.test/"),
        RecordingPeer::new(log.clone())
            .with_redirect_decision(RedirectDecision::FollowWithFirstParty(first_party.clone())),
    );
    assert!(harness.wait_for_completion(&log));

    let requests = harness.network.requests();
    assert_eq!(requests[1].request.first_party_for_cookies, Some(first_party));
}

// ============================================================================
// Cancellation and deferral
// ============================================================================

#[test]
fn test_cancel_after_response_stops_data() {
    let gate = MockGate::new();
    let network = MockNetworkStack::new().with_route(
        "http://a.test/slow",
        MockRoute::Respond(
            MockResponse::ok("")
                .with_chunks(["one", "two"])
                .with_gate(gate.clone()),
        ),
    );
    let mut harness = Harness::new(network);
    let log = new_log();

    let bridge = harness.start(params("http://a.test/slow"), &log);
    assert!(harness.wait_for(&log, |events| events.contains(&Event::Response(200))));

    bridge.cancel();
    assert!(harness.wait_for_completion(&log));

    gate.release(2);
    harness.owner.run_for(Duration::from_millis(50));

    assert_eq!(
        *log.lock(),
        vec![Event::Response(200), Event::Complete(RequestStatus::Canceled)]
    );
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let mut harness = Harness::new(MockNetworkStack::new().with_response("http://a.test/", "done"));
    let log = new_log();

    let bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for_completion(&log));

    bridge.cancel();
    harness.owner.run_for(Duration::from_millis(30));
    assert_eq!(completions(&log.lock()), vec![RequestStatus::Success]);
}

#[test]
fn test_deferred_loading_holds_data_then_resumes_exactly() {
    let gate = MockGate::new();
    let network = MockNetworkStack::new().with_route(
        "http://a.test/stream",
        MockRoute::Respond(
            MockResponse::ok("")
                .with_chunks(["a", "b", "c"])
                .with_gate(gate.clone()),
        ),
    );
    let mut harness = Harness::new(network);
    let log = new_log();

    let bridge = harness.start(params("http://a.test/stream"), &log);
    assert!(harness.wait_for(&log, |events| events.contains(&Event::Response(200))));

    bridge.set_defers_loading(true);
    std::thread::sleep(Duration::from_millis(20));
    gate.release(3);
    harness.owner.run_for(Duration::from_millis(100));
    assert!(body(&log.lock()).is_empty());

    bridge.set_defers_loading(false);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(body(&events), b"abc");
    assert_eq!(completions(&events), vec![RequestStatus::Success]);
}

#[test]
fn test_dropped_bridge_silences_peer() {
    let gate = MockGate::new();
    let network = MockNetworkStack::new().with_route(
        "http://a.test/slow",
        MockRoute::Respond(MockResponse::ok("").with_chunks(["x"]).with_gate(gate.clone())),
    );
    let mut harness = Harness::new(network);
    let log = new_log();

    let bridge = harness.start(params("http://a.test/slow"), &log);
    assert!(harness.wait_for(&log, |events| events.contains(&Event::Response(200))));

    drop(bridge);
    gate.release(1);
    harness.owner.run_for(Duration::from_millis(50));

    assert_eq!(*log.lock(), vec![Event::Response(200)]);
}

// ============================================================================
// Request handler hooks
// ============================================================================

struct CancelEverything;

impl RequestHandler for CancelEverything {
    fn on_before_resource_load(
        &self,
        _browser: Option<&BrowserInfo>,
        _request: &mut Request,
    ) -> BeforeLoadAction {
        BeforeLoadAction::Cancel
    }
}

#[test]
fn test_before_load_cancel() {
    let network = MockNetworkStack::new().with_response("http://a.test/", "x");
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(CancelEverything)));
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for_completion(&log));

    assert_eq!(*log.lock(), vec![Event::Complete(RequestStatus::Canceled)]);
    assert!(harness.network.requests().is_empty());
}

struct AnswerDirectly;

impl RequestHandler for AnswerDirectly {
    fn on_before_resource_load(
        &self,
        _browser: Option<&BrowserInfo>,
        _request: &mut Request,
    ) -> BeforeLoadAction {
        BeforeLoadAction::Respond {
            response: ResponseInfo::new(StatusCode::OK),
            stream: Box::new(Cursor::new(b"from handler".to_vec())),
        }
    }
}

#[test]
fn test_before_load_respond_serves_stream() {
    let settings = LoaderSettings::default().with_read_buffer_size(4);
    let mut harness = Harness::with_settings(
        MockNetworkStack::new(),
        settings,
        Some(Arc::new(AnswerDirectly)),
    );
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Response(200));
    assert_eq!(body(&events), b"from handler");
    // Four-byte reads.
    assert_eq!(events.iter().filter(|e| matches!(e, Event::Data(_))).count(), 3);
    assert_eq!(completions(&events), vec![RequestStatus::Success]);
    assert!(harness.network.requests().is_empty());
}

struct RedirectOld;

impl RequestHandler for RedirectOld {
    fn on_before_resource_load(
        &self,
        _browser: Option<&BrowserInfo>,
        request: &mut Request,
    ) -> BeforeLoadAction {
        if request.url.path() == "/old" {
            if let Ok(url) = Url::parse("http://a.test/new") {
                return BeforeLoadAction::Redirect(url);
            }
        }
        let _ = request.set_header_str("X-Checked", "1");
        BeforeLoadAction::Continue
    }
}

#[test]
fn test_before_load_redirect_is_reported() {
    let network = MockNetworkStack::new().with_response("http://a.test/new", "moved");
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(RedirectOld)));
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/old"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Redirect("http://a.test/new".to_string()));
    assert_eq!(events[1], Event::Response(200));
    assert_eq!(body(&events), b"moved");
}

#[test]
fn test_before_load_mutations_reach_network() {
    let network = MockNetworkStack::new().with_response("http://a.test/page", "ok");
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(RedirectOld)));
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/page"), &log);
    assert!(harness.wait_for_completion(&log));

    let requests = harness.network.requests();
    assert_eq!(
        requests[0].request.headers.get("x-checked"),
        Some(&HeaderValue::from_static("1"))
    );
}

struct RewriteRedirects;

impl RequestHandler for RewriteRedirects {
    fn on_resource_redirect(
        &self,
        _browser: Option<&BrowserInfo>,
        _old_url: &Url,
        new_url: &mut Url,
    ) {
        new_url.set_path("/rewritten");
    }
}

#[test]
fn test_redirect_hook_rewrites_target() {
    let network = MockNetworkStack::new()
        .with_route("http://a.test/start", redirect(StatusCode::FOUND, "/elsewhere"))
        .with_response("http://a.test/rewritten", "rewritten");
    let mut harness = Harness::with_settings(
        network,
        LoaderSettings::default(),
        Some(Arc::new(RewriteRedirects)),
    );
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/start"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Redirect("http://a.test/rewritten".to_string()));
    assert_eq!(body(&events), b"rewritten");
}

#[derive(Default)]
struct ExternalLauncher {
    asked: AtomicBool,
}

impl RequestHandler for ExternalLauncher {
    fn on_protocol_execution(&self, _browser: Option<&BrowserInfo>, url: &Url) -> bool {
        self.asked.store(url.scheme() == "mailto", Ordering::SeqCst);
        true
    }
}

#[test]
fn test_unknown_scheme_consults_protocol_execution() {
    let launcher = Arc::new(ExternalLauncher::default());
    let mut harness = Harness::with_settings(
        MockNetworkStack::new(),
        LoaderSettings::default(),
        Some(launcher.clone()),
    );
    let log = new_log();

    let _bridge = harness.start(params("mailto:someone@example.com"), &log);
    assert!(harness.wait_for_completion(&log));

    assert!(launcher.asked.load(Ordering::SeqCst));
    assert_eq!(
        *log.lock(),
        vec![Event::Complete(RequestStatus::Failed(NetError::UnknownUrlScheme))]
    );
}

#[derive(Default)]
struct Shout {
    held: Vec<u8>,
}

impl ContentFilter for Shout {
    fn process_data(&mut self, data: &[u8]) -> Vec<u8> {
        self.held.extend_from_slice(data);
        Vec::new()
    }

    fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.held).to_ascii_uppercase()
    }
}

struct Filtering;

impl RequestHandler for Filtering {
    fn on_resource_response(
        &self,
        _browser: Option<&BrowserInfo>,
        _url: &Url,
        _response: &ResponseInfo,
    ) -> Option<Box<dyn ContentFilter>> {
        Some(Box::new(Shout::default()))
    }
}

#[test]
fn test_content_filter_drained_once_before_completion() {
    let network = MockNetworkStack::new().with_route(
        "http://a.test/",
        MockRoute::Respond(MockResponse::ok("").with_chunks(["hel", "lo"])),
    );
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(Filtering)));
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for_completion(&log));

    assert_eq!(
        *log.lock(),
        vec![
            Event::Response(200),
            Event::Data(b"HELLO".to_vec()),
            Event::Complete(RequestStatus::Success),
        ]
    );
}

#[test]
fn test_content_filter_discarded_on_cancel() {
    let gate = MockGate::new();
    let network = MockNetworkStack::new().with_route(
        "http://a.test/",
        MockRoute::Respond(
            MockResponse::ok("")
                .with_chunks(["one", "two"])
                .with_gate(gate.clone()),
        ),
    );
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(Filtering)));
    let log = new_log();

    let bridge = harness.start(params("http://a.test/"), &log);
    assert!(harness.wait_for(&log, |events| events.contains(&Event::Response(200))));

    // The first chunk is held by the filter.
    gate.release(1);
    std::thread::sleep(Duration::from_millis(50));
    bridge.cancel();
    assert!(harness.wait_for_completion(&log));

    gate.release(1);
    harness.owner.run_for(Duration::from_millis(50));

    assert_eq!(
        *log.lock(),
        vec![Event::Response(200), Event::Complete(RequestStatus::Canceled)]
    );
}

struct GoodCredentials;

impl RequestHandler for GoodCredentials {
    fn get_auth_credentials(
        &self,
        _browser: Option<&BrowserInfo>,
        challenge: &AuthChallenge,
    ) -> Option<Credentials> {
        (challenge.realm == "vault").then(|| Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        })
    }
}

fn auth_route() -> MockRoute {
    MockRoute::Auth {
        challenge: AuthChallenge {
            is_proxy: false,
            host: "a.test".to_string(),
            port: 80,
            realm: "vault".to_string(),
            scheme: "basic".to_string(),
        },
        expected: Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
        },
        response: MockResponse::ok("secret"),
    }
}

#[test]
fn test_auth_credentials_supplied() {
    let network = MockNetworkStack::new().with_route("http://a.test/vault", auth_route());
    let mut harness =
        Harness::with_settings(network, LoaderSettings::default(), Some(Arc::new(GoodCredentials)));
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/vault"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Response(200));
    assert_eq!(body(&events), b"secret");
}

#[test]
fn test_auth_without_credentials_continues() {
    let network = MockNetworkStack::new().with_route("http://a.test/vault", auth_route());
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start(params("http://a.test/vault"), &log);
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    assert_eq!(events[0], Event::Response(401));
    assert_eq!(completions(&events), vec![RequestStatus::Success]);
}

// ============================================================================
// Downloads
// ============================================================================

#[derive(Default)]
struct DownloadRecord {
    file_name: String,
    data: Vec<u8>,
    completed: bool,
}

struct RecordingDownload {
    record: Arc<Mutex<DownloadRecord>>,
}

impl DownloadHandler for RecordingDownload {
    fn received_data(&mut self, data: &[u8]) -> bool {
        self.record.lock().data.extend_from_slice(data);
        true
    }

    fn complete(&mut self) {
        self.record.lock().completed = true;
    }
}

struct Downloads {
    record: Arc<Mutex<DownloadRecord>>,
}

impl RequestHandler for Downloads {
    fn get_download_handler(
        &self,
        _browser: Option<&BrowserInfo>,
        _mime_type: &str,
        file_name: &str,
        _content_length: Option<u64>,
    ) -> Option<Box<dyn DownloadHandler>> {
        self.record.lock().file_name = file_name.to_string();
        Some(Box::new(RecordingDownload {
            record: self.record.clone(),
        }))
    }
}

#[test]
fn test_download_handler_claims_stream() {
    let gate = MockGate::new();
    let network = MockNetworkStack::new().with_route(
        "http://a.test/report",
        MockRoute::Respond(
            MockResponse::ok("")
                .with_header(
                    CONTENT_DISPOSITION,
                    HeaderValue::from_static("attachment; filename=\"report.txt\""),
                )
                .with_chunks(["ab", "cd"])
                .with_gate(gate.clone()),
        ),
    );
    let record = Arc::new(Mutex::new(DownloadRecord::default()));
    let mut harness = Harness::with_settings(
        network,
        LoaderSettings::default(),
        Some(Arc::new(Downloads {
            record: record.clone(),
        })),
    );
    let log = new_log();

    let bridge = harness.start(params("http://a.test/report"), &log);
    assert!(harness.wait_for(&log, |events| events.contains(&Event::Response(200))));

    // Neither cancel nor release stop a claimed download.
    bridge.cancel();
    drop(bridge);
    gate.release(2);

    assert!(poll_until(|| record.lock().completed));
    let record = record.lock();
    assert_eq!(record.file_name, "report.txt");
    assert_eq!(record.data, b"abcd");
    assert_eq!(*log.lock(), vec![Event::Response(200)]);
}

#[test]
fn test_download_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let network = MockNetworkStack::new().with_response("http://a.test/file", "hello");
    let settings = LoaderSettings::default().with_download_dir(dir.path());
    let mut harness = Harness::with_settings(network, settings, None);
    let log = new_log();

    let _bridge = harness.start(
        params("http://a.test/file").with_load_flags(LoadFlags::DOWNLOAD_TO_FILE),
        &log,
    );
    assert!(harness.wait_for_completion(&log));

    assert_eq!(
        *log.lock(),
        vec![
            Event::Response(200),
            Event::Downloaded(5),
            Event::Complete(RequestStatus::Success),
        ]
    );

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0]
        .file_name()
        .to_string_lossy()
        .starts_with("ki-download-"));
    assert_eq!(std::fs::read(files[0].path()).unwrap(), b"hello");
}

// ============================================================================
// Upload progress
// ============================================================================

#[test]
fn test_upload_progress_monotonic_and_finishes_once() {
    let network = MockNetworkStack::new().with_route(
        "http://a.test/upload",
        MockRoute::Respond(MockResponse::ok("stored").with_upload_step(1000)),
    );
    let settings = LoaderSettings::default().with_upload_progress(10, 50);
    let mut harness = Harness::with_settings(network, settings, None);
    let log = new_log();

    let _bridge = harness.start(
        params("http://a.test/upload")
            .with_method(Method::POST)
            .with_upload(UploadBody::from_bytes(vec![0u8; 10_000]))
            .with_load_flags(LoadFlags::REPORT_UPLOAD_PROGRESS),
        &log,
    );
    assert!(harness.wait_for_completion(&log));

    let events = log.lock().clone();
    let progress: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            Event::UploadProgress(position, size) => Some((*position, *size)),
            _ => None,
        })
        .collect();

    assert!(progress.len() >= 2, "progress: {:?}", progress);
    assert!(progress.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(progress.iter().all(|(_, size)| *size == 10_000));
    assert_eq!(progress.last(), Some(&(10_000, 10_000)));
    assert_eq!(progress.iter().filter(|p| p.0 == 10_000).count(), 1);

    // Every progress update precedes the response.
    let response_at = events
        .iter()
        .position(|e| *e == Event::Response(200))
        .unwrap();
    assert!(events[..response_at]
        .iter()
        .all(|e| matches!(e, Event::UploadProgress(..))));
    assert_eq!(body(&events), b"stored");
}

#[test]
fn test_no_upload_progress_without_flag() {
    let network = MockNetworkStack::new().with_response("http://a.test/upload", "ok");
    let mut harness = Harness::new(network);
    let log = new_log();

    let _bridge = harness.start(
        params("http://a.test/upload")
            .with_method(Method::POST)
            .with_upload(UploadBody::from_bytes("body")),
        &log,
    );
    assert!(harness.wait_for_completion(&log));

    assert!(!log
        .lock()
        .iter()
        .any(|e| matches!(e, Event::UploadProgress(..))));
}

// ============================================================================
// Peer that drops its own bridge
// ============================================================================

struct SelfDropping {
    log: EventLog,
    bridge: Arc<Mutex<Option<ki_resource_loader::loader::ResourceLoaderBridge>>>,
}

impl ResourcePeer for SelfDropping {
    fn on_received_response(&mut self, _info: &ResponseInfo) {
        self.log.lock().push(Event::Response(200));
        self.bridge.lock().take();
    }

    fn on_received_data(&mut self, data: &[u8]) {
        self.log.lock().push(Event::Data(data.to_vec()));
    }

    fn on_completed_request(&mut self, status: &RequestStatus) {
        self.log.lock().push(Event::Complete(status.clone()));
    }
}

#[test]
fn test_peer_may_drop_bridge_from_callback() {
    let network = MockNetworkStack::new().with_route(
        "http://a.test/",
        MockRoute::Respond(MockResponse::ok("").with_chunks(["a", "b"])),
    );
    let mut harness = Harness::new(network);
    let log = new_log();
    let slot = Arc::new(Mutex::new(None));

    let mut bridge = harness.bridge(params("http://a.test/"));
    bridge
        .start(Box::new(SelfDropping {
            log: log.clone(),
            bridge: slot.clone(),
        }))
        .unwrap();
    *slot.lock() = Some(bridge);

    assert!(harness.wait_for(&log, |events| !events.is_empty()));
    harness.owner.run_for(Duration::from_millis(50));

    assert!(slot.lock().is_none());
    assert_eq!(*log.lock(), vec![Event::Response(200)]);
}
