//! Integration tests for synchronous loads.

mod common;

use std::sync::mpsc;

use http::StatusCode;

use common::*;
use ki_resource_loader::config::LoaderSettings;
use ki_resource_loader::loader::LoadError;
use ki_resource_loader::net::{MockGate, MockNetworkStack, MockResponse, MockRoute, RequestStatus};

fn redirect(location: &str) -> MockRoute {
    MockRoute::Redirect {
        status: StatusCode::FOUND,
        location: location.to_string(),
    }
}

#[test]
fn test_sync_load_collects_body() {
    let harness = Harness::new(
        MockNetworkStack::new().with_route(
            "http://a.test/page",
            MockRoute::Respond(MockResponse::ok("").with_chunks(["one ", "two"])),
        ),
    );

    let response = harness.bridge(params("http://a.test/page")).sync_load().unwrap();
    assert_eq!(response.status, RequestStatus::Success);
    assert_eq!(response.info.status, StatusCode::OK);
    assert_eq!(response.data, b"one two");
    assert_eq!(response.url.as_str(), "http://a.test/page");
}

#[test]
fn test_same_origin_redirect_followed() {
    let harness = Harness::new(
        MockNetworkStack::new()
            .with_route("http://a.test/x", redirect("/y"))
            .with_response("http://a.test/y", "moved"),
    );

    let response = harness.bridge(params("http://a.test/x")).sync_load().unwrap();
    assert_eq!(response.status, RequestStatus::Success);
    assert_eq!(response.url.as_str(), "http://a.test/y");
    assert_eq!(response.data, b"moved");
}

#[test]
fn test_cross_origin_redirect_denied() {
    let harness = Harness::new(
        MockNetworkStack::new()
            .with_route("http://a.test/x", redirect("http://b.test/y"))
            .with_response("http://b.test/y", "elsewhere"),
    );

    let response = harness.bridge(params("http://a.test/x")).sync_load().unwrap();
    assert_eq!(response.status, RequestStatus::Canceled);
    assert!(response.data.is_empty());
    assert_eq!(response.url.as_str(), "http://a.test/x");
    assert_eq!(harness.network.requests().len(), 1);
}

#[test]
fn test_sync_load_failure_reported_in_status() {
    let harness = Harness::new(MockNetworkStack::new().with_route(
        "http://a.test/down",
        MockRoute::Fail(ki_resource_loader::net::NetError::ConnectionFailed),
    ));

    let response = harness.bridge(params("http://a.test/down")).sync_load().unwrap();
    assert_eq!(
        response.status,
        RequestStatus::Failed(ki_resource_loader::net::NetError::ConnectionFailed)
    );
}

#[test]
fn test_sync_load_timeout() {
    let gate = MockGate::new();
    let harness = Harness::with_settings(
        MockNetworkStack::new().with_route(
            "http://a.test/slow",
            MockRoute::Respond(MockResponse::ok("never").with_gate(gate)),
        ),
        LoaderSettings::default().with_sync_load_timeout_ms(100),
        None,
    );

    let result = harness.bridge(params("http://a.test/slow")).sync_load();
    assert!(matches!(result, Err(LoadError::Timeout)));
}

#[test]
fn test_sync_load_twice_refused() {
    let harness = Harness::new(MockNetworkStack::new().with_response("http://a.test/", "x"));
    let mut bridge = harness.bridge(params("http://a.test/"));

    assert!(bridge.sync_load().is_ok());
    assert!(matches!(bridge.sync_load(), Err(LoadError::AlreadyStarted)));
}

#[test]
fn test_sync_load_on_io_thread_refused() {
    let harness = Harness::new(MockNetworkStack::new().with_response("http://a.test/", "x"));
    let mut bridge = harness.bridge(params("http://a.test/"));
    let (tx, rx) = mpsc::channel();

    harness.context.io_thread().post(move || {
        let _ = tx.send(bridge.sync_load().map(|r| r.status));
    });

    let result = rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(result, Err(LoadError::BlockingOnIoThread)));
    assert!(harness.network.requests().is_empty());
}
