//! Network-layer boundary.
//!
//! This module defines what the loader needs from a network stack and
//! provides the pieces that sit at that boundary:
//!
//! - [`request`] / [`response`] - value types exchanged with handlers and peers
//! - [`transaction`] - the [`NetworkTransaction`] / [`NetworkStack`] traits
//! - [`job_factory`] - per-scheme dispatch to protocol handlers
//! - [`cookies`] - cookie store, policy and the request/response helpers
//! - [`http_stack`] - `reqwest`-backed stack for http/https
//! - [`mock`] - scripted stack for tests

pub mod cookies;
pub mod error;
pub mod http_stack;
pub mod job_factory;
pub mod mock;
pub mod request;
pub mod response;
pub mod transaction;

pub use cookies::{AllowAllCookies, CookiePolicy, CookieStore, InMemoryCookieStore, StoredCookie};
pub use error::NetError;
pub use http_stack::HttpNetworkStack;
pub use job_factory::{JobFactory, ProtocolHandler};
pub use mock::{MockGate, MockNetworkStack, MockResponse, MockRoute};
pub use request::{
    BrowserInfo, LoadFlags, Request, RequestParams, RequestPriority, ResourceType, UploadBody,
    UploadElement,
};
pub use response::{RequestStatus, ResponseInfo};
pub use transaction::{
    AuthChallenge, Credentials, NetEvent, NetEventReceiver, NetEventSender, NetworkRequest,
    NetworkStack, NetworkTransaction, RequestId, RequestMetadata, UploadProgress,
};
