//! # KI Resource Loader
//!
//! Cross-thread resource loading for embedded browsers.
//!
//! A request is created on the owner thread through a
//! [`ResourceLoaderBridge`](loader::ResourceLoaderBridge), carried out on a
//! dedicated IO thread by a request proxy, and reported back to a
//! [`ResourcePeer`](loader::ResourcePeer) in the order
//! redirect* → response → data* → completion. Custom URL schemes are served
//! by host-supplied scheme handlers registered per (scheme, domain).
//!
//! ## Features
//!
//! - **Two-party threading**: owner loop and IO thread talk only through posted tasks
//! - **Request hooks**: before-load, redirect, response filter, auth, downloads
//! - **Custom schemes**: registry with (scheme, domain) precedence, cookie-aware scheme jobs
//! - **Synchronous loads**: blocking variant that denies cross-origin redirects
//! - **Flexible Configuration**: TOML/JSON files, environment variables, CLI arguments
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ki_resource_loader::prelude::*;
//!
//! struct Printer;
//!
//! impl ResourcePeer for Printer {
//!     fn on_received_response(&mut self, info: &ResponseInfo) {
//!         println!("{} {}", info.status, info.mime_type);
//!     }
//!     fn on_received_data(&mut self, data: &[u8]) {
//!         println!("{} bytes", data.len());
//!     }
//!     fn on_completed_request(&mut self, status: &RequestStatus) {
//!         println!("done: {}", status);
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let context = Arc::new(LoaderContext::builder(LoaderSettings::default()).build()?);
//!     let mut owner = OwnerLoop::new()?;
//!
//!     let params = RequestParams::parse("https://example.com/")?;
//!     let mut bridge = ResourceLoaderBridge::new(context, params, owner.runner());
//!     bridge.start(Box::new(Printer))?;
//!
//!     owner.run_for(Duration::from_secs(5));
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`loader`]: Bridge, request proxy, synchronous loads
//! - [`scheme`]: Scheme registry, scheme jobs, built-in scheme handlers
//! - [`handler`]: Traits implemented by the host application
//! - [`net`]: Network-stack boundary, cookies, HTTP and mock stacks
//! - [`runtime`]: IO thread, owner loop, waitable event
//! - [`config`]: Configuration loading and management
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── owner thread ────────────────┐   ┌────────────── IO thread ──────────────┐
//! │  ResourcePeer ◀── OwnerLoop ◀── posted tasks ─┼───┼── RequestProxy ── JobFactory           │
//! │  ResourceLoaderBridge ── commands ────────────┼──▶│        │             ├─ SchemeJob      │
//! │                                              │   │  RequestHandler     └─ NetworkStack    │
//! └──────────────────────────────────────────────┘   └───────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//!
//! Configuration follows a precedence chain:
//! 1. Default values
//! 2. Configuration file (TOML/JSON)
//! 3. Environment variables (`KI_LOADER_*`)
//! 4. CLI arguments
//!
//! See [`config::LoaderSettings`] for all available options.

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Full version string with name
pub const FULL_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Module Exports
// ============================================================================

/// Owner-thread bridge, IO-thread request proxy and synchronous loads.
pub mod loader;

/// Scheme registry, scheme jobs and built-in scheme handlers.
pub mod scheme;

/// Traits the host application implements to steer loading.
pub mod handler;

/// Network-stack boundary: requests, responses, transactions, cookies.
pub mod net;

/// IO thread, owner loop and waitable event.
pub mod runtime;

/// Configuration management for loading settings from files, env, and CLI.
pub mod config;

// ============================================================================
// Re-exports for Convenience
// ============================================================================

// Loader types
pub use loader::{
    LoadError, LoaderContext, LoaderContextBuilder, ProxyState, RedirectDecision,
    ResourceLoaderBridge, ResourcePeer, SyncLoadResponse,
};

// Scheme types
pub use scheme::{
    BufferSchemeHandler, DirectorySchemeHandlerFactory, SchemeError, SchemeInfo, SchemeRegistry,
};

// Handler types
pub use handler::{
    BeforeLoadAction, ContentFilter, DefaultRequestHandler, DownloadHandler, ReadOutcome,
    RequestHandler, ResponseHeaders, SchemeHandler, SchemeHandlerCallback, SchemeHandlerFactory,
};

// Network types
pub use net::{
    BrowserInfo, LoadFlags, NetError, Request, RequestParams, RequestPriority, RequestStatus,
    ResourceType, ResponseInfo, UploadBody,
};

// Runtime types
pub use runtime::{IoThread, OwnerLoop, OwnerTaskRunner, WaitableEvent};

// Config types
pub use config::{CliArgs, ConfigError, LoaderSettings, ProxyConfig, ProxyType};

// ============================================================================
// Prelude Module
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust
/// use ki_resource_loader::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{CliArgs, LoaderSettings};
    pub use crate::handler::{RequestHandler, SchemeHandler, SchemeHandlerFactory};
    pub use crate::loader::{LoaderContext, ResourceLoaderBridge, ResourcePeer};
    pub use crate::net::{RequestParams, RequestStatus, ResponseInfo};
    pub use crate::runtime::OwnerLoop;
    pub use crate::{FULL_VERSION, NAME, VERSION};
}
