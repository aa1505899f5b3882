//! Custom URL schemes.
//!
//! - [`registry`] - scheme declarations and (scheme, domain) factories
//! - [`job`] - the transaction that drives a host scheme handler
//! - [`buffer`] - in-memory handler used by the built-in factories
//! - [`directory`] - serve a directory tree through a scheme
//! - [`internal`] - `ki://` pages that are always installed

pub mod buffer;
pub mod directory;
pub mod internal;
pub mod job;
pub mod registry;

pub use buffer::BufferSchemeHandler;
pub use directory::{mime_type_for, DirectorySchemeHandlerFactory};
pub use internal::{InternalSchemeHandlerFactory, INTERNAL_SCHEME};
pub use job::SchemeJob;
pub use registry::{SchemeError, SchemeInfo, SchemeRegistry};
