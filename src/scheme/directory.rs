//! Serves files from a directory through a custom scheme.

use std::path::{Component, Path, PathBuf};

use http::StatusCode;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};

use crate::handler::scheme::{SchemeHandler, SchemeHandlerFactory};
use crate::net::request::{BrowserInfo, Request};
use crate::scheme::buffer::BufferSchemeHandler;

/// Factory mapping `scheme://host/path` to `root/path`.
///
/// Missing files answer 404 and paths escaping the root answer 403. A
/// request for a directory serves its `index.html`.
#[derive(Debug, Clone)]
pub struct DirectorySchemeHandlerFactory {
    root: PathBuf,
}

impl DirectorySchemeHandlerFactory {
    /// Creates a factory for `root`. The root is canonicalized when possible.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a URL path inside the root, or `None` if it escapes it.
    fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(url_path).decode_utf8_lossy();
        let mut path = self.root.clone();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        if path.is_dir() {
            path.push("index.html");
        }
        // Symlinks may still point outside the root.
        match path.canonicalize() {
            Ok(real) if !real.starts_with(&self.root) => None,
            _ => Some(path),
        }
    }
}

impl SchemeHandlerFactory for DirectorySchemeHandlerFactory {
    fn create(
        &self,
        _browser: Option<&BrowserInfo>,
        scheme: &str,
        request: &Request,
    ) -> Option<Box<dyn SchemeHandler>> {
        let Some(path) = self.resolve(request.url.path()) else {
            warn!("Refusing {} request outside root: {}", scheme, request.url);
            return Some(Box::new(BufferSchemeHandler::error(StatusCode::FORBIDDEN)));
        };

        let handler = match std::fs::read(&path) {
            Ok(data) => {
                debug!("Serving {} from {}", request.url, path.display());
                BufferSchemeHandler::new(StatusCode::OK, mime_type_for(&path), data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                BufferSchemeHandler::error(StatusCode::NOT_FOUND)
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                BufferSchemeHandler::error(StatusCode::FORBIDDEN)
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                BufferSchemeHandler::error(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
        Some(Box::new(handler))
    }
}

/// MIME type by file extension.
pub fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
