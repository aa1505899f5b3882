//! Request-side value types.
//!
//! [`Request`] is the view of a resource request that host handlers see and
//! may mutate. [`RequestParams`] bundles it with the loader-only attributes
//! (priority, owning browser) and is moved from the owner-thread bridge into
//! the IO-side proxy when the load starts.

use std::io::Read;
use std::path::PathBuf;

use bitflags::bitflags;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::net::error::NetError;

bitflags! {
    /// Flags controlling how a request is loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlags: u32 {
        /// Ignore any cached copy and revalidate.
        const BYPASS_CACHE = 1 << 0;
        /// Do not read from or write to the cache.
        const DISABLE_CACHE = 1 << 1;
        /// Do not attach stored cookies to the request.
        const DO_NOT_SEND_COOKIES = 1 << 2;
        /// Do not store cookies set by the response.
        const DO_NOT_SAVE_COOKIES = 1 << 3;
        /// Write the response body to a temporary file instead of delivering it.
        const DOWNLOAD_TO_FILE = 1 << 4;
        /// Report upload progress to the peer.
        const REPORT_UPLOAD_PROGRESS = 1 << 5;
    }
}

/// The kind of resource being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Top-level page.
    MainFrame,
    /// Frame or iframe.
    SubFrame,
    /// CSS stylesheet.
    Stylesheet,
    /// External script.
    Script,
    /// Image (jpg/gif/png/etc).
    Image,
    /// Font.
    FontResource,
    /// XMLHttpRequest.
    Xhr,
    /// Audio or video.
    Media,
    /// Anything else.
    #[default]
    Other,
}

/// Scheduling priority handed to the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Idle,
    Lowest,
    Low,
    #[default]
    Medium,
    Highest,
}

/// Identifies the browser that owns a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrowserInfo {
    /// Unique browser identifier.
    pub id: Uuid,
}

impl BrowserInfo {
    /// Creates a browser reference with a fresh identifier.
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for BrowserInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// One element of an upload body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadElement {
    /// In-memory bytes.
    Bytes(Bytes),
    /// Contents of a file on disk.
    File(PathBuf),
}

impl UploadElement {
    fn size(&self) -> u64 {
        match self {
            UploadElement::Bytes(bytes) => bytes.len() as u64,
            UploadElement::File(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
        }
    }
}

/// Request body made of ordered elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadBody {
    pub elements: Vec<UploadElement>,
}

impl UploadBody {
    /// Creates an empty upload body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a body holding a single in-memory element.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            elements: vec![UploadElement::Bytes(bytes.into())],
        }
    }

    /// Appends in-memory bytes.
    pub fn push_bytes(&mut self, bytes: impl Into<Bytes>) {
        self.elements.push(UploadElement::Bytes(bytes.into()));
    }

    /// Appends a file element.
    pub fn push_file(&mut self, path: impl Into<PathBuf>) {
        self.elements.push(UploadElement::File(path.into()));
    }

    /// Total size in bytes. Files that cannot be inspected count as empty.
    pub fn size(&self) -> u64 {
        self.elements.iter().map(UploadElement::size).sum()
    }

    /// Returns true if the body has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Reads every element into one contiguous buffer.
    pub fn read_all(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        for element in &self.elements {
            match element {
                UploadElement::Bytes(bytes) => out.extend_from_slice(bytes),
                UploadElement::File(path) => {
                    std::fs::File::open(path)?.read_to_end(&mut out)?;
                }
            }
        }
        Ok(out)
    }
}

/// A resource request as seen by host handlers.
#[derive(Debug, Clone)]
pub struct Request {
    /// Fully qualified URL.
    pub url: Url,

    /// Request method.
    pub method: Method,

    /// Request headers.
    pub headers: HeaderMap,

    /// Referring page, if any.
    pub referrer: Option<Url>,

    /// URL used to decide whether cookies are first-party.
    pub first_party_for_cookies: Option<Url>,

    /// Optional request body.
    pub upload: Option<UploadBody>,

    /// Load flags.
    pub load_flags: LoadFlags,

    /// Kind of resource requested.
    pub resource_type: ResourceType,
}

impl Request {
    /// Creates a GET request for the given URL.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            referrer: None,
            first_party_for_cookies: None,
            upload: None,
            load_flags: LoadFlags::empty(),
            resource_type: ResourceType::Other,
        }
    }

    /// Parses `url` and creates a GET request for it.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        Url::parse(url)
            .map(Self::new)
            .map_err(|_| NetError::InvalidUrl)
    }

    /// Adds a header from raw strings.
    pub fn set_header_str(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| NetError::InvalidArgument)?;
        let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidArgument)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Returns the URL that cookie policy should treat as first-party.
    pub fn cookie_first_party(&self) -> &Url {
        self.first_party_for_cookies.as_ref().unwrap_or(&self.url)
    }
}

/// Everything needed to start a load.
#[derive(Debug, Clone)]
pub struct RequestParams {
    /// The request itself.
    pub request: Request,

    /// Scheduling priority.
    pub priority: RequestPriority,

    /// Owning browser, if the request belongs to one.
    pub browser: Option<BrowserInfo>,
}

impl RequestParams {
    /// Creates parameters for a GET request.
    pub fn new(url: Url) -> Self {
        Self {
            request: Request::new(url),
            priority: RequestPriority::default(),
            browser: None,
        }
    }

    /// Parses `url` and creates parameters for a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        Request::parse(url).map(|request| Self {
            request,
            priority: RequestPriority::default(),
            browser: None,
        })
    }

    /// Sets the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.request.headers.append(name, value);
        self
    }

    /// Sets the upload body.
    pub fn with_upload(mut self, upload: UploadBody) -> Self {
        self.request.upload = Some(upload);
        self
    }

    /// Adds load flags.
    pub fn with_load_flags(mut self, flags: LoadFlags) -> Self {
        self.request.load_flags |= flags;
        self
    }

    /// Sets the resource type.
    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.request.resource_type = resource_type;
        self
    }

    /// Sets the referrer.
    pub fn with_referrer(mut self, referrer: Url) -> Self {
        self.request.referrer = Some(referrer);
        self
    }

    /// Sets the first-party URL for cookies.
    pub fn with_first_party_for_cookies(mut self, url: Url) -> Self {
        self.request.first_party_for_cookies = Some(url);
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the owning browser.
    pub fn with_browser(mut self, browser: BrowserInfo) -> Self {
        self.browser = Some(browser);
        self
    }
}
