//! Loader settings and configuration management.
//!
//! This module provides the tunables of the resource loader, supporting
//! multiple configuration sources with proper precedence.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Largest read the loader will issue. One below the ceiling the network
/// layer accepts for a single read.
pub const MAX_READ_BUFFER_SIZE: usize = 999_999;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration.
    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Failed to parse JSON configuration.
    #[error("Failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Unsupported file format.
    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Protocol spoken to the upstream proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    /// Host names are resolved by the proxy.
    Socks5,
}

impl ProxyType {
    /// URL scheme of the proxy endpoint.
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyType::Http => "http",
            ProxyType::Https => "https",
            ProxyType::Socks5 => "socks5h",
        }
    }
}

impl std::str::FromStr for ProxyType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyType::Http),
            "https" => Ok(ProxyType::Https),
            "socks5" | "socks5h" | "socks" => Ok(ProxyType::Socks5),
            other => Err(ConfigError::ValidationError(format!(
                "unknown proxy type '{}' (expected http, https or socks5)",
                other
            ))),
        }
    }
}

/// Upstream proxy for `http`/`https` loads. Custom schemes never use it.
///
/// # Example
///
/// ```rust
/// use ki_resource_loader::config::{ProxyConfig, ProxyType};
///
/// let proxy = ProxyConfig::new("localhost", 8080)
///     .with_type(ProxyType::Socks5)
///     .with_bypass(["localhost", ".internal.test"]);
/// assert_eq!(proxy.endpoint().unwrap().as_str(), "socks5h://localhost:8080");
/// assert_eq!(proxy.bypass_list().as_deref(), Some("localhost,.internal.test"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub proxy_type: ProxyType,

    /// Basic credentials sent in `Proxy-Authorization`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Hosts loaded directly. A leading dot matches subdomains.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bypass: Vec<String>,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            proxy_type: ProxyType::default(),
            username: None,
            password: None,
            bypass: Vec::new(),
        }
    }

    pub fn with_type(mut self, proxy_type: ProxyType) -> Self {
        self.proxy_type = proxy_type;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_bypass<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bypass.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Proxy endpoint without credentials.
    ///
    /// # Errors
    ///
    /// Fails if host and port do not form a valid URL.
    pub fn endpoint(&self) -> Result<url::Url, ConfigError> {
        let raw = format!("{}://{}:{}", self.proxy_type.scheme(), self.host, self.port);
        url::Url::parse(&raw)
            .map_err(|e| ConfigError::ValidationError(format!("invalid proxy '{}': {}", raw, e)))
    }

    /// Comma-separated bypass list, or `None` when everything is proxied.
    pub fn bypass_list(&self) -> Option<String> {
        let hosts: Vec<&str> = self
            .bypass
            .iter()
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .collect();
        (!hosts.is_empty()).then(|| hosts.join(","))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::ValidationError("proxy host is empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationError("proxy port is 0".to_string()));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::ValidationError(
                "proxy password given without a username".to_string(),
            ));
        }
        self.endpoint().map(|_| ())
    }
}

/// Resource loader settings.
///
/// # Configuration Precedence
///
/// Settings are applied in the following order (later sources override earlier):
/// 1. Default values
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables
/// 4. CLI arguments
///
/// # Example
///
/// ```rust
/// use ki_resource_loader::config::LoaderSettings;
///
/// let settings = LoaderSettings::default()
///     .with_max_redirects(5)
///     .with_sync_load_timeout_ms(10_000);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderSettings {
    /// Size of each body read in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// How often upload progress is sampled, in milliseconds.
    #[serde(default = "default_upload_progress_interval_ms")]
    pub upload_progress_interval_ms: u64,

    /// Longest gap between two upload progress updates while the upload
    /// advances, in milliseconds.
    #[serde(default = "default_upload_progress_max_delay_ms")]
    pub upload_progress_max_delay_ms: u64,

    /// Redirects followed before a load fails.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Upper bound on a synchronous load. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_load_timeout_ms: Option<u64>,

    /// Custom user agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Send and store cookies.
    #[serde(default = "default_cookies_enabled")]
    pub cookies_enabled: bool,

    /// Directory for download-to-file temporaries. The system temp directory
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,

    /// Proxy configuration for the HTTP stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

// Default value functions for serde
fn default_read_buffer_size() -> usize {
    MAX_READ_BUFFER_SIZE
}

fn default_upload_progress_interval_ms() -> u64 {
    100
}

fn default_upload_progress_max_delay_ms() -> u64 {
    1000
}

fn default_max_redirects() -> u32 {
    20
}

fn default_cookies_enabled() -> bool {
    true
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            upload_progress_interval_ms: default_upload_progress_interval_ms(),
            upload_progress_max_delay_ms: default_upload_progress_max_delay_ms(),
            max_redirects: default_max_redirects(),
            sync_load_timeout_ms: None,
            user_agent: None,
            cookies_enabled: default_cookies_enabled(),
            download_dir: None,
            proxy: None,
        }
    }
}

impl LoaderSettings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a configuration file.
    ///
    /// Supports both TOML and JSON formats, detected by file extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        match file_extension(path).as_str() {
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Saves settings to a configuration file in the format named by its
    /// extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match file_extension(path).as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            ext => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Loads settings from environment variables.
    ///
    /// Environment variables are prefixed with `KI_LOADER_`, for example
    /// `KI_LOADER_MAX_REDIRECTS` or `KI_LOADER_SYNC_LOAD_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("KI_LOADER_READ_BUFFER_SIZE") {
            if let Ok(size) = val.parse() {
                self.read_buffer_size = size;
            }
        }

        if let Ok(val) = env::var("KI_LOADER_UPLOAD_PROGRESS_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.upload_progress_interval_ms = interval;
            }
        }

        if let Ok(val) = env::var("KI_LOADER_UPLOAD_PROGRESS_MAX_DELAY_MS") {
            if let Ok(delay) = val.parse() {
                self.upload_progress_max_delay_ms = delay;
            }
        }

        if let Ok(val) = env::var("KI_LOADER_MAX_REDIRECTS") {
            if let Ok(max) = val.parse() {
                self.max_redirects = max;
            }
        }

        if let Ok(val) = env::var("KI_LOADER_SYNC_LOAD_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.sync_load_timeout_ms = Some(timeout);
            }
        }

        if let Ok(val) = env::var("KI_LOADER_USER_AGENT") {
            self.user_agent = Some(val);
        }

        if let Ok(val) = env::var("KI_LOADER_COOKIES_ENABLED") {
            self.cookies_enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("KI_LOADER_DOWNLOAD_DIR") {
            self.download_dir = Some(PathBuf::from(val));
        }

        if let Ok(host) = env::var("KI_LOADER_PROXY_HOST") {
            let port = env::var("KI_LOADER_PROXY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080);

            let mut proxy = ProxyConfig::new(host, port);

            if let Ok(proxy_type) = env::var("KI_LOADER_PROXY_TYPE") {
                if let Ok(pt) = proxy_type.parse() {
                    proxy.proxy_type = pt;
                }
            }

            if let Ok(username) = env::var("KI_LOADER_PROXY_USERNAME") {
                proxy.username = Some(username);
            }

            if let Ok(password) = env::var("KI_LOADER_PROXY_PASSWORD") {
                proxy.password = Some(password);
            }

            if let Ok(bypass) = env::var("KI_LOADER_PROXY_BYPASS") {
                proxy = proxy.with_bypass(bypass.split(','));
            }

            self.proxy = Some(proxy);
        }
    }

    /// Returns the settings with environment variable overrides applied.
    pub fn merge_with_env(mut self) -> Self {
        self.apply_env_overrides();
        self
    }

    /// Returns the settings with CLI argument overrides applied.
    pub fn merge_with_args(mut self, args: &CliArgs) -> Self {
        if let Some(size) = args.read_buffer_size {
            self.read_buffer_size = size;
        }
        if let Some(max) = args.max_redirects {
            self.max_redirects = max;
        }
        if let Some(timeout) = args.sync_load_timeout_ms {
            self.sync_load_timeout_ms = Some(timeout);
        }
        if let Some(ref user_agent) = args.user_agent {
            self.user_agent = Some(user_agent.clone());
        }
        if let Some(enabled) = args.cookies_enabled {
            self.cookies_enabled = enabled;
        }
        if let Some(ref dir) = args.download_dir {
            self.download_dir = Some(dir.clone());
        }

        if let Some(ref proxy_host) = args.proxy_host {
            let port = args.proxy_port.unwrap_or(8080);
            let mut proxy = ProxyConfig::new(proxy_host, port);

            if let Some(ref proxy_type) = args.proxy_type {
                if let Ok(pt) = proxy_type.parse() {
                    proxy.proxy_type = pt;
                }
            }
            proxy = proxy.with_bypass(args.proxy_bypass.iter().cloned());

            self.proxy = Some(proxy);
        }

        self
    }

    /// Validates all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any setting is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "Read buffer size must be at least 1 byte".to_string(),
            ));
        }
        if self.read_buffer_size > MAX_READ_BUFFER_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Read buffer size cannot exceed {} bytes",
                MAX_READ_BUFFER_SIZE
            )));
        }

        if self.upload_progress_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Upload progress interval must be at least 1ms".to_string(),
            ));
        }
        if self.upload_progress_max_delay_ms < self.upload_progress_interval_ms {
            return Err(ConfigError::ValidationError(
                "Upload progress max delay cannot be shorter than the sampling interval"
                    .to_string(),
            ));
        }

        if self.max_redirects > 100 {
            return Err(ConfigError::ValidationError(
                "Maximum redirects cannot exceed 100".to_string(),
            ));
        }

        if self.sync_load_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "Sync load timeout must be at least 1ms when set".to_string(),
            ));
        }

        if let Some(ref proxy) = self.proxy {
            proxy.validate()?;
        }

        if let Some(ref dir) = self.download_dir {
            if !dir.is_dir() {
                return Err(ConfigError::ValidationError(format!(
                    "Download directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Upload progress sampling interval.
    pub fn upload_progress_interval(&self) -> Duration {
        Duration::from_millis(self.upload_progress_interval_ms)
    }

    /// Longest gap between upload progress updates.
    pub fn upload_progress_max_delay(&self) -> Duration {
        Duration::from_millis(self.upload_progress_max_delay_ms)
    }

    /// Synchronous load timeout, if any.
    pub fn sync_load_timeout(&self) -> Option<Duration> {
        self.sync_load_timeout_ms.map(Duration::from_millis)
    }

    // Builder-style methods for convenient configuration

    /// Sets the read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Sets the upload progress sampling interval and maximum delay.
    pub fn with_upload_progress(mut self, interval_ms: u64, max_delay_ms: u64) -> Self {
        self.upload_progress_interval_ms = interval_ms;
        self.upload_progress_max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the maximum number of redirects.
    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Bounds synchronous loads.
    pub fn with_sync_load_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.sync_load_timeout_ms = Some(timeout_ms);
        self
    }

    /// Sets the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Enables or disables cookies.
    pub fn with_cookies(mut self, enabled: bool) -> Self {
        self.cookies_enabled = enabled;
        self
    }

    /// Sets the download directory.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Sets the proxy configuration.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Setting overrides collected from the command line. All fields are
/// optional to allow partial overrides.
#[derive(Debug, Default, Clone)]
pub struct CliArgs {
    /// Read buffer size in bytes.
    pub read_buffer_size: Option<usize>,
    /// Maximum redirects.
    pub max_redirects: Option<u32>,
    /// Synchronous load timeout in milliseconds.
    pub sync_load_timeout_ms: Option<u64>,
    /// Custom user agent string.
    pub user_agent: Option<String>,
    /// Enable cookies.
    pub cookies_enabled: Option<bool>,
    /// Download-to-file directory.
    pub download_dir: Option<PathBuf>,
    /// Proxy host.
    pub proxy_host: Option<String>,
    /// Proxy port.
    pub proxy_port: Option<u16>,
    /// Proxy type (http, https, socks5).
    pub proxy_type: Option<String>,
    /// Hosts that skip the proxy.
    pub proxy_bypass: Vec<String>,
    /// Configuration file path.
    pub config_file: Option<PathBuf>,
}

impl CliArgs {
    /// Creates an empty CliArgs instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the final settings by applying the full configuration chain:
    /// defaults or file, then environment, then these arguments.
    pub fn load_settings(&self) -> Result<LoaderSettings, ConfigError> {
        let mut settings = if let Some(ref config_file) = self.config_file {
            LoaderSettings::from_file(config_file)?
        } else {
            LoaderSettings::default()
        };

        settings = settings.merge_with_env();
        settings = settings.merge_with_args(self);
        settings.validate()?;

        Ok(settings)
    }
}
