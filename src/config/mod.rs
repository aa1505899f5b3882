//! Configuration module for ki-resource-loader.
//!
//! This module provides configuration management for the loader, including:
//! - Loading settings from files (TOML/JSON)
//! - Environment variable overrides
//! - CLI argument overrides
//! - Validation and defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use ki_resource_loader::config::LoaderSettings;
//!
//! let settings = LoaderSettings::from_file("loader.toml").unwrap();
//! let settings = settings.merge_with_env();
//! ```

mod settings;

pub use settings::{
    CliArgs, ConfigError, LoaderSettings, ProxyConfig, ProxyType, MAX_READ_BUFFER_SIZE,
};
