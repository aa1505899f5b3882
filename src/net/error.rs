//! Network error codes.
//!
//! The codes mirror the negative integer convention used by the browser
//! network stack so that host applications can compare them with values they
//! already know (`-3` is an aborted request, `-302` an unknown scheme, ...).

use thiserror::Error;

/// Errors reported by a network transaction or by the loader itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// A generic failure occurred.
    #[error("request failed")]
    Failed,

    /// The request was aborted, usually by the user or a handler.
    #[error("request aborted")]
    Aborted,

    /// An argument to the function is incorrect.
    #[error("invalid argument")]
    InvalidArgument,

    /// The file or directory cannot be found.
    #[error("file not found")]
    FileNotFound,

    /// Permission to access a resource was denied.
    #[error("access denied")]
    AccessDenied,

    /// A connection attempt failed.
    #[error("connection failed")]
    ConnectionFailed,

    /// The URL is invalid.
    #[error("invalid URL")]
    InvalidUrl,

    /// The scheme of the URL is disallowed.
    #[error("disallowed URL scheme")]
    DisallowedUrlScheme,

    /// The scheme of the URL is unknown.
    #[error("unknown URL scheme")]
    UnknownUrlScheme,

    /// Attempting to load an URL resulted in too many redirects.
    #[error("too many redirects")]
    TooManyRedirects,

    /// Attempting to load an URL resulted in an unsafe redirect.
    #[error("unsafe redirect")]
    UnsafeRedirect,

    /// Any other error, identified by its raw code.
    #[error("network error {0}")]
    Other(i32),
}

impl NetError {
    /// Returns the numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            NetError::Failed => -2,
            NetError::Aborted => -3,
            NetError::InvalidArgument => -4,
            NetError::FileNotFound => -6,
            NetError::AccessDenied => -10,
            NetError::ConnectionFailed => -104,
            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,
            NetError::UnknownUrlScheme => -302,
            NetError::TooManyRedirects => -310,
            NetError::UnsafeRedirect => -311,
            NetError::Other(code) => *code,
        }
    }

    /// Maps a numeric code back to an error.
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => NetError::Failed,
            -3 => NetError::Aborted,
            -4 => NetError::InvalidArgument,
            -6 => NetError::FileNotFound,
            -10 => NetError::AccessDenied,
            -104 => NetError::ConnectionFailed,
            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,
            -302 => NetError::UnknownUrlScheme,
            -310 => NetError::TooManyRedirects,
            -311 => NetError::UnsafeRedirect,
            other => NetError::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(NetError::Aborted.code(), -3);
        assert_eq!(NetError::UnknownUrlScheme.code(), -302);
        assert_eq!(NetError::from_code(-310), NetError::TooManyRedirects);
        assert_eq!(NetError::from_code(-999), NetError::Other(-999));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(NetError::Aborted.to_string(), "request aborted");
        assert!(NetError::Other(-7).to_string().contains("-7"));
    }
}
