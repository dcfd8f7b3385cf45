use std::{error::Error as StdError, time::Duration};

use thiserror::Error;

/// Machine-readable error codes, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigException,
    ConfigNotFound,
    ChannelException,
    ChannelNotFound,
    NotImplemented,
    TimeToLiveExpired,
    IoException,
    Timeout,
    Generic,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigException => "CFG_EXCEPTION",
            Self::ConfigNotFound => "CFG_NOTFOUND",
            Self::ChannelException => "CHN_ERROR",
            Self::ChannelNotFound => "CHN_NOTFOUND",
            Self::NotImplemented => "FTR_NOTIMPL",
            Self::TimeToLiveExpired => "MSG_TTLEXP",
            Self::IoException => "XIO_EXCEPTION",
            Self::Timeout => "TIMEOUT",
            Self::Generic => "GENERIC",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad classification of a failure.
///
/// Business failures are permanent until the application takes a remediation
/// step (e.g. picks another transport). System failures come from the
/// environment (configuration, network) and some of them are transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Business,
    System,
}

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A configuration path is absent from the active tree.
    #[error("configuration not found: {path}")]
    ConfigNotFound { path: String },

    /// The operation needs an open channel.
    #[error("channel [{name}]: {message}")]
    Channel { name: String, message: String },

    /// A sender, receiver or connector cannot be resolved.
    #[error("channel not found: {name}")]
    ChannelNotFound { name: String },

    #[error("not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("message {id} has expired its time-to-live")]
    TimeToLiveExpired { id: u64 },

    /// Failure in the underlying transport library.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("timed out after {after:?} waiting for [{name}] to become {state}")]
    Timeout {
        name: String,
        state: String,
        after: Duration,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    #[must_use]
    pub fn channel(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            name: name.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn channel_not_found(name: impl Into<String>) -> Self {
        Self::ChannelNotFound { name: name.into() }
    }

    #[must_use]
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented {
            feature: feature.into(),
        }
    }

    #[must_use]
    pub fn io(context: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Io {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config { .. } => ErrorCode::ConfigException,
            Self::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Self::Channel { .. } => ErrorCode::ChannelException,
            Self::ChannelNotFound { .. } => ErrorCode::ChannelNotFound,
            Self::NotImplemented { .. } => ErrorCode::NotImplemented,
            Self::TimeToLiveExpired { .. } => ErrorCode::TimeToLiveExpired,
            Self::Io { .. } => ErrorCode::IoException,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Message { .. } => ErrorCode::Generic,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotImplemented { .. } => ErrorKind::Business,
            _ => ErrorKind::System,
        }
    }

    /// True for configuration failures, including a missing path.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::ConfigNotFound { .. })
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ── Shared context trait ────────────────────────────────────────────────────

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// switchyard_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

impl_context!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::config("x").code().as_str(), "CFG_EXCEPTION");
        assert_eq!(Error::channel("a", "b").code().as_str(), "CHN_ERROR");
        assert_eq!(Error::channel_not_found("a").code().as_str(), "CHN_NOTFOUND");
        assert_eq!(Error::not_implemented("x").code().as_str(), "FTR_NOTIMPL");
        assert_eq!(
            Error::TimeToLiveExpired { id: 4 }.code().as_str(),
            "MSG_TTLEXP"
        );
    }

    #[test]
    fn not_implemented_is_business() {
        assert_eq!(Error::not_implemented("amqp sender").kind(), ErrorKind::Business);
        assert_eq!(Error::config("bad").kind(), ErrorKind::System);
    }

    #[test]
    fn io_keeps_source() {
        let err = Error::io(
            "connect failed",
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(err.to_string(), "connect failed: refused");
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn context_wraps_message() {
        let res: std::result::Result<(), std::fmt::Error> = Err(std::fmt::Error);
        let err = res.context("formatting").err();
        assert!(matches!(err, Some(Error::Message { .. })));

        let none: Option<u8> = None;
        assert_eq!(
            none.context("missing value").err().map(|e| e.to_string()),
            Some("missing value".to_string())
        );
    }

    #[test]
    fn config_not_found_is_config() {
        assert!(Error::config_not_found("connectors.x").is_config());
        assert!(!Error::channel_not_found("x").is_config());
    }
}
