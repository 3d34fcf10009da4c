//! Error taxonomy of the lifecycle engine.
//!
//! Every variant maps onto the HTTP status the client eventually sees via
//! [`Error::status`]. Handlers and hooks work with `anyhow::Result`; the
//! lifecycle converts whatever they return with [`Error::from_anyhow`],
//! recognising [`HttpSignal`] and [`Error`] values inside the chain.

use crate::http::Status;
use std::any::Any;
use std::io;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Raised only by the path resolver: no exposed handler for the path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("the path '{0}' was not found")]
pub struct NotFound(pub String);

/// Control signals a hook can return (through `anyhow`) to end the exchange
/// with a specific response instead of an internal error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpSignal {
    /// Redirect to one or more URLs. `None` picks 303 for HTTP/1.1 clients
    /// and 302 for HTTP/1.0 ones.
    #[error("redirect to {}", .urls.join(", "))]
    Redirect { urls: Vec<String>, status: Option<u16> },
    /// Respond with an error status and an optional message.
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or(""))]
    Error { status: u16, message: Option<String> },
}

impl HttpSignal {
    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect {
            urls: vec![url.into()],
            status: None,
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No handler resolved (404).
    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// Malformed request, or HTTP/1.1 without `Host` (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Body or header block exceeds the configured maximum (413).
    #[error("request entity too large: {0}")]
    EntityTooLarge(String),

    /// Request line longer than the header budget (414).
    #[error("request-URI too long")]
    UriTooLong,

    /// Request major version other than 1 (505).
    #[error("HTTP version not supported: {0}")]
    VersionNotSupported(String),

    /// Client went quiet while the body was being read (408).
    #[error("request timeout")]
    RequestTimeout,

    /// An HTTP error signalled by a handler or hook.
    #[error("HTTP {status}: {message}")]
    Http { status: Status, message: String },

    /// A redirect signalled by a handler, hook, or the resolver's
    /// trailing-slash rule. Carried through the error channel so any stage
    /// can end the exchange; never rendered as an error page.
    #[error("redirect ({}) to {}", .status.map_or_else(|| "auto".to_string(), |s| s.to_string()), .urls.join(", "))]
    Redirect { urls: Vec<String>, status: Option<u16> },

    /// Any uncaught failure in a hook, handler, or finalize (500).
    #[error("internal error: {message}")]
    Internal {
        message: String,
        traceback: Option<String>,
    },

    /// A second failure while the error response itself was being built.
    /// Only ever answered with the fixed last-resort response.
    #[error("failure while building the error response: {0}")]
    FinalizeFailure(String),

    /// Connection-level I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            traceback: None,
        }
    }

    /// Build an [`Error::Http`], falling back to 500 for invalid codes.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match Status::new(status) {
            Ok(status) => Self::Http { status, message },
            Err(e) => Self::Internal {
                message: e.to_string(),
                traceback: None,
            },
        }
    }

    /// Status the client sees for this error.
    #[must_use]
    pub fn status(&self) -> Status {
        let code = match self {
            Error::NotFound(_) => 404,
            Error::BadRequest(_) => 400,
            Error::EntityTooLarge(_) => 413,
            Error::UriTooLong => 414,
            Error::VersionNotSupported(_) => 505,
            Error::RequestTimeout => 408,
            Error::Http { status, .. } => return status.clone(),
            Error::Redirect { status, .. } => status.unwrap_or(302),
            Error::Io(e) if is_timeout(e) => 408,
            Error::Io(_) => 400,
            Error::Internal { .. } | Error::FinalizeFailure(_) => 500,
        };
        Status::new(code).unwrap_or(Status::INTERNAL_SERVER_ERROR)
    }

    /// Message shown on the error page.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Error::Http { message, .. } => message.clone(),
            Error::Internal { .. } | Error::FinalizeFailure(_) => {
                "The server encountered an unexpected condition which prevented it from fulfilling the request.".to_string()
            }
            other => other.to_string(),
        }
    }

    #[must_use]
    pub fn traceback(&self) -> Option<&str> {
        match self {
            Error::Internal { traceback, .. } => traceback.as_deref(),
            _ => None,
        }
    }

    /// Errors after which the connection's read position is unknown, so the
    /// connection must not be reused.
    #[must_use]
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Error::BadRequest(_)
                | Error::EntityTooLarge(_)
                | Error::UriTooLong
                | Error::VersionNotSupported(_)
                | Error::RequestTimeout
                | Error::Io(_)
        )
    }

    /// Convert whatever a handler or hook returned.
    ///
    /// An [`HttpSignal`] or an [`Error`] anywhere in the chain wins; anything
    /// else becomes [`Error::Internal`] with the full chain as traceback.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        if let Some(signal) = err.downcast_ref::<HttpSignal>() {
            return match signal.clone() {
                HttpSignal::Redirect { urls, status } => Error::Redirect { urls, status },
                HttpSignal::Error { status, message } => {
                    Error::http(status, message.unwrap_or_default())
                }
            };
        }
        let traceback = format!("{err:?}");
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(err) => Error::Internal {
                message: err.to_string(),
                traceback: Some(traceback),
            },
        }
    }

    /// Convert a caught panic payload, capturing a backtrace for the log.
    pub fn from_panic(payload: Box<dyn Any + Send>, context: &str) -> Self {
        let message = panic_message(payload.as_ref());
        let backtrace = std::backtrace::Backtrace::force_capture();
        Error::Internal {
            message: format!("{context} panicked: {message}"),
            traceback: Some(format!("panicked at: {message}\n{backtrace}")),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
