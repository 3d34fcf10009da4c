//! # HTTP Codec Module
//!
//! Pure data structures shared by the lifecycle engine and the connection server:
//!
//! - [`HeaderMap`] - ordered, case-insensitive header multimap with the
//!   general / response / entity sort used when a response is finalized
//! - [`Status`] - validated status code plus reason phrase
//! - [`Protocol`] - the `HTTP/<major>.<minor>` version of a request or server
//! - [`date`] - `Date` header formatting
//!
//! Nothing in here touches a socket.

pub mod date;
mod headers;
mod status;

pub use headers::{header_class, HeaderClass, HeaderMap, HeaderVec, MAX_INLINE_HEADERS};
pub use status::{Status, StatusError};

use std::fmt;
use std::str::FromStr;

/// HTTP protocol version as carried on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Protocol {
    pub major: u8,
    pub minor: u8,
}

impl Protocol {
    pub const HTTP_10: Protocol = Protocol { major: 1, minor: 0 };
    pub const HTTP_11: Protocol = Protocol { major: 1, minor: 1 };

    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether this version has HTTP/1.1 semantics (mandatory `Host`,
    /// persistent connections by default, chunked transfer coding).
    #[inline]
    #[must_use]
    pub fn at_least_11(self) -> bool {
        self >= Self::HTTP_11
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Self::HTTP_11
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/{}.{}", self.major, self.minor)
    }
}

/// Error returned when a protocol token is not of the form `HTTP/x.y`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed protocol version: {0:?}")]
pub struct ProtocolError(pub String);

impl FromStr for Protocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProtocolError(s.to_string());
        let version = s.strip_prefix("HTTP/").ok_or_else(bad)?;
        let (major, minor) = version.split_once('.').ok_or_else(bad)?;
        if major.is_empty() || minor.is_empty() {
            return Err(bad());
        }
        Ok(Protocol {
            major: major.parse().map_err(|_| bad())?,
            minor: minor.parse().map_err(|_| bad())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_versions() {
        assert_eq!("HTTP/1.1".parse::<Protocol>(), Ok(Protocol::HTTP_11));
        assert_eq!("HTTP/1.0".parse::<Protocol>(), Ok(Protocol::HTTP_10));
        assert_eq!("HTTP/2.0".parse::<Protocol>(), Ok(Protocol::new(2, 0)));
        assert!("HTTP/1".parse::<Protocol>().is_err());
        assert!("http/1.1".parse::<Protocol>().is_err());
        assert!("HTTP/x.1".parse::<Protocol>().is_err());
    }

    #[test]
    fn orders_versions() {
        assert!(Protocol::HTTP_10 < Protocol::HTTP_11);
        assert!(Protocol::HTTP_11.at_least_11());
        assert!(!Protocol::HTTP_10.at_least_11());
        assert_eq!(Protocol::HTTP_10.min(Protocol::HTTP_11), Protocol::HTTP_10);
    }
}
