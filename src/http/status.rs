use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

/// Error produced when a status code or status line is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    /// The code is outside `100..=599`.
    #[error("illegal response status from server ({0} is out of range)")]
    OutOfRange(u16),
    /// The status string does not start with a three digit code.
    #[error("illegal response status from server ({0:?} is non-numeric)")]
    Malformed(String),
}

/// A validated HTTP status: numeric code plus reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    reason: Cow<'static, str>,
}

impl Status {
    pub const OK: Status = Status::known(200, "OK");
    pub const MOVED_PERMANENTLY: Status = Status::known(301, "Moved Permanently");
    pub const BAD_REQUEST: Status = Status::known(400, "Bad Request");
    pub const NOT_FOUND: Status = Status::known(404, "Not Found");
    pub const INTERNAL_SERVER_ERROR: Status = Status::known(500, "Internal Server Error");
    pub const SERVICE_UNAVAILABLE: Status = Status::known(503, "Service Unavailable");

    const fn known(code: u16, reason: &'static str) -> Self {
        Self {
            code,
            reason: Cow::Borrowed(reason),
        }
    }

    /// Build a status with the canonical reason phrase.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::OutOfRange`] for codes outside `100..=599`.
    pub fn new(code: u16) -> Result<Self, StatusError> {
        if !(100..=599).contains(&code) {
            return Err(StatusError::OutOfRange(code));
        }
        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|c| c.canonical_reason())
            .unwrap_or("Unknown");
        Ok(Self::known(code, reason))
    }

    /// Build a status with a custom reason phrase.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::OutOfRange`] for codes outside `100..=599`.
    pub fn with_reason(code: u16, reason: impl Into<String>) -> Result<Self, StatusError> {
        let mut status = Self::new(code)?;
        let reason = reason.into();
        if !reason.is_empty() {
            status.reason = Cow::Owned(reason);
        }
        Ok(status)
    }

    #[inline]
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    #[inline]
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// 1xx, 204 and 304 responses never carry a message body.
    #[must_use]
    pub fn allows_body(&self) -> bool {
        !(self.code < 200 || self.code == 204 || self.code == 304)
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.code)
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

impl FromStr for Status {
    type Err = StatusError;

    /// Parse `"404"` or `"404 Gone Fishing"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (code, reason) = match s.split_once(' ') {
            Some((code, reason)) => (code, reason.trim()),
            None => (s, ""),
        };
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StatusError::Malformed(s.to_string()));
        }
        let code: u16 = code
            .parse()
            .map_err(|_| StatusError::Malformed(s.to_string()))?;
        Self::with_reason(code, reason)
    }
}

impl TryFrom<u16> for Status {
    type Error = StatusError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}
