use std::time::SystemTime;

/// RFC 7231 IMF-fixdate for `Date` and `Expires` headers.
#[must_use]
pub fn http_date(at: SystemTime) -> String {
    httpdate::fmt_http_date(at)
}

/// Current time as an HTTP date.
#[must_use]
pub fn now() -> String {
    http_date(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn formats_imf_fixdate() {
        let t = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(http_date(t), "Sun, 06 Nov 1994 08:49:37 GMT");
    }
}
