use smallvec::SmallVec;
use std::sync::Arc;

/// Maximum headers stored inline before spilling to the heap.
/// Most requests and responses carry ≤16 headers.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Inline header storage.
///
/// Header names use `Arc<str>` because the same few names (Content-Type,
/// Content-Length, Date, Server) are set on every response; values stay
/// `String` as they are per-request data.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Priority class of a header when a response is serialized.
///
/// Finalized responses list general headers first, then response headers,
/// then entity headers, then everything else (RFC 2616 §4.2 recommendation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeaderClass {
    General = 0,
    Response = 1,
    Entity = 2,
    Other = 3,
}

const GENERAL_HEADERS: &[&str] = &[
    "cache-control",
    "connection",
    "date",
    "pragma",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "via",
    "warning",
];

const RESPONSE_HEADERS: &[&str] = &[
    "accept-ranges",
    "age",
    "etag",
    "location",
    "proxy-authenticate",
    "retry-after",
    "server",
    "vary",
    "www-authenticate",
];

const ENTITY_HEADERS: &[&str] = &[
    "allow",
    "content-encoding",
    "content-language",
    "content-length",
    "content-location",
    "content-md5",
    "content-range",
    "content-type",
    "expires",
    "last-modified",
];

/// Classify a header name (case-insensitive).
#[must_use]
pub fn header_class(name: &str) -> HeaderClass {
    let matches = |table: &[&str]| table.iter().any(|h| h.eq_ignore_ascii_case(name));
    if matches(GENERAL_HEADERS) {
        HeaderClass::General
    } else if matches(RESPONSE_HEADERS) {
        HeaderClass::Response
    } else if matches(ENTITY_HEADERS) {
        HeaderClass::Entity
    } else {
        HeaderClass::Other
    }
}

/// Ordered, case-insensitive header multimap.
///
/// Insertion order is preserved. Names keep the casing they were first
/// written with; lookups ignore case per RFC 7230.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HeaderVec,
}

impl HeaderMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value written for `name`, if any.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value written for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Replace every value of `name` with a single value appended at the end.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.remove(name);
        self.entries.push((Arc::from(name), value.into()));
    }

    /// Replace the value of `name` in place when present, otherwise append.
    ///
    /// Used for defaults that should keep their original position.
    pub fn set_in_place(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(slot) => {
                slot.1 = value;
                let first = Arc::clone(&slot.0);
                let mut seen = false;
                self.entries.retain(|(k, _)| {
                    if !k.eq_ignore_ascii_case(&first) {
                        return true;
                    }
                    let keep = !seen;
                    seen = true;
                    keep
                });
            }
            None => self.entries.push((Arc::from(name), value)),
        }
    }

    /// Add a value without touching existing ones (`Set-Cookie`, `Vary`).
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((Arc::from(name), value.into()));
    }

    /// Remove every value of `name`. Returns whether anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before != self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v.as_str()))
    }

    /// Header names in order, one entry per value.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_ref())
    }

    /// Stable sort into general, response, entity, then other headers.
    ///
    /// Headers of the same class keep their relative insertion order.
    pub fn sort_by_class(&mut self) {
        self.entries.sort_by_key(|(k, _)| header_class(k));
    }

    /// Freeze into an owned list for the wire.
    #[must_use]
    pub fn into_vec(self) -> Vec<(String, String)> {
        self.entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.append(k.as_ref(), v);
        }
        map
    }
}
