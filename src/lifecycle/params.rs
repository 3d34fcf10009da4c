use serde_json::{json, Value};

/// An uploaded file from a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Value of one request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    /// A key that appeared more than once, in arrival order.
    List(Vec<ParamValue>),
    File(FilePart),
}

impl ParamValue {
    /// Text of this value, or of the first text item of a list.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::List(items) => items.iter().find_map(ParamValue::as_str),
            ParamValue::File(_) => None,
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&FilePart> {
        match self {
            ParamValue::File(f) => Some(f),
            _ => None,
        }
    }

    /// JSON rendering; files become `{filename, content_type, size}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Text(s) => Value::String(s.clone()),
            ParamValue::List(items) => Value::Array(items.iter().map(ParamValue::to_json).collect()),
            ParamValue::File(f) => json!({
                "filename": f.filename,
                "content_type": f.content_type,
                "size": f.data.len(),
            }),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

/// Merged query-string and body parameters.
///
/// Keys are unique and keep first-arrival order; inserting an existing key
/// turns its value into a [`ParamValue::List`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, ParamValue)>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value, accumulating repeats into a list.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, ParamValue::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::replace(existing, ParamValue::List(Vec::new()));
                *existing = ParamValue::List(vec![first, value]);
            }
            None => self.entries.push((key, value)),
        }
    }

    /// Replace any existing value for `key`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge `application/x-www-form-urlencoded` pairs (query strings and
    /// form bodies share the format).
    pub fn extend_urlencoded(&mut self, input: &[u8]) {
        for (k, v) in url::form_urlencoded::parse(input) {
            self.insert(k.into_owned(), v.into_owned());
        }
    }

    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        params.extend_urlencoded(query.as_bytes());
        params
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_become_lists() {
        let p = Params::from_query("a=1&b=2&a=3&a=4");
        assert_eq!(
            p.get("a"),
            Some(&ParamValue::List(vec!["1".into(), "3".into(), "4".into()]))
        );
        assert_eq!(p.get_str("a"), Some("1"));
        assert_eq!(p.get_str("b"), Some("2"));
        assert_eq!(p.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn decodes_plus_and_percent() {
        let p = Params::from_query("q=hello+world&x=%2Fy");
        assert_eq!(p.get_str("q"), Some("hello world"));
        assert_eq!(p.get_str("x"), Some("/y"));
    }

    #[test]
    fn set_replaces() {
        let mut p = Params::from_query("a=1&a=2");
        p.set("a", "z");
        assert_eq!(p.get("a"), Some(&ParamValue::Text("z".into())));
        assert!(p.remove("a").is_some());
        assert!(p.is_empty());
    }
}
