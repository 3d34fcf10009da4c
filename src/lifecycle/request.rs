use super::cookies::CookieJar;
use super::params::Params;
use crate::error::Error;
use crate::http::{HeaderMap, Protocol};
use crate::ids::RequestId;
use crate::tree::Handler;
use std::io::{self, BufRead, Read};
use std::net::SocketAddr;
use std::sync::Arc;

/// One parsed request, owned by the worker serving it.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub remote_addr: Option<SocketAddr>,
    /// The request line as received, without the line terminator.
    pub request_line: String,
    pub method: String,
    /// Percent-decoded path; `%2F` is kept encoded so it never splits a segment.
    pub raw_path: String,
    pub query_string: String,
    pub protocol: Protocol,
    pub headers: HeaderMap,
    pub cookies: CookieJar,
    pub params: Params,
    /// Path being dispatched; rewritten by internal redirects.
    pub object_path: String,
    /// Resolved handler. A `before_main` hook may clear it to skip the call.
    pub handler: Option<Arc<dyn Handler>>,
    /// Dotted location of the handler, e.g. `root.a.default`.
    pub handler_path: Option<String>,
    pub virtual_path: Vec<String>,
    /// Raw body for content types that are not form-encoded.
    pub body: Option<Vec<u8>>,
    pub scheme: String,
    /// `scheme://host` as seen by the client.
    pub base: String,
    /// Set when the connection cannot be reused after this request.
    pub close_connection: bool,
}

impl Request {
    #[must_use]
    pub fn new(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: RequestId::new(),
            remote_addr,
            request_line: String::new(),
            method: String::new(),
            raw_path: String::new(),
            query_string: String::new(),
            protocol: Protocol::HTTP_10,
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            params: Params::new(),
            object_path: String::new(),
            handler: None,
            handler_path: None,
            virtual_path: Vec::new(),
            body: None,
            scheme: "http".to_string(),
            base: String::new(),
            close_connection: false,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }

    /// Whether the method carries an entity body the engine reads.
    #[must_use]
    pub fn has_entity_method(&self) -> bool {
        matches!(self.method.as_str(), "POST" | "PUT")
    }

    /// Whether framing headers announce body bytes after the header block.
    #[must_use]
    pub fn declares_body(&self) -> bool {
        let chunked = self.header("Transfer-Encoding").is_some_and(|te| {
            te.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
        });
        let sized = self
            .header("Content-Length")
            .is_some_and(|v| v.trim().parse::<u64>().map_or(true, |n| n > 0));
        chunked || sized
    }

    /// Absolute URL of the current object path.
    #[must_use]
    pub fn url(&self) -> String {
        let mut url = format!("{}{}", self.base, self.object_path);
        if !self.query_string.is_empty() {
            url.push('?');
            url.push_str(&self.query_string);
        }
        url
    }

    /// Parse `METHOD SP target SP HTTP/x.y` into this request.
    ///
    /// # Errors
    ///
    /// [`Error::BadRequest`] for a malformed line, target or version, and
    /// [`Error::VersionNotSupported`] for major versions other than 1.
    pub fn parse_request_line(&mut self, line: &str) -> Result<(), Error> {
        let malformed = || Error::BadRequest("Malformed Request-Line".to_string());
        let mut parts = line.trim().splitn(3, ' ');
        let (Some(method), Some(target), Some(proto)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(malformed());
        }
        let protocol: Protocol = proto.trim().parse().map_err(|_| malformed())?;
        if protocol.major != 1 {
            return Err(Error::VersionNotSupported(proto.trim().to_string()));
        }
        let (path, query) = split_target(target.trim())?;

        self.request_line = line.to_string();
        self.method = method.to_string();
        self.protocol = protocol;
        self.params = Params::from_query(&query);
        self.object_path = path.clone();
        self.raw_path = path;
        self.query_string = query;
        Ok(())
    }

    /// Store header lines: last write wins, every `Cookie` line feeds the jar.
    pub fn apply_headers(&mut self, lines: Vec<(String, String)>) {
        for (name, value) in lines {
            if name.eq_ignore_ascii_case("Cookie") {
                self.cookies.load(&value);
            }
            self.headers.set(&name, value);
        }
    }
}

/// Strip an absolute-URI prefix, split off the query, and percent-decode the
/// path without turning `%2F` into a separator.
pub(crate) fn split_target(target: &str) -> Result<(String, String), Error> {
    let target = strip_authority(target);
    let target = target.split_once('#').map_or(target, |(t, _)| t);
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let protected = path.replace("%2F", "%252F").replace("%2f", "%252F");
    let decoded = urlencoding::decode(&protected)
        .map_err(|_| Error::BadRequest("Malformed Request-URI".to_string()))?;
    Ok((decoded.into_owned(), query.to_string()))
}

fn strip_authority(target: &str) -> &str {
    let Some(idx) = target.find("://") else {
        return target;
    };
    if !target[..idx].bytes().all(|b| b.is_ascii_alphabetic()) {
        return target;
    }
    let rest = &target[idx + 3..];
    match rest.find('/') {
        Some(slash) => &rest[slash..],
        None => "/",
    }
}

/// Result of reading one CRLF-terminated line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    Eof,
    TooLong,
    /// Line content without the terminator, plus bytes consumed.
    Data(Vec<u8>, usize),
}

pub(crate) fn read_line<R: BufRead>(reader: &mut R, limit: usize) -> io::Result<Line> {
    let mut buf = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let consumed = reader.by_ref().take(cap).read_until(b'\n', &mut buf)?;
    if consumed == 0 {
        return Ok(Line::Eof);
    }
    if !buf.ends_with(b"\n") && consumed > limit {
        return Ok(Line::TooLong);
    }
    if buf.ends_with(b"\n") {
        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }
    }
    Ok(Line::Data(buf, consumed))
}

/// Read the header block up to the blank line, joining continuation lines.
///
/// # Errors
///
/// [`Error::EntityTooLarge`] once `budget` bytes are exceeded,
/// [`Error::BadRequest`] for malformed lines or a truncated block, and
/// [`Error::Io`] for socket failures.
pub(crate) fn read_header_lines<R: BufRead>(
    reader: &mut R,
    budget: usize,
) -> Result<Vec<(String, String)>, Error> {
    let mut used = 0usize;
    let mut lines: Vec<(String, String)> = Vec::new();
    loop {
        let (bytes, consumed) = match read_line(reader, budget.saturating_sub(used))? {
            Line::Eof => return Err(Error::BadRequest("Unexpected end of request headers".into())),
            Line::TooLong => {
                return Err(Error::EntityTooLarge(
                    "The headers sent with the request exceed the maximum allowed bytes.".into(),
                ))
            }
            Line::Data(bytes, consumed) => (bytes, consumed),
        };
        used += consumed;
        if bytes.is_empty() {
            return Ok(lines);
        }
        let text = String::from_utf8_lossy(&bytes);
        if text.starts_with([' ', '\t']) {
            let Some((_, value)) = lines.last_mut() else {
                return Err(Error::BadRequest("Illegal continuation line.".into()));
            };
            value.push(' ');
            value.push_str(text.trim());
            continue;
        }
        match text.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                lines.push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => return Err(Error::BadRequest("Illegal header line.".into())),
        }
    }
}

/// Read exactly `len` body bytes.
pub(crate) fn read_fixed_body<R: Read>(reader: &mut R, len: u64) -> Result<Vec<u8>, Error> {
    let mut data = Vec::with_capacity(usize::try_from(len.min(64 * 1024)).unwrap_or(0));
    reader.by_ref().take(len).read_to_end(&mut data)?;
    if (data.len() as u64) < len {
        return Err(Error::BadRequest(
            "Request body shorter than its Content-Length".into(),
        ));
    }
    Ok(data)
}

/// Decode a chunked body, failing as soon as more than `limit` bytes
/// (`0` = unlimited) have arrived.
pub(crate) fn read_chunked_body<R: BufRead>(reader: &mut R, limit: u64) -> Result<Vec<u8>, Error> {
    let bad = |msg: &str| Error::BadRequest(msg.to_string());
    let mut body = Vec::new();
    loop {
        let Line::Data(line, _) = read_line(reader, 1024)? else {
            return Err(bad("Bad chunked transfer coding"));
        };
        let line = String::from_utf8_lossy(&line);
        let size_field = line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| bad("Bad chunked transfer size"))?;
        if size == 0 {
            // trailers
            loop {
                match read_line(reader, 8 * 1024)? {
                    Line::Data(t, _) if t.is_empty() => return Ok(body),
                    Line::Data(..) => continue,
                    Line::Eof => return Ok(body),
                    Line::TooLong => return Err(bad("Chunked trailer too long")),
                }
            }
        }
        let total = u64::try_from(body.len())
            .ok()
            .and_then(|len| len.checked_add(size))
            .filter(|total| usize::try_from(*total).is_ok());
        let Some(total) = total else {
            return Err(Error::EntityTooLarge(format!(
                "Chunk of {size} bytes overflows the request body."
            )));
        };
        if limit > 0 && total > limit {
            return Err(Error::EntityTooLarge(format!(
                "The entity sent with the request exceeds the maximum allowed bytes ({limit})."
            )));
        }
        let chunk = read_fixed_body(reader, size)?;
        body.extend_from_slice(&chunk);
        match read_line(reader, 2)? {
            Line::Data(crlf, _) if crlf.is_empty() => {}
            _ => return Err(bad("Chunk data not terminated by CRLF")),
        }
    }
}
