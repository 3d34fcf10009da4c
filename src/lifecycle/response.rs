use super::body::{Body, Flatten};
use super::cookies::SetCookie;
use super::request::Request;
use crate::error::Error;
use crate::http::{date, HeaderMap, Protocol, Status, StatusError};
use std::io::{self, Write};
use tracing::warn;

/// `Server` header value sent by default.
pub const SERVER_NAME: &str = concat!("arbor/", env!("CARGO_PKG_VERSION"));

/// Headers describing the entity; dropped when an error page replaces the body.
const ENTITY_HEADERS: &[&str] = &[
    "Content-Type",
    "Content-Length",
    "Content-Encoding",
    "Content-Language",
    "Content-Location",
    "Content-MD5",
    "Content-Range",
    "Last-Modified",
    "ETag",
    "Expires",
];

/// Minimum body size some old browsers need before they show a server's
/// error page instead of their own.
const ERROR_PADDING: &[(u16, usize)] = &[
    (400, 512),
    (403, 256),
    (404, 512),
    (405, 256),
    (406, 512),
    (408, 512),
    (409, 512),
    (410, 256),
    (500, 512),
    (501, 512),
    (505, 512),
];

/// The response under construction.
#[derive(Debug)]
pub struct Response {
    pub status: Status,
    pub headers: HeaderMap,
    pub body: Body,
    pub cookies: Vec<SetCookie>,
    /// Send a streamed body as it is produced instead of buffering it.
    pub stream: bool,
}

impl Response {
    /// A 200 response with the default `Content-Type`, `Server` and `Date`.
    #[must_use]
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", "text/html");
        headers.set("Server", SERVER_NAME);
        headers.set("Date", date::now());
        Self {
            status: Status::OK,
            headers,
            body: Body::Empty,
            cookies: Vec::new(),
            stream: false,
        }
    }

    /// # Errors
    ///
    /// [`StatusError::OutOfRange`] for codes outside `100..=599`.
    pub fn set_status(&mut self, code: u16) -> Result<(), StatusError> {
        self.status = Status::new(code)?;
        Ok(())
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = body.into();
    }

    pub fn set_cookie(&mut self, cookie: SetCookie) {
        self.cookies.push(cookie);
    }

    /// Drop the entity (body plus entity headers) before an error page.
    pub(crate) fn reset_entity(&mut self) {
        for name in ENTITY_HEADERS {
            self.headers.remove(name);
        }
        self.body = Body::Empty;
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

/// Point `response` at `urls` with a 3xx status.
///
/// Relative URLs are joined against the request's current URL.
///
/// # Errors
///
/// [`Error::Internal`] for a status outside `300..=399` or one (306) with
/// no defined redirect semantics.
pub(crate) fn apply_redirect(
    request: &Request,
    response: &mut Response,
    urls: &[String],
    status: Option<u16>,
) -> Result<(), Error> {
    let code = status.unwrap_or(if request.protocol.at_least_11() { 303 } else { 302 });
    if !(300..=399).contains(&code) {
        return Err(Error::internal(format!("redirect status must be between 300 and 399, got {code}")));
    }
    let current = url::Url::parse(&request.url()).ok();
    let absolute: Vec<String> = urls
        .iter()
        .map(|u| match current.as_ref().and_then(|base| base.join(u).ok()) {
            Some(joined) => joined.to_string(),
            None => u.clone(),
        })
        .collect();
    response.status = Status::new(code).map_err(|e| Error::internal(e.to_string()))?;

    match code {
        300..=303 | 307 | 308 => {
            let Some(first) = absolute.first() else {
                return Err(Error::internal("redirect without a target URL"));
            };
            response.headers.set("Location", first.clone());
            response.headers.set("Content-Type", "text/html;charset=utf-8");
            let links: Vec<String> = absolute
                .iter()
                .map(|u| {
                    let escaped = super::error_page::escape(u);
                    format!("This resource can be found at <a href=\"{escaped}\">{escaped}</a>.")
                })
                .collect();
            response.body = Body::from(links.join("<br />\n"));
        }
        304 => {
            for name in ENTITY_HEADERS {
                response.headers.remove(name);
            }
            response.body = Body::Empty;
        }
        305 => {
            let Some(first) = absolute.first() else {
                return Err(Error::internal("redirect without a target URL"));
            };
            response.headers.set("Location", first.clone());
            response.body = Body::Empty;
        }
        other => {
            return Err(Error::internal(format!("the {other} status code is unknown")));
        }
    }
    Ok(())
}

fn connection_has(value: Option<&str>, token: &str) -> bool {
    value.is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Freeze `response` into wire form.
///
/// `stream_configured` is the `response.stream` setting at the request's
/// path; `server_protocol` goes on the status line.
pub(crate) fn finalize(
    request: &Request,
    response: &mut Response,
    server_protocol: Protocol,
    stream_configured: bool,
) -> Finalized {
    let status = response.status.clone();
    let protocol = request.protocol.min(server_protocol);
    let mut body = response.body.take();

    if !status.allows_body() {
        body = Body::Empty;
    }
    if let Some(&(_, threshold)) = ERROR_PADDING.iter().find(|(c, _)| *c == status.code()) {
        let mut bytes = body.collapse();
        if !bytes.is_empty() && bytes.len() <= threshold {
            bytes.resize(threshold + 1, b' ');
        }
        body = Body::Full(bytes);
    }

    let streaming = (response.stream || stream_configured) && body.is_stream();
    let wants_close = request.close_connection
        || connection_has(request.header("Connection"), "close")
        || connection_has(response.headers.get("Connection"), "close");
    let (keep_alive, chunked) = if protocol.at_least_11() {
        let keep_alive = !wants_close;
        (keep_alive, streaming && keep_alive)
    } else {
        let requested = connection_has(request.header("Connection"), "keep-alive");
        (requested && !wants_close && !streaming, false)
    };

    if !keep_alive {
        response.headers.set("Connection", "close");
    } else if !protocol.at_least_11() {
        response.headers.set("Connection", "Keep-Alive");
    }

    if streaming {
        response.headers.remove("Content-Length");
        if chunked {
            response.headers.set("Transfer-Encoding", "chunked");
        } else {
            response.headers.remove("Transfer-Encoding");
        }
    } else {
        let bytes = body.collapse();
        response.headers.remove("Transfer-Encoding");
        response.headers.remove("Content-Length");
        if status.allows_body() {
            response.headers.append("Content-Length", bytes.len().to_string());
        }
        body = Body::Full(bytes);
    }

    for cookie in std::mem::take(&mut response.cookies) {
        response.headers.append("Set-Cookie", cookie.to_string());
    }
    response.headers.sort_by_class();

    let is_head = request.is_head();
    if is_head {
        body = Body::Empty;
    }
    Finalized {
        protocol: server_protocol,
        status,
        headers: response.headers.clone().into_vec(),
        body: body.into_chunks(),
        chunked: chunked && !is_head,
        keep_alive,
    }
}

/// A response ready for the wire.
pub struct Finalized {
    pub protocol: Protocol,
    pub status: Status,
    pub headers: Vec<(String, String)>,
    body: Flatten,
    chunked: bool,
    /// Whether the connection may serve another request afterwards.
    pub keep_alive: bool,
}

impl Finalized {
    /// The fixed response sent when building the error page itself failed.
    #[must_use]
    pub fn last_resort(protocol: Protocol) -> Self {
        let body = b"Unrecoverable error in the server.".to_vec();
        Self {
            protocol,
            status: Status::INTERNAL_SERVER_ERROR,
            headers: vec![
                ("Content-Type".to_string(), "text/plain".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
                ("Connection".to_string(), "close".to_string()),
            ],
            body: Body::Full(body).into_chunks(),
            chunked: false,
            keep_alive: false,
        }
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Write the status line, headers and body, pulling streamed chunks as
    /// they are produced.
    ///
    /// # Errors
    ///
    /// Any write failure from `out`.
    pub fn write_to<W: Write>(self, out: &mut W) -> io::Result<()> {
        let Finalized {
            protocol,
            status,
            headers,
            body,
            chunked,
            ..
        } = self;
        let mut head = format!("{protocol} {status}\r\n");
        for (name, value) in &headers {
            if value.contains(['\r', '\n']) {
                warn!(header = %name, "Dropping header value containing a line break");
                continue;
            }
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        out.write_all(head.as_bytes())?;

        for chunk in body {
            if chunked {
                out.write_all(format!("{:X}\r\n", chunk.len()).as_bytes())?;
                out.write_all(&chunk)?;
                out.write_all(b"\r\n")?;
            } else {
                out.write_all(&chunk)?;
            }
        }
        if chunked {
            out.write_all(b"0\r\n\r\n")?;
        }
        out.flush()
    }
}

impl std::fmt::Debug for Finalized {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalized")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("chunked", &self.chunked)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}
