use super::request::{self, Line};
use super::response::{self, apply_redirect, Finalized, SERVER_NAME};
use super::{error_page, multipart, Body, Exchange, Failure, Params, Request, Response, Stage};
use crate::config::Config;
use crate::error::{is_timeout, panic_message, Error};
use crate::hooks::{HookPoint, HookRegistry};
use crate::http::{Protocol, Status};
use crate::ids::RequestId;
use crate::resolver::{resolve, Resolution};
use crate::runtime_config::{
    DEFAULT_MAX_INTERNAL_REDIRECTS, DEFAULT_MAX_REQUEST_BODY_SIZE, DEFAULT_MAX_REQUEST_HEADER_SIZE,
};
use crate::tree::{Call, Handler, HandlerOutcome, Node};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What happened on one pass over a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// The peer closed (or went quiet) before sending a request line.
    Idle,
    /// A response was written.
    Completed { keep_alive: bool },
}

/// Drives requests from bytes to a written response.
///
/// Cheap to clone; every worker holds one and shares the tree, hooks and
/// configuration.
pub struct Engine {
    root: Arc<dyn Node>,
    hooks: Arc<HookRegistry>,
    config: Arc<dyn Config>,
    server_protocol: Protocol,
}

impl Engine {
    pub fn new<N, C>(root: N, hooks: HookRegistry, config: C) -> Self
    where
        N: Node + 'static,
        C: Config + 'static,
    {
        Self::from_parts(Arc::new(root), Arc::new(hooks), Arc::new(config))
    }

    /// The server protocol is read from `server.protocol_version`
    /// (default `HTTP/1.1`).
    pub fn from_parts(root: Arc<dyn Node>, hooks: Arc<HookRegistry>, config: Arc<dyn Config>) -> Self {
        let server_protocol = config
            .get_str("server.protocol_version", None)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Self {
            root,
            hooks,
            config,
            server_protocol,
        }
    }

    #[must_use]
    pub fn with_server_protocol(mut self, protocol: Protocol) -> Self {
        self.server_protocol = protocol;
        self
    }

    #[must_use]
    pub fn server_protocol(&self) -> Protocol {
        self.server_protocol
    }

    #[must_use]
    pub fn config(&self) -> &dyn Config {
        self.config.as_ref()
    }

    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Read one request from `reader` and write its response to `writer`.
    ///
    /// # Errors
    ///
    /// Only failures writing the response. Every request-side problem is
    /// answered on the wire.
    pub fn serve<R: BufRead, W: Write>(
        &self,
        reader: &mut R,
        writer: &mut W,
        remote: Option<SocketAddr>,
    ) -> io::Result<Served> {
        let header_limit = usize::try_from(self.config.get_u64(
            "server.max_request_header_size",
            None,
            DEFAULT_MAX_REQUEST_HEADER_SIZE,
        ))
        .unwrap_or(usize::MAX);

        let mut exchange = Exchange::new(Request::new(remote), Response::new());
        let mut used = 0usize;
        // Leading blank lines are skipped.
        let line = loop {
            match request::read_line(reader, header_limit.saturating_sub(used)) {
                Ok(Line::Eof) => return Ok(Served::Idle),
                Ok(Line::TooLong) => return self.reject(exchange, Error::UriTooLong, writer),
                Ok(Line::Data(bytes, consumed)) => {
                    used += consumed;
                    if !bytes.is_empty() {
                        break bytes;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Connection closed before a request line arrived");
                    return Ok(Served::Idle);
                }
            }
        };

        let line = String::from_utf8_lossy(&line).into_owned();
        if let Err(err) = exchange.request.parse_request_line(&line) {
            return self.reject(exchange, err, writer);
        }
        exchange.stage = Stage::LineParsed;

        let finalized = self.run(&mut exchange, reader, writer, header_limit.saturating_sub(used));
        let keep_alive = finalized.keep_alive;
        let written = catch_unwind(AssertUnwindSafe(|| finalized.write_to(writer)));
        exchange.stage = Stage::Closed;
        self.run_failsafe(HookPoint::OnEndRequest, &mut exchange);

        match written {
            Ok(Ok(())) => Ok(Served::Completed { keep_alive }),
            Ok(Err(e)) => {
                debug!(request_id = %exchange.request.id, error = %e, "Failed writing response");
                Err(e)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    request_id = %exchange.request.id,
                    panic = %message,
                    "Response body panicked mid-write"
                );
                Err(io::Error::other(format!("response body panicked: {message}")))
            }
        }
    }

    /// Serve every request in `input` back to back and return the raw
    /// bytes written. Stops at the first response that closes the
    /// connection.
    ///
    /// # Errors
    ///
    /// Whatever [`Engine::serve`] returns.
    pub fn serve_bytes(&self, input: &[u8]) -> io::Result<Vec<u8>> {
        let mut reader = io::Cursor::new(input);
        let mut out = Vec::new();
        loop {
            match self.serve(&mut reader, &mut out, None)? {
                Served::Idle | Served::Completed { keep_alive: false } => return Ok(out),
                Served::Completed { keep_alive: true } => {}
            }
        }
    }

    /// Answer a request whose line could not be understood. No hooks run.
    fn reject<W: Write>(&self, mut exchange: Exchange, err: Error, writer: &mut W) -> io::Result<Served> {
        let status = err.status();
        warn!(status = status.code(), error = %err, "Rejecting malformed request");
        exchange.request.close_connection = true;
        let response = &mut exchange.response;
        response.reset_entity();
        response.status = status.clone();
        response.headers.set("Content-Type", "text/html;charset=utf-8");
        response.body = Body::from(error_page::render(&status, &err.public_message(), None, SERVER_NAME));
        let finalized = response::finalize(&exchange.request, response, self.server_protocol, false);
        finalized.write_to(writer)?;
        Ok(Served::Completed { keep_alive: false })
    }

    fn run<R: BufRead, W: Write>(
        &self,
        exchange: &mut Exchange,
        reader: &mut R,
        writer: &mut W,
        header_budget: usize,
    ) -> Finalized {
        let responded = self.respond(exchange, reader, writer, header_budget);
        if !exchange.body_processed && exchange.request.declares_body() {
            // unread body bytes would be parsed as the next request
            debug!(request_id = %exchange.request.id, "Request body left unread; closing");
            exchange.request.close_connection = true;
        }
        let result = match responded {
            Err(Error::Redirect { urls, status }) => {
                apply_redirect(&exchange.request, &mut exchange.response, &urls, status)
            }
            other => other,
        };
        let result = result
            .and_then(|()| {
                self.hooks
                    .run(HookPoint::BeforeFinalize, exchange, self.config.as_ref())
            })
            .and_then(|()| self.finalize_guarded(exchange));
        let finalized = match result {
            Ok(finalized) => finalized,
            Err(err) => self.handle_error(exchange, err),
        };
        exchange.stage = Stage::Finalized;
        self.run_failsafe(HookPoint::OnEndResource, exchange);
        finalized
    }

    fn respond<R: BufRead, W: Write>(
        &self,
        exchange: &mut Exchange,
        reader: &mut R,
        writer: &mut W,
        header_budget: usize,
    ) -> Result<(), Error> {
        let config = self.config.as_ref();
        let lines = request::read_header_lines(reader, header_budget)?;
        exchange.request.apply_headers(lines);
        exchange.stage = Stage::HeadersParsed;

        let request = &mut exchange.request;
        let host = request.header("Host").map(str::to_string);
        if request.protocol.min(self.server_protocol).at_least_11() && host.is_none() {
            return Err(Error::BadRequest(
                "HTTP/1.1 requires a 'Host' request header.".to_string(),
            ));
        }
        request.id = RequestId::from_header_or_new(request.header("X-Request-Id"));
        exchange
            .response
            .headers
            .set("X-Request-Id", request.id.to_string());
        let host = host
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        request.base = format!("{}://{host}", request.scheme);

        let mut body_read = false;
        let mut internal_redirects = 0u64;
        loop {
            self.resolve_into(exchange)?;

            if !body_read {
                body_read = true;
                self.hooks.run(HookPoint::BeforeRequestBody, exchange, config)?;
                self.process_body(exchange, reader, writer)?;
                exchange.body_processed = true;
                exchange.stage = Stage::BodyProcessed;
            }

            self.hooks.run(HookPoint::BeforeMain, exchange, config)?;
            let Some(handler) = exchange.request.handler.as_ref().map(Arc::clone) else {
                debug!(request_id = %exchange.request.id, "Handler cleared by a hook");
                exchange.stage = Stage::Handled;
                return Ok(());
            };
            let outcome = invoke(&handler, exchange)?;
            exchange.stage = Stage::Handled;

            match outcome {
                HandlerOutcome::Body(body) => {
                    exchange.response.body = body;
                    return Ok(());
                }
                HandlerOutcome::Redirect { urls, status } => {
                    return Err(Error::Redirect { urls, status });
                }
                HandlerOutcome::Error { status, message } => {
                    return Err(Error::http(status, message.unwrap_or_default()));
                }
                HandlerOutcome::InternalRedirect { path, query } => {
                    internal_redirects += 1;
                    let limit = config.get_u64(
                        "server.max_internal_redirects",
                        Some(&exchange.request.object_path),
                        DEFAULT_MAX_INTERNAL_REDIRECTS,
                    );
                    if internal_redirects > limit {
                        return Err(Error::internal(format!(
                            "exceeded {limit} internal redirects (last target {path})"
                        )));
                    }
                    let (path, inline_query) = match path.split_once('?') {
                        Some((p, q)) => (p.to_string(), Some(q.to_string())),
                        None => (path, None),
                    };
                    let request = &mut exchange.request;
                    debug!(
                        request_id = %request.id,
                        from = %request.object_path,
                        to = %path,
                        "Internal redirect"
                    );
                    request.object_path = if path.starts_with('/') {
                        path
                    } else {
                        format!("/{path}")
                    };
                    if let Some(query) = query.or(inline_query) {
                        request.params = Params::from_query(&query);
                        request.query_string = query;
                    }
                }
            }
        }
    }

    /// Resolve the current object path and run `on_start_resource`.
    fn resolve_into(&self, exchange: &mut Exchange) -> Result<(), Error> {
        let request = &mut exchange.request;
        let path = request.object_path.clone();
        let mut pending = None;
        match resolve(self.root.as_ref(), &path) {
            Ok(Resolution::IndexRedirect {
                handler,
                object_path,
            }) => {
                request.handler = Some(handler);
                request.handler_path = Some(object_path);
                request.virtual_path.clear();
                let mut target = format!("{path}/");
                if !request.query_string.is_empty() {
                    target.push('?');
                    target.push_str(&request.query_string);
                }
                pending = Some(Error::Redirect {
                    urls: vec![target],
                    status: Some(301),
                });
            }
            Ok(Resolution::Handler {
                handler,
                object_path,
                virtual_path,
                ..
            }) => {
                request.handler = Some(handler);
                request.handler_path = Some(object_path);
                request.virtual_path = virtual_path;
            }
            Err(not_found) => {
                request.handler = None;
                request.handler_path = None;
                request.virtual_path.clear();
                pending = Some(Error::NotFound(not_found));
            }
        }
        exchange.stage = Stage::Resolved;
        self.hooks
            .run(HookPoint::OnStartResource, exchange, self.config.as_ref())?;
        match pending {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn process_body<R: BufRead, W: Write>(
        &self,
        exchange: &mut Exchange,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<(), Error> {
        let request = &mut exchange.request;
        let declared = request
            .header("Content-Length")
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .map_err(|_| Error::BadRequest("Malformed Content-Length Header.".to_string()))
            })
            .transpose()?;
        let chunked = request.header("Transfer-Encoding").is_some_and(|te| {
            te.split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("chunked"))
        });

        if !request.has_entity_method() {
            if chunked || declared.is_some_and(|n| n > 0) {
                // unread body bytes sit in front of the next request
                request.close_connection = true;
            }
            return Ok(());
        }

        let limit = self.config.get_u64(
            "server.max_request_body_size",
            Some(&request.object_path),
            DEFAULT_MAX_REQUEST_BODY_SIZE,
        );
        if let Some(len) = declared {
            if limit > 0 && len > limit {
                request.close_connection = true;
                return Err(Error::EntityTooLarge(format!(
                    "The entity sent with the request exceeds the maximum allowed bytes ({limit})."
                )));
            }
        }
        if !chunked && declared.is_none() {
            request.close_connection = true;
            return Err(Error::http(411, ""));
        }

        if request
            .header("Expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
        {
            write!(writer, "{} 100 Continue\r\n\r\n", self.server_protocol)?;
            writer.flush()?;
        }

        let body = if chunked {
            request::read_chunked_body(reader, limit)
        } else {
            request::read_fixed_body(reader, declared.unwrap_or(0))
        }
        .map_err(|e| {
            request.close_connection = true;
            match e {
                Error::Io(io) if is_timeout(&io) => Error::RequestTimeout,
                other => other,
            }
        })?;

        let content_type = request.header("Content-Type").unwrap_or("").to_string();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "application/x-www-form-urlencoded" => request.params.extend_urlencoded(&body),
            "multipart/form-data" => {
                let boundary = multipart::parse_boundary(&content_type).ok_or_else(|| {
                    Error::BadRequest("multipart body without a boundary".to_string())
                })?;
                multipart::parse_into(&body, &boundary, &mut request.params)?;
            }
            _ => request.body = Some(body),
        }
        Ok(())
    }

    fn finalize_guarded(&self, exchange: &mut Exchange) -> Result<Finalized, Error> {
        let stream_configured = self.config.get_bool(
            "response.stream",
            Some(&exchange.request.object_path),
            false,
        );
        catch_unwind(AssertUnwindSafe(|| {
            response::finalize(
                &exchange.request,
                &mut exchange.response,
                self.server_protocol,
                stream_configured,
            )
        }))
        .map_err(|payload| Error::from_panic(payload, "finalize"))
    }

    fn handle_error(&self, exchange: &mut Exchange, err: Error) -> Finalized {
        exchange.stage = Stage::Error;
        if err.poisons_connection() {
            exchange.request.close_connection = true;
        }

        if let Error::Redirect { urls, status } = &err {
            let redirected = apply_redirect(&exchange.request, &mut exchange.response, urls, *status)
                .and_then(|()| self.finalize_guarded(exchange));
            return match redirected {
                Ok(finalized) => finalized,
                Err(second) => {
                    let failure = Error::FinalizeFailure(format!("redirect failed: {second}"));
                    self.last_resort(exchange, &failure)
                }
            };
        }

        let status = err.status();
        if status.code() >= 500 {
            error!(
                request_id = %exchange.request.id,
                path = %exchange.request.object_path,
                status = status.code(),
                error = %err,
                traceback = err.traceback().unwrap_or(""),
                "Request failed"
            );
        } else {
            debug!(
                request_id = %exchange.request.id,
                path = %exchange.request.object_path,
                status = status.code(),
                error = %err,
                "Request answered with an error"
            );
        }

        match catch_unwind(AssertUnwindSafe(|| self.error_response(exchange, &err))) {
            Ok(Ok(finalized)) => finalized,
            Ok(Err(second)) => {
                let failure = Error::FinalizeFailure(format!("{second} (while answering: {err})"));
                self.last_resort(exchange, &failure)
            }
            Err(payload) => {
                let failure = Error::FinalizeFailure(format!(
                    "panicked: {} (while answering: {err})",
                    panic_message(payload.as_ref())
                ));
                self.last_resort(exchange, &failure)
            }
        }
    }

    fn error_response(&self, exchange: &mut Exchange, err: &Error) -> Result<Finalized, Error> {
        let config = self.config.as_ref();
        exchange.failure = Some(Failure {
            status: err.status(),
            message: err.public_message(),
        });
        self.hooks.run(HookPoint::BeforeErrorResponse, exchange, config)?;

        // before_error_response hooks may rewrite the failure
        let Failure { status, message } = exchange.failure.clone().unwrap_or(Failure {
            status: err.status(),
            message: err.public_message(),
        });
        let traceback = config
            .get_bool("server.show_tracebacks", Some(&exchange.request.object_path), false)
            .then(|| err.traceback())
            .flatten();
        let response = &mut exchange.response;
        response.reset_entity();
        response.status = status.clone();
        response.headers.set("Content-Type", "text/html;charset=utf-8");
        response.body = Body::from(error_page::render(&status, &message, traceback, SERVER_NAME));

        self.hooks.run(HookPoint::AfterErrorResponse, exchange, config)?;
        self.finalize_guarded(exchange)
    }

    /// Fixed 500 that touches neither hooks nor configuration.
    fn last_resort(&self, exchange: &mut Exchange, failure: &Error) -> Finalized {
        error!(request_id = %exchange.request.id, error = %failure, "Sending last-resort response");
        exchange.failure = Some(Failure {
            status: failure.status(),
            message: failure.public_message(),
        });
        exchange.request.close_connection = true;
        exchange.response.status = Status::INTERNAL_SERVER_ERROR;
        Finalized::last_resort(self.server_protocol)
    }

    fn run_failsafe(&self, point: HookPoint, exchange: &mut Exchange) {
        if let Err(e) = self.hooks.run(point, exchange, self.config.as_ref()) {
            error!(point = %point, error = %e, "Failsafe hook point reported an error");
        }
    }
}

fn invoke(handler: &Arc<dyn Handler>, exchange: &mut Exchange) -> Result<HandlerOutcome, Error> {
    let call = Call {
        request: &exchange.request,
        response: &mut exchange.response,
    };
    match catch_unwind(AssertUnwindSafe(|| handler.invoke(call))) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(Error::from_anyhow(e)),
        Err(payload) => Err(Error::from_panic(payload, &format!("handler '{}'", handler.name()))),
    }
}

impl Clone for Engine {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
            hooks: Arc::clone(&self.hooks),
            config: Arc::clone(&self.config),
            server_protocol: self.server_protocol,
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("hooks", &self.hooks.len())
            .field("server_protocol", &self.server_protocol)
            .finish_non_exhaustive()
    }
}
