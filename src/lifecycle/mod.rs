//! # Lifecycle Module
//!
//! Everything that happens to one request between reading its first byte and
//! writing the last byte of its response.
//!
//! ## Stages
//!
//! An [`Exchange`] moves through [`Stage`]s in order:
//!
//! ```text
//! New -> LineParsed -> HeadersParsed -> Resolved -> BodyProcessed
//!     -> Handled -> Finalized -> Closed
//! ```
//!
//! Any failure after `LineParsed` diverts to `Error`, which builds an error
//! page and still ends in `Finalized -> Closed`. Failures before the request
//! line is understood get a bare error response with no hooks.
//!
//! ## Hook Points
//!
//! The [`Engine`] calls the [`HookRegistry`](crate::hooks::HookRegistry) at:
//!
//! | Point | When |
//! |---|---|
//! | `on_start_resource` | handler resolved, before the body is read |
//! | `before_request_body` | before the body is read and parsed |
//! | `before_main` | before the handler runs; may clear the handler |
//! | `before_finalize` | after the handler, before headers are frozen |
//! | `on_end_resource` | after the response is finalized |
//! | `on_end_request` | after the response is written |
//! | `before_error_response` | before an error page is built |
//! | `after_error_response` | after an error page is built |
//!
//! ## Bodies
//!
//! Response bodies are a [`Body`]: empty, buffered, or a lazy stream of
//! [`Chunk`]s that may nest iterators to any depth. Streams are only sent
//! unbuffered when `response.stream` is set (on the response or in config).
//!
//! ## Example
//!
//! ```rust
//! use arbor::config::SectionConfig;
//! use arbor::hooks::HookRegistry;
//! use arbor::lifecycle::Engine;
//! use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
//!
//! let root = TreeNode::new().with_handler(handler_fn("index", |_| Ok(HandlerOutcome::from("hi"))));
//! let engine = Engine::new(root, HookRegistry::new(), SectionConfig::new());
//! let out = engine.serve_bytes(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
//! assert!(out.starts_with(b"HTTP/1.1 200 OK"));
//! ```

mod body;
mod cookies;
mod engine;
pub mod error_page;
pub mod multipart;
mod params;
mod request;
mod response;

pub use body::{Body, Chunk, ChunkIter, Flatten};
pub use cookies::{CookieJar, SetCookie};
pub use engine::{Engine, Served};
pub use params::{FilePart, ParamValue, Params};
pub use request::Request;
pub use response::{Finalized, Response, SERVER_NAME};

use crate::hooks::{Hook, HookConfig, HookPoint};
use crate::http::Status;
use std::time::{Duration, Instant};

/// Position of an exchange in the request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    New,
    LineParsed,
    HeadersParsed,
    Resolved,
    BodyProcessed,
    Handled,
    Finalized,
    Closed,
    Error,
}

/// The error an error page is being built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: Status,
    pub message: String,
}

/// One request and the response being built for it.
///
/// Hooks receive the exchange mutably and may change either side.
#[derive(Debug)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
    pub stage: Stage,
    pub started: Instant,
    /// Set once the error path starts.
    pub failure: Option<Failure>,
    /// The request body has been consumed from the connection.
    pub(crate) body_processed: bool,
    scoped: Vec<(HookPoint, Hook)>,
}

impl Exchange {
    #[must_use]
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            stage: Stage::New,
            started: Instant::now(),
            failure: None,
            body_processed: false,
            scoped: Vec::new(),
        }
    }

    /// Attach a callback that runs at `point` for this request only, after
    /// the registry's hooks. Request-scoped hooks skip the `<name>.on` check.
    pub fn attach_hook<F>(&mut self, point: HookPoint, name: &str, callback: F)
    where
        F: Fn(&mut Exchange, &HookConfig<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.scoped.push((point, Hook::new(name, callback)));
    }

    pub(crate) fn scoped_hooks(&self, point: HookPoint) -> Vec<Hook> {
        self.scoped
            .iter()
            .filter(|(p, _)| *p == point)
            .map(|(_, h)| h.clone())
            .collect()
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
