//! # Application Tree
//!
//! The embedding application hands the engine a root [`Node`]. Each node has
//! case-sensitive named children and named [`Handler`]s; the resolver walks
//! children by URL segment and then looks for an `index`, `default`, or
//! leaf handler. The engine only ever reads the tree.
//!
//! [`TreeNode`] is a ready-made node for applications that don't need their
//! own `Node` implementation:
//!
//! ```rust
//! use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
//!
//! let root = TreeNode::new()
//!     .with_handler(handler_fn("index", |_call| Ok(HandlerOutcome::from("home"))))
//!     .with_child(
//!         "blog",
//!         TreeNode::new().with_handler(handler_fn("default", |call| {
//!             Ok(HandlerOutcome::from(format!("post {}", call.args().join("/"))))
//!         })),
//!     );
//! ```

use crate::lifecycle::{Body, Params, Request, Response};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a handler asks the engine to do next.
pub enum HandlerOutcome {
    /// Respond with this body (status and headers as set on the response).
    Body(Body),
    /// Send the client elsewhere. `status: None` picks 303 for HTTP/1.1 and
    /// 302 for HTTP/1.0.
    Redirect { urls: Vec<String>, status: Option<u16> },
    /// Respond with an error page.
    Error { status: u16, message: Option<String> },
    /// Re-dispatch the same request to another path without telling the
    /// client. A `query` replaces the request parameters.
    InternalRedirect { path: String, query: Option<String> },
}

impl HandlerOutcome {
    pub fn redirect(url: impl Into<String>) -> Self {
        Self::Redirect {
            urls: vec![url.into()],
            status: None,
        }
    }

    pub fn redirect_with_status(url: impl Into<String>, status: u16) -> Self {
        Self::Redirect {
            urls: vec![url.into()],
            status: Some(status),
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self::Error {
            status,
            message: Some(message.into()),
        }
    }

    pub fn internal_redirect(path: impl Into<String>) -> Self {
        Self::InternalRedirect {
            path: path.into(),
            query: None,
        }
    }

    pub fn empty() -> Self {
        Self::Body(Body::Empty)
    }
}

impl fmt::Debug for HandlerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(b) => f.debug_tuple("Body").field(b).finish(),
            Self::Redirect { urls, status } => f
                .debug_struct("Redirect")
                .field("urls", urls)
                .field("status", status)
                .finish(),
            Self::Error { status, message } => f
                .debug_struct("Error")
                .field("status", status)
                .field("message", message)
                .finish(),
            Self::InternalRedirect { path, query } => f
                .debug_struct("InternalRedirect")
                .field("path", path)
                .field("query", query)
                .finish(),
        }
    }
}

impl From<Body> for HandlerOutcome {
    fn from(b: Body) -> Self {
        Self::Body(b)
    }
}

impl From<&str> for HandlerOutcome {
    fn from(s: &str) -> Self {
        Self::Body(Body::from(s))
    }
}

impl From<String> for HandlerOutcome {
    fn from(s: String) -> Self {
        Self::Body(Body::from(s))
    }
}

impl From<Vec<u8>> for HandlerOutcome {
    fn from(v: Vec<u8>) -> Self {
        Self::Body(Body::from(v))
    }
}

/// Arguments of one handler invocation.
pub struct Call<'a> {
    pub request: &'a Request,
    pub response: &'a mut Response,
}

impl Call<'_> {
    /// Unconsumed trailing path segments, in URL order.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.request.virtual_path
    }

    /// Query-string and body parameters.
    #[must_use]
    pub fn params(&self) -> &Params {
        &self.request.params
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.request.params.get_str(name)
    }
}

/// An exposed callable on the tree.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Whether URL dispatch may reach this handler.
    fn exposed(&self) -> bool {
        true
    }

    fn invoke(&self, call: Call<'_>) -> anyhow::Result<HandlerOutcome>;
}

impl fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name())
            .field("exposed", &self.exposed())
            .finish()
    }
}

/// A node of the application tree.
pub trait Node: Send + Sync {
    fn child(&self, name: &str) -> Option<&dyn Node>;
    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>>;
}

type HandlerFn = dyn Fn(Call<'_>) -> anyhow::Result<HandlerOutcome> + Send + Sync;

/// Closure-backed [`Handler`].
pub struct FnHandler {
    name: String,
    exposed: bool,
    f: Box<HandlerFn>,
}

impl FnHandler {
    /// Same handler, hidden from URL dispatch.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.exposed = false;
        self
    }
}

impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn exposed(&self) -> bool {
        self.exposed
    }

    fn invoke(&self, call: Call<'_>) -> anyhow::Result<HandlerOutcome> {
        (self.f)(call)
    }
}

pub fn handler_fn<F>(name: impl Into<String>, f: F) -> FnHandler
where
    F: Fn(Call<'_>) -> anyhow::Result<HandlerOutcome> + Send + Sync + 'static,
{
    FnHandler {
        name: name.into(),
        exposed: true,
        f: Box::new(f),
    }
}

/// Map-backed [`Node`].
#[derive(Default)]
pub struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl TreeNode {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_child(mut self, name: impl Into<String>, node: TreeNode) -> Self {
        self.children.insert(name.into(), node);
        self
    }

    /// Attach a handler under its own [`Handler::name`].
    #[must_use]
    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.add_handler(Arc::new(handler));
        self
    }

    pub fn add_child(&mut self, name: impl Into<String>, node: TreeNode) -> &mut Self {
        self.children.insert(name.into(), node);
        self
    }

    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> &mut Self {
        self.handlers.insert(handler.name().to_string(), handler);
        self
    }
}

impl Node for TreeNode {
    fn child(&self, name: &str) -> Option<&dyn Node> {
        self.children.get(name).map(|c| c as &dyn Node)
    }

    fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).map(Arc::clone)
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeNode")
            .field("children", &self.children.keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
