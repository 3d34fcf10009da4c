//! # arbor
//!
//! **arbor** is an embeddable, thread-pooled HTTP/1.x runtime that dispatches
//! requests by walking a tree of application objects named by URL path
//! segments.
//!
//! ## Overview
//!
//! The application hands arbor a root [`tree::Node`], a
//! [`hooks::HookRegistry`] and a [`config::Config`]. arbor accepts TCP
//! connections, parses HTTP/1.0 and HTTP/1.1 requests, resolves each path to
//! a handler, runs the hook pipeline around it and writes a normalized
//! response.
//!
//! ## Architecture
//!
//! - **[`tree`]** - the application tree: nodes, handlers, handler outcomes
//! - **[`resolver`]** - path-to-handler resolution (`index`, `default`, leaf
//!   handlers, virtual path)
//! - **[`hooks`]** - eight lifecycle hook points with failsafe semantics
//! - **[`lifecycle`]** - request parsing, body processing, error pages,
//!   response finalization (the [`lifecycle::Engine`])
//! - **[`server`]** - accept thread plus [`worker_pool`], graceful shutdown
//! - **[`config`]** / **[`runtime_config`]** - path-scoped configuration and
//!   server settings with `ARBOR_*` environment overrides
//! - **[`http`]** - header map, status codes, protocol versions, dates
//! - **[`error`]** - the error taxonomy and its status mapping
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Acceptor as Accept thread
//!     participant Worker
//!     participant Engine
//!     participant Hooks
//!     participant Handler
//!
//!     Client->>Acceptor: TCP connect
//!     Acceptor->>Worker: queue socket
//!     Worker->>Engine: serve(reader, writer)
//!     Engine->>Engine: parse request line and headers
//!     Engine->>Engine: resolve path
//!     Engine->>Hooks: on_start_resource, before_request_body
//!     Engine->>Engine: read and parse body
//!     Engine->>Hooks: before_main
//!     Engine->>Handler: invoke(call)
//!     Handler-->>Engine: HandlerOutcome
//!     Engine->>Hooks: before_finalize
//!     Engine->>Engine: finalize headers
//!     Engine->>Hooks: on_end_resource
//!     Engine->>Client: status line, headers, body
//!     Engine->>Hooks: on_end_request
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use arbor::config::SectionConfig;
//! use arbor::hooks::HookRegistry;
//! use arbor::lifecycle::Engine;
//! use arbor::runtime_config::ServerConfig;
//! use arbor::server::Server;
//! use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
//!
//! # fn main() -> anyhow::Result<()> {
//! let root = TreeNode::new().with_handler(handler_fn("index", |_| Ok(HandlerOutcome::from("hello"))));
//! let engine = Engine::new(root, HookRegistry::new(), SectionConfig::new());
//! let server = Server::new(engine, ServerConfig::from_env());
//! server.serve_until_interrupted()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Binary
//!
//! `arbor serve` runs a small demo tree (see [`demo`]) with the access log and
//! metrics hooks enabled.

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod hooks;
pub mod http;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod resolver;
pub mod runtime_config;
pub mod server;
pub mod tree;
pub mod worker_pool;

pub use config::{Config, SectionConfig};
pub use error::Error;
pub use hooks::{HookPoint, HookRegistry};
pub use lifecycle::{Engine, Exchange};
pub use runtime_config::ServerConfig;
pub use server::{Server, ServerError, ServerState};
pub use tree::{handler_fn, Handler, HandlerOutcome, Node, TreeNode};
