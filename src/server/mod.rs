//! # Server Module
//!
//! The thread-pooled connection server: one accept thread feeding accepted
//! sockets to a fixed [`WorkerPool`](crate::worker_pool::WorkerPool). Each
//! worker runs the lifecycle [`Engine`](crate::lifecycle::Engine) for every
//! request on its connection until the connection stops being persistent.
//!
//! ## States
//!
//! ```text
//! Stopped --start()--> Starting --listener bound, workers up--> Started
//! Started --stop()---> Stopped
//! ```
//!
//! `start` from any state other than `Stopped` fails immediately with
//! [`ServerError::AlreadyStarting`] or [`ServerError::AlreadyStarted`].
//!
//! ## Shutdown
//!
//! Setting the interrupt flag (directly, from a signal handler, or through
//! [`Server::stop`]) makes the accept thread leave its loop at the next
//! poll. It then queues one shutdown sentinel per worker behind any
//! connections still waiting and joins every worker, so requests already
//! accepted are answered before `stop` returns.
//!
//! ## Example
//!
//! ```rust,no_run
//! use arbor::config::SectionConfig;
//! use arbor::hooks::HookRegistry;
//! use arbor::lifecycle::Engine;
//! use arbor::runtime_config::ServerConfig;
//! use arbor::server::Server;
//! use arbor::tree::TreeNode;
//!
//! let engine = Engine::new(TreeNode::new(), HookRegistry::new(), SectionConfig::new());
//! let server = Server::new(engine, ServerConfig::default());
//! let addr = server.start()?;
//! println!("listening on {addr}");
//! server.stop()?;
//! # Ok::<(), arbor::server::ServerError>(())
//! ```

mod connection;
mod http_server;

pub use self::http_server::{Server, ServerError, ServerState};
