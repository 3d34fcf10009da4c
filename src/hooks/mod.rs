//! # Hooks Module
//!
//! Named callbacks that run at fixed points of the request lifecycle.
//!
//! ## Registration
//!
//! A [`HookRegistry`] is built once at startup and shared by every worker.
//! Callbacks are registered per [`HookPoint`] and run in registration order:
//!
//! ```rust
//! use arbor::hooks::{HookPoint, HookRegistry};
//!
//! let hooks = HookRegistry::new().with(HookPoint::BeforeFinalize, "powered_by", |ex, _cfg| {
//!     ex.response.set_header("X-Powered-By", "arbor");
//!     Ok(())
//! });
//! assert_eq!(hooks.hooks(HookPoint::BeforeFinalize).len(), 1);
//! ```
//!
//! ## Enabling
//!
//! A registered hook named `foo` only runs where the config key `foo.on`
//! is true for the request's path. Its own settings live under the same
//! prefix and are read through [`HookConfig`] (`cfg.get_str("token")` reads
//! `foo.token`). Hooks attached to a single exchange with
//! [`Exchange::attach_hook`](crate::lifecycle::Exchange::attach_hook) always run.
//!
//! ## Failure Semantics
//!
//! - `on_start_resource`, `on_end_resource` and `on_end_request` are
//!   failsafe: a failing or panicking callback is logged and the rest still run.
//! - Every other point stops at the first failure. The failure is converted
//!   with [`Error::from_anyhow`](crate::error::Error::from_anyhow), so a hook
//!   can end the request with an [`HttpSignal`](crate::error::HttpSignal).
//!
//! ## Built-in Hooks
//!
//! - [`access_log`] - one structured log line per request (`access_log.on`)
//! - [`MetricsHook`] - request counters and latency (`metrics.on`)
//! - [`token_auth`] - shared-token `Authorization` check (`auth.on`, `auth.token`)

mod auth;
mod core;
mod metrics;
mod tracing;

pub use self::auth::{token_auth, AUTH_HOOK};
pub use self::core::{Hook, HookConfig, HookFn, HookPoint, HookRegistry, UnknownHookPoint};
pub use self::metrics::{MetricsHook, METRICS_HOOK};
pub use self::tracing::{access_log, ACCESS_LOG_HOOK};
