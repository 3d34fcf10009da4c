use crate::config::Config;
use crate::error::{panic_message, Error};
use crate::lifecycle::Exchange;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, trace};

/// The fixed points of the request lifecycle where callbacks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HookPoint {
    OnStartResource,
    BeforeRequestBody,
    BeforeMain,
    BeforeFinalize,
    OnEndResource,
    OnEndRequest,
    BeforeErrorResponse,
    AfterErrorResponse,
}

impl HookPoint {
    pub const ALL: [HookPoint; 8] = [
        HookPoint::OnStartResource,
        HookPoint::BeforeRequestBody,
        HookPoint::BeforeMain,
        HookPoint::BeforeFinalize,
        HookPoint::OnEndResource,
        HookPoint::OnEndRequest,
        HookPoint::BeforeErrorResponse,
        HookPoint::AfterErrorResponse,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            HookPoint::OnStartResource => "on_start_resource",
            HookPoint::BeforeRequestBody => "before_request_body",
            HookPoint::BeforeMain => "before_main",
            HookPoint::BeforeFinalize => "before_finalize",
            HookPoint::OnEndResource => "on_end_resource",
            HookPoint::OnEndRequest => "on_end_request",
            HookPoint::BeforeErrorResponse => "before_error_response",
            HookPoint::AfterErrorResponse => "after_error_response",
        }
    }

    /// Failsafe points run every callback even when one fails.
    #[must_use]
    pub fn is_failsafe(self) -> bool {
        matches!(
            self,
            HookPoint::OnStartResource | HookPoint::OnEndResource | HookPoint::OnEndRequest
        )
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown hook point: {0:?}")]
pub struct UnknownHookPoint(pub String);

impl FromStr for HookPoint {
    type Err = UnknownHookPoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookPoint::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| UnknownHookPoint(s.to_string()))
    }
}

/// Per-callback view of the configuration: `get("token")` on a hook named
/// `auth` reads `auth.token` at the request's path.
pub struct HookConfig<'a> {
    name: &'a str,
    path: &'a str,
    config: &'a dyn Config,
}

impl<'a> HookConfig<'a> {
    pub fn new(name: &'a str, path: &'a str, config: &'a dyn Config) -> Self {
        Self { name, path, config }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.config
            .get(&format!("{}.{key}", self.name), Some(self.path))
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.config
            .get_str(&format!("{}.{key}", self.name), Some(self.path))
    }

    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.config
            .get_bool(&format!("{}.{key}", self.name), Some(self.path), default)
    }

    #[must_use]
    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_u64(&format!("{}.{key}", self.name), Some(self.path), default)
    }
}

pub type HookFn = dyn Fn(&mut Exchange, &HookConfig<'_>) -> anyhow::Result<()> + Send + Sync;

/// A named callback.
#[derive(Clone)]
pub struct Hook {
    name: Arc<str>,
    callback: Arc<HookFn>,
}

impl Hook {
    pub fn new<F>(name: &str, callback: F) -> Self
    where
        F: Fn(&mut Exchange, &HookConfig<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            callback: Arc::new(callback),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("name", &self.name).finish()
    }
}

/// Ordered callbacks per hook point, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    points: [Vec<Hook>; 8],
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to `point`. It only runs where `<name>.on` is true.
    pub fn register<F>(&mut self, point: HookPoint, name: &str, callback: F) -> &mut Self
    where
        F: Fn(&mut Exchange, &HookConfig<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.points[point.index()].push(Hook::new(name, callback));
        self
    }

    #[must_use]
    pub fn with<F>(mut self, point: HookPoint, name: &str, callback: F) -> Self
    where
        F: Fn(&mut Exchange, &HookConfig<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(point, name, callback);
        self
    }

    #[must_use]
    pub fn hooks(&self, point: HookPoint) -> &[Hook] {
        &self.points[point.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every callback of `point`: global ones whose `<name>.on` is set at
    /// the request path, then the exchange's request-scoped ones.
    ///
    /// # Errors
    ///
    /// At non-failsafe points, the first failing callback's error (panics
    /// become [`Error::Internal`]); the remaining callbacks are skipped.
    /// Failsafe points log failures and always return `Ok`.
    pub fn run(&self, point: HookPoint, exchange: &mut Exchange, config: &dyn Config) -> Result<(), Error> {
        let path = exchange.request.object_path.clone();
        for hook in self.hooks(point) {
            let enabled = config.get_bool(&format!("{}.on", hook.name), Some(&path), false);
            if !enabled {
                trace!(hook = %hook.name, point = %point, path = %path, "Hook disabled");
                continue;
            }
            invoke(point, hook, exchange, &HookConfig::new(&hook.name, &path, config))?;
        }
        for hook in exchange.scoped_hooks(point) {
            invoke(point, &hook, exchange, &HookConfig::new(&hook.name, &path, config))?;
        }
        Ok(())
    }
}

fn invoke(
    point: HookPoint,
    hook: &Hook,
    exchange: &mut Exchange,
    cfg: &HookConfig<'_>,
) -> Result<(), Error> {
    trace!(hook = %hook.name, point = %point, "Running hook");
    let err = match catch_unwind(AssertUnwindSafe(|| (hook.callback)(exchange, cfg))) {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => Error::from_anyhow(e),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(hook = %hook.name, point = %point, panic = %message, "Hook panicked");
            Error::from_panic(payload, &format!("hook '{}'", hook.name))
        }
    };
    if point.is_failsafe() {
        error!(
            hook = %hook.name,
            point = %point,
            request_id = %exchange.request.id,
            error = %err,
            "Failsafe hook failed; continuing"
        );
        return Ok(());
    }
    Err(err)
}
