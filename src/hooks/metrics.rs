use super::core::{HookConfig, HookPoint, HookRegistry};
use crate::lifecycle::Exchange;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const METRICS_HOOK: &str = "metrics";

/// Request counters collected from the hook pipeline.
///
/// All counters are relaxed atomics; readers see eventually consistent values.
#[derive(Debug, Default)]
pub struct MetricsHook {
    started: AtomicU64,
    completed: AtomicU64,
    total_latency_ns: AtomicU64,
    error_pages: AtomicU64,
    /// Completed responses by status class, `1xx` through `5xx`.
    by_class: [AtomicU64; 5],
}

impl MetricsHook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register at `on_start_resource`, `after_error_response` and
    /// `on_end_request`, all gated on `metrics.on`.
    pub fn install(self: &Arc<Self>, registry: &mut HookRegistry) {
        let start = Arc::clone(self);
        registry.register(HookPoint::OnStartResource, METRICS_HOOK, move |_ex, _cfg| {
            start.started.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        let errors = Arc::clone(self);
        registry.register(HookPoint::AfterErrorResponse, METRICS_HOOK, move |_ex, _cfg| {
            errors.error_pages.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        let end = Arc::clone(self);
        registry.register(HookPoint::OnEndRequest, METRICS_HOOK, move |ex, cfg| end.record(ex, cfg));
    }

    fn record(&self, exchange: &mut Exchange, _cfg: &HookConfig<'_>) -> anyhow::Result<()> {
        let latency = u64::try_from(exchange.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns.fetch_add(latency, Ordering::Relaxed);
        let class = usize::from(exchange.response.status.code() / 100);
        if let Some(counter) = class.checked_sub(1).and_then(|i| self.by_class.get(i)) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Resources resolved, counting each internal redirect again.
    #[must_use]
    pub fn resources_started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn error_pages(&self) -> u64 {
        self.error_pages.load(Ordering::Relaxed)
    }

    /// Completed responses whose status starts with `class` (1 to 5).
    #[must_use]
    pub fn status_class_count(&self, class: u16) -> u64 {
        usize::from(class)
            .checked_sub(1)
            .and_then(|i| self.by_class.get(i))
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Mean time from the first byte of the request line to the response
    /// being written. Zero before the first request.
    #[must_use]
    pub fn average_latency(&self) -> Duration {
        let count = self.completed.load(Ordering::Relaxed);
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Prometheus text exposition of every counter.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP arbor_requests_total Completed requests.\n");
        out.push_str("# TYPE arbor_requests_total counter\n");
        for class in 1..=5u16 {
            out.push_str(&format!(
                "arbor_requests_total{{status=\"{class}xx\"}} {}\n",
                self.status_class_count(class)
            ));
        }
        out.push_str("# HELP arbor_resources_started_total Resolved resources, including internal redirects.\n");
        out.push_str("# TYPE arbor_resources_started_total counter\n");
        out.push_str(&format!("arbor_resources_started_total {}\n", self.resources_started()));
        out.push_str("# HELP arbor_error_pages_total Error pages rendered.\n");
        out.push_str("# TYPE arbor_error_pages_total counter\n");
        out.push_str(&format!("arbor_error_pages_total {}\n", self.error_pages()));
        out.push_str("# HELP arbor_request_latency_seconds_avg Mean request latency.\n");
        out.push_str("# TYPE arbor_request_latency_seconds_avg gauge\n");
        out.push_str(&format!(
            "arbor_request_latency_seconds_avg {:.6}\n",
            self.average_latency().as_secs_f64()
        ));
        out
    }
}
