//! Small application tree served by the `arbor` binary.
//!
//! | Path | Handler |
//! |---|---|
//! | `/` | plain-text greeting |
//! | `/echo/<args..>` | JSON echo of method, path, args and params |
//! | `/metrics/` | Prometheus text from [`MetricsHook`] |
//! | `/home` | internal redirect to `/` |
//! | `/elsewhere` | 303 redirect to `/` |

use crate::config::SectionConfig;
use crate::hooks::{access_log, HookRegistry, MetricsHook, ACCESS_LOG_HOOK, METRICS_HOOK};
use crate::lifecycle::Engine;
use crate::tree::{handler_fn, HandlerOutcome, TreeNode};
use serde_json::json;
use std::sync::Arc;

/// The demo tree, reporting through `metrics`.
#[must_use]
pub fn app(metrics: &Arc<MetricsHook>) -> TreeNode {
    let scrape = Arc::clone(metrics);
    TreeNode::new()
        .with_handler(handler_fn("index", |call| {
            call.response.set_header("Content-Type", "text/plain; charset=utf-8");
            Ok(HandlerOutcome::from("arbor is running\n"))
        }))
        .with_handler(handler_fn("home", |_call| {
            Ok(HandlerOutcome::internal_redirect("/"))
        }))
        .with_handler(handler_fn("elsewhere", |_call| Ok(HandlerOutcome::redirect("/"))))
        .with_child(
            "echo",
            TreeNode::new().with_handler(handler_fn("default", |call| {
                let body = json!({
                    "method": call.request.method,
                    "path": call.request.raw_path,
                    "args": call.args(),
                    "params": call.params().to_json(),
                    "request_id": call.request.id.to_string(),
                });
                call.response.set_header("Content-Type", "application/json");
                Ok(HandlerOutcome::from(serde_json::to_vec(&body)?))
            })),
        )
        .with_child(
            "metrics",
            TreeNode::new().with_handler(handler_fn("index", move |call| {
                call.response
                    .set_header("Content-Type", "text/plain; version=0.0.4");
                Ok(HandlerOutcome::from(scrape.render_prometheus()))
            })),
        )
}

/// Engine over [`app`] with the access log and metrics hooks enabled.
#[must_use]
pub fn engine(config: SectionConfig) -> (Engine, Arc<MetricsHook>) {
    let metrics = Arc::new(MetricsHook::new());
    let mut hooks = HookRegistry::new();
    access_log(&mut hooks);
    metrics.install(&mut hooks);
    let config = config.enable_hook(ACCESS_LOG_HOOK).enable_hook(METRICS_HOOK);
    (Engine::new(app(&metrics), hooks, config), metrics)
}
