//! Integration tests for the hook pipeline as driven by the engine
//!
//! # Test Coverage
//!
//! - Order in which the eight hook points fire on success and on error
//! - Path-scoped enabling through config sections
//! - `before_main` clearing the handler
//! - Failsafe points (`on_end_resource`, `on_end_request`) never break a response
//! - Error hooks rewriting the failure
//! - Request-scoped hooks attached from another hook
//! - The bundled token auth hook end to end

mod common;

use arbor::config::SectionConfig;
use arbor::error::HttpSignal;
use arbor::hooks::{token_auth, HookPoint, HookRegistry, AUTH_HOOK};
use arbor::http::Status;
use arbor::lifecycle::{Engine, Failure};
use arbor::tree::{handler_fn, HandlerOutcome, TreeNode};
use common::http::{parse_response, ParsedResponse};
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<String>>>;

fn get(engine: &Engine, path: &str, extra: &str) -> ParsedResponse {
    let raw = format!("GET {path} HTTP/1.1\r\nHost: h\r\nConnection: close\r\n{extra}\r\n");
    parse_response(&engine.serve_bytes(raw.as_bytes()).unwrap())
}

/// A registry with a recording hook at every point, all named `trace`.
fn recording_registry(log: &Log) -> HookRegistry {
    let mut registry = HookRegistry::new();
    for point in HookPoint::ALL {
        let log = Arc::clone(log);
        registry.register(point, "trace", move |_ex, _cfg| {
            log.lock().unwrap().push(point.name().to_string());
            Ok(())
        });
    }
    registry
}

fn app() -> TreeNode {
    TreeNode::new()
        .with_handler(handler_fn("ok", |_| Ok(HandlerOutcome::from("fine"))))
        .with_handler(handler_fn("fail", |_| Ok(HandlerOutcome::error(418, "teapot"))))
        .with_child(
            "admin",
            TreeNode::new().with_handler(handler_fn("default", |_| Ok(HandlerOutcome::from("admin")))),
        )
}

#[test]
fn test_hook_points_fire_in_lifecycle_order() {
    let log: Log = Arc::default();
    let engine = Engine::new(app(), recording_registry(&log), SectionConfig::new().enable_hook("trace"));

    let resp = get(&engine, "/ok", "");
    assert_eq!(resp.status, 200);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "on_start_resource",
            "before_request_body",
            "before_main",
            "before_finalize",
            "on_end_resource",
            "on_end_request",
        ]
    );
}

#[test]
fn test_error_path_runs_error_hooks() {
    let log: Log = Arc::default();
    let engine = Engine::new(app(), recording_registry(&log), SectionConfig::new().enable_hook("trace"));

    let resp = get(&engine, "/fail", "");
    assert_eq!(resp.status, 418);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "on_start_resource",
            "before_request_body",
            "before_main",
            "before_error_response",
            "after_error_response",
            "on_end_resource",
            "on_end_request",
        ]
    );
}

#[test]
fn test_hooks_enabled_per_path_section() {
    let log: Log = Arc::default();
    let config = SectionConfig::new().with("/admin", "trace.on", true);
    let engine = Engine::new(app(), recording_registry(&log), config);

    get(&engine, "/ok", "");
    assert!(log.lock().unwrap().is_empty());

    get(&engine, "/admin/users", "");
    assert!(log.lock().unwrap().contains(&"before_main".to_string()));
}

#[test]
fn test_before_main_may_answer_without_handler() {
    let hooks = HookRegistry::new().with(HookPoint::BeforeMain, "cache", |ex, _cfg| {
        ex.request.handler = None;
        ex.response.set_body("from cache");
        Ok(())
    });
    let engine = Engine::new(app(), hooks, SectionConfig::new().enable_hook("cache"));
    let resp = get(&engine, "/ok", "");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "from cache");
}

#[test]
fn test_failing_hook_at_before_main_becomes_error_page() {
    let hooks = HookRegistry::new()
        .with(HookPoint::BeforeMain, "gate", |_ex, _cfg| {
            Err(HttpSignal::error(403, "closed for maintenance").into())
        })
        .with(HookPoint::BeforeMain, "never", |_ex, _cfg| {
            panic!("must not run after an earlier hook failed")
        });
    let config = SectionConfig::new().enable_hook("gate").enable_hook("never");
    let engine = Engine::new(app(), hooks, config);
    let resp = get(&engine, "/ok", "");
    assert_eq!(resp.status, 403);
    assert!(resp.text().contains("closed for maintenance"));
}

#[test]
fn test_failsafe_hook_errors_do_not_change_the_response() {
    let log: Log = Arc::default();
    let tail = Arc::clone(&log);
    let hooks = HookRegistry::new()
        .with(HookPoint::OnEndResource, "broken", |_ex, _cfg| {
            Err(anyhow::anyhow!("disk full"))
        })
        .with(HookPoint::OnEndResource, "panicky", |_ex, _cfg| panic!("oops"))
        .with(HookPoint::OnEndResource, "after", move |_ex, _cfg| {
            tail.lock().unwrap().push("after".to_string());
            Ok(())
        });
    let config = SectionConfig::new()
        .enable_hook("broken")
        .enable_hook("panicky")
        .enable_hook("after");
    let engine = Engine::new(app(), hooks, config);
    let resp = get(&engine, "/ok", "");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "fine");
    assert_eq!(*log.lock().unwrap(), vec!["after"]);
}

#[test]
fn test_before_finalize_can_edit_headers() {
    let hooks = HookRegistry::new().with(HookPoint::BeforeFinalize, "stamp", |ex, cfg| {
        let value = cfg.get_str("value").unwrap_or_default();
        ex.response.set_header("X-Stamp", value);
        Ok(())
    });
    let config = SectionConfig::new()
        .enable_hook("stamp")
        .with("global", "stamp.value", "v1");
    let engine = Engine::new(app(), hooks, config);
    let resp = get(&engine, "/ok", "");
    assert_eq!(resp.header("X-Stamp"), Some("v1"));
}

#[test]
fn test_before_error_response_may_rewrite_failure() {
    let hooks = HookRegistry::new().with(HookPoint::BeforeErrorResponse, "soften", |ex, _cfg| {
        if let Some(Failure { status, .. }) = &ex.failure {
            if status.code() == 418 {
                ex.failure = Some(Failure {
                    status: Status::new(503).unwrap(),
                    message: "try again later".to_string(),
                });
            }
        }
        Ok(())
    });
    let engine = Engine::new(app(), hooks, SectionConfig::new().enable_hook("soften"));
    let resp = get(&engine, "/fail", "");
    assert_eq!(resp.status, 503);
    assert!(resp.text().contains("try again later"));
}

#[test]
fn test_failing_error_hook_falls_back_to_bare_500() {
    let seen: Arc<Mutex<Vec<u16>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let hooks = HookRegistry::new()
        .with(HookPoint::AfterErrorResponse, "bad", |_ex, _cfg| {
            Err(anyhow::anyhow!("cannot render"))
        })
        .with(HookPoint::OnEndRequest, "seen", move |ex, _cfg| {
            if let Some(failure) = &ex.failure {
                sink.lock().unwrap().push(failure.status.code());
            }
            Ok(())
        });
    let config = SectionConfig::new().enable_hook("bad").enable_hook("seen");
    let engine = Engine::new(app(), hooks, config);
    let resp = get(&engine, "/fail", "");
    assert_eq!(resp.status, 500);
    assert_eq!(resp.header("Content-Type"), Some("text/plain"));
    assert_eq!(resp.header("Connection"), Some("close"));
    // the 418 was replaced by the secondary failure
    assert_eq!(*seen.lock().unwrap(), vec![500]);
}

#[test]
fn test_request_scoped_hook_attached_by_another_hook() {
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let hooks = HookRegistry::new().with(HookPoint::OnStartResource, "attach", move |ex, _cfg| {
        let sink = Arc::clone(&sink);
        ex.attach_hook(HookPoint::BeforeFinalize, "once", move |ex, _cfg| {
            sink.lock()
                .unwrap()
                .push(ex.request.object_path.clone());
            Ok(())
        });
        Ok(())
    });
    let engine = Engine::new(app(), hooks, SectionConfig::new().enable_hook("attach"));
    get(&engine, "/ok", "");
    assert_eq!(*log.lock().unwrap(), vec!["/ok"]);
}

#[test]
fn test_token_auth_end_to_end() {
    let mut hooks = HookRegistry::new();
    token_auth(&mut hooks);
    let config = SectionConfig::new()
        .with("/admin", &format!("{AUTH_HOOK}.on"), true)
        .with("/admin", &format!("{AUTH_HOOK}.token"), "s3cret");
    let engine = Engine::new(app(), hooks, config);

    // not protected outside /admin
    assert_eq!(get(&engine, "/ok", "").status, 200);

    let resp = get(&engine, "/admin/panel", "");
    assert_eq!(resp.status, 401);
    assert_eq!(resp.header("WWW-Authenticate"), Some("Bearer realm=\"arbor\""));

    let resp = get(&engine, "/admin/panel", "Authorization: Bearer s3cret\r\n");
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "admin");
}
