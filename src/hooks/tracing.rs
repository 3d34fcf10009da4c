use super::core::{HookConfig, HookPoint, HookRegistry};
use crate::lifecycle::Exchange;
use tracing::info;

pub const ACCESS_LOG_HOOK: &str = "access_log";

/// Register the access log at `on_end_request`.
pub fn access_log(registry: &mut HookRegistry) {
    registry.register(HookPoint::OnEndRequest, ACCESS_LOG_HOOK, log_exchange);
}

fn log_exchange(exchange: &mut Exchange, _cfg: &HookConfig<'_>) -> anyhow::Result<()> {
    let request = &exchange.request;
    let remote = request
        .remote_addr
        .map_or_else(|| "-".to_string(), |addr| addr.to_string());
    info!(
        request_id = %request.id,
        remote = %remote,
        method = %request.method,
        path = %request.raw_path,
        query = %request.query_string,
        handler = request.handler_path.as_deref().unwrap_or("-"),
        status = exchange.response.status.code(),
        latency_ms = u64::try_from(exchange.elapsed().as_millis()).unwrap_or(u64::MAX),
        user_agent = request.header("User-Agent").unwrap_or("-"),
        "Request completed"
    );
    Ok(())
}
