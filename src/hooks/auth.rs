use super::core::{HookConfig, HookPoint, HookRegistry};
use crate::error::HttpSignal;
use crate::lifecycle::Exchange;
use anyhow::anyhow;
use tracing::debug;

pub const AUTH_HOOK: &str = "auth";

/// Register a `before_main` check of `Authorization` against `auth.token`.
///
/// Both the bare token and `Bearer <token>` are accepted. A mismatch ends
/// the request with 401 and a `WWW-Authenticate` challenge.
pub fn token_auth(registry: &mut HookRegistry) {
    registry.register(HookPoint::BeforeMain, AUTH_HOOK, check_token);
}

fn check_token(exchange: &mut Exchange, cfg: &HookConfig<'_>) -> anyhow::Result<()> {
    let Some(expected) = cfg.get_str("token") else {
        return Err(anyhow!("{AUTH_HOOK}.token is not configured"));
    };
    let presented = exchange.request.header("Authorization").map(|h| {
        let h = h.trim();
        h.strip_prefix("Bearer ").map_or(h, str::trim)
    });
    if presented.is_some_and(|token| tokens_match(token.as_bytes(), expected.as_bytes())) {
        return Ok(());
    }
    debug!(
        request_id = %exchange.request.id,
        path = %exchange.request.object_path,
        "Rejected request without a valid token"
    );
    let realm = cfg.get_str("realm").unwrap_or_else(|| "arbor".to_string());
    exchange
        .response
        .set_header("WWW-Authenticate", format!("Bearer realm=\"{realm}\""));
    Err(HttpSignal::error(401, "Unauthorized").into())
}

/// Compare without an early exit, so timing does not reveal the matching prefix.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    let mut diff = u8::from(presented.len() != expected.len());
    for (i, &e) in expected.iter().enumerate() {
        let p = presented.get(i).copied().unwrap_or(!e);
        diff |= p ^ e;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::tokens_match;

    #[test]
    fn token_comparison_needs_every_byte() {
        assert!(tokens_match(b"s3cret", b"s3cret"));
        assert!(!tokens_match(b"s3creT", b"s3cret"));
        assert!(!tokens_match(b"x3cret", b"s3cret"));
        // prefixes and extensions of the secret are rejected
        assert!(!tokens_match(b"s3cre", b"s3cret"));
        assert!(!tokens_match(b"s3cret!", b"s3cret"));
        assert!(!tokens_match(b"", b"s3cret"));
        assert!(tokens_match(b"", b""));
    }
}
