/*!
 * # Authenticator
 *
 * Validates `Proxy-Authorization` against the configured credential and
 * strips the hop-by-hop auth headers from requests that pass, before they
 * reach the relay or tunnel engines.
 */

use crate::config::ServerConfig;
use crate::demux::RequestHead;

/// Outcome of an authentication check.
pub enum AuthOutcome {
    /// No credential configured, or the client presented a valid one.
    /// `Proxy-Authorization`/`Proxy-Authenticate` have been removed from the
    /// request in place.
    Allowed,
    /// The client's credential was missing or invalid; a 407 challenge
    /// should be sent and the session ended.
    Denied,
}

/// Check `req` against `config.auth_token`, removing the hop-by-hop auth
/// headers on success.
pub fn authenticate(req: &mut RequestHead, config: &ServerConfig) -> AuthOutcome {
    let Some(expected) = &config.auth_token else {
        return AuthOutcome::Allowed;
    };

    let presented = req.header("proxy-authorization").map(|s| s.to_string());
    let outcome = match presented {
        Some(value) => match value.strip_prefix("Basic ") {
            Some(token) => {
                if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
                    AuthOutcome::Allowed
                } else {
                    AuthOutcome::Denied
                }
            }
            None => AuthOutcome::Denied,
        },
        None => AuthOutcome::Denied,
    };

    if matches!(outcome, AuthOutcome::Allowed) {
        req.headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case("proxy-authorization") && !k.eq_ignore_ascii_case("proxy-authenticate"));
    }

    outcome
}

/// Constant-time byte comparison, to avoid leaking token length/prefix
/// matches through timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
