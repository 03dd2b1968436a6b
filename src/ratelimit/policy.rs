//! Limit policy and rate key resolution.

use std::collections::HashMap;
use std::time::Duration;

/// Namespace prefix for IP-derived keys.
const IP_NAMESPACE: &str = "ip";
/// Namespace prefix for token-derived keys.
const TOKEN_NAMESPACE: &str = "token";

/// A key that uniquely identifies a countable and blockable unit.
///
/// IP and token identities live in disjoint namespaces, so an IP string that
/// happens to equal a token string never shares a counter with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    /// Key for a client IP address.
    pub fn ip(addr: &str) -> Self {
        Self(format!("{}:{}", IP_NAMESPACE, addr))
    }

    /// Key for an access token.
    pub fn token(token: &str) -> Self {
        Self(format!("{}:{}", TOKEN_NAMESPACE, token))
    }

    /// The namespaced key as passed to the counter store.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide limits, built once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct LimitPolicy {
    /// Requests per window allowed for a client identified by IP
    pub default_ip_limit: u64,
    /// Requests per window allowed for a token without an override
    pub default_token_limit: u64,
    /// How long a key stays blocked after exceeding its limit
    pub block_duration: Duration,
    /// Per-token limits that replace `default_token_limit`
    pub token_overrides: HashMap<String, u64>,
}

impl LimitPolicy {
    /// Resolve a request identity to its rate key and limit.
    ///
    /// A non-empty token always wins; the IP is then ignored entirely.
    pub fn resolve(&self, ip: &str, token: &str) -> (RateKey, u64) {
        if !token.is_empty() {
            let limit = self
                .token_overrides
                .get(token)
                .copied()
                .unwrap_or(self.default_token_limit);
            return (RateKey::token(token), limit);
        }

        (RateKey::ip(ip), self.default_ip_limit)
    }
}
