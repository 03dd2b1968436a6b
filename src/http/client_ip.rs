//! Client IP resolution from proxy headers.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Attribute a request to an IP address.
///
/// Tries the first hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer
/// socket. Header values that do not parse as an IP are ignored.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = header_str(headers, FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .and_then(parse_ip);

    forwarded
        .or_else(|| header_str(headers, REAL_IP).and_then(parse_ip))
        .or_else(|| peer.map(|addr| addr.ip()))
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("10.1.1.1:54321".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.1"));

        assert_eq!(client_ip(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_when_forwarded_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("not-an-ip"));
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.1"));

        assert_eq!(client_ip(&headers, peer()), "198.51.100.1");
    }

    #[test]
    fn test_peer_fallback() {
        assert_eq!(client_ip(&HeaderMap::new(), peer()), "10.1.1.1");
    }

    #[test]
    fn test_ipv6_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("2001:db8::1"));

        assert_eq!(client_ip(&headers, None), "2001:db8::1");
    }

    #[test]
    fn test_unknown_without_any_source() {
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }
}
