//! Per-client rate limiting as axum middleware.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::routes::ApiError;
use crate::HuginnError;
use crate::limiter::RateLimiter;

/// Reject requests that arrive inside the client's cooldown with 429.
///
/// Only paths the limiter [`applies_to`](RateLimiter::applies_to) are checked.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.applies_to(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identity(request.headers(), peer);

    let admission = limiter.admit(&client, Instant::now());
    if admission.allowed {
        next.run(request).await
    } else {
        ApiError(HuginnError::RateLimited {
            retry_after: admission.retry_after,
        })
        .into_response()
    }
}

/// Who is asking: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer address.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identity(&headers, None), "203.0.113.7");
    }

    #[test]
    fn real_ip_used_without_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_identity(&headers, None), "198.51.100.2");
    }

    #[test]
    fn falls_back_to_peer_ip_without_port() {
        let peer: SocketAddr = "192.0.2.1:54321".parse().unwrap();
        assert_eq!(client_identity(&HeaderMap::new(), Some(peer)), "192.0.2.1");
        assert_eq!(client_identity(&HeaderMap::new(), None), "unknown");
    }
}
