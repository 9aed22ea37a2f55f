//! Rate limiting middleware.
//!
//! Fixed-window, per-IP budget for the credential endpoints (logins,
//! registration, magic links).

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
    /// Use the last `X-Forwarded-For` hop (the one our proxy appended) as the client address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: crate::config::DEFAULT_AUTH_RATE_LIMIT_PER_MINUTE,
            window: Duration::from_secs(60),
            trust_forwarded_for: false,
        }
    }
}

impl RateLimitConfig {
    pub fn from_app_config(config: &crate::config::AppConfig) -> Self {
        Self {
            max_requests: config.auth_rate_limit_per_minute,
            window: Duration::from_secs(60),
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}

/// Rate limiter state tracking requests per IP.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request from `ip` and decide whether it may proceed.
    pub fn check(&self, ip: IpAddr) -> RateLimitResult {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();

        let entry = state.entry(ip).or_insert(RateLimitEntry {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        // Rejected requests still count, so a flood doesn't get a fresh budget.
        entry.count = entry.count.saturating_add(1);

        if entry.count > self.config.max_requests {
            let reset_at = entry.window_start + self.config.window;
            RateLimitResult::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else {
            RateLimitResult::Allowed {
                remaining: self.config.max_requests - entry.count,
            }
        }
    }

    /// Drop entries whose window has long passed (call from a background task).
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;

        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.state.lock().len()
    }

    fn client_ip(&self, headers: &HeaderMap, connect_info: Option<SocketAddr>) -> IpAddr {
        // Earlier hops are client-supplied; only the proxy's own entry counts.
        if self.config.trust_forwarded_for {
            let forwarded = headers
                .get_all("x-forwarded-for")
                .iter()
                .filter_map(|v| v.to_str().ok())
                .last()
                .and_then(|v| v.rsplit(',').next())
                .and_then(|v| v.trim().parse::<IpAddr>().ok());
            if let Some(ip) = forwarded {
                return ip;
            }
        }

        connect_info
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(limiter): State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = limiter.client_ip(request.headers(), connect_info.map(|ConnectInfo(addr)| addr));

    match limiter.check(ip) {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::Exceeded { retry_after } => {
            // Round up so clients never retry inside the window.
            let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            warn!(
                ip = %ip,
                path = %request.uri().path(),
                retry_after_secs = retry_secs,
                "Rate limit exceeded"
            );

            let body = serde_json::json!({
                "success": false,
                "error": "Too many requests. Please try again later.",
                "retry_after_seconds": retry_secs,
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_secs.to_string())],
                Json(body),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn limiter(max_requests: u32) -> RateLimitLayer {
        RateLimitLayer::new(RateLimitConfig {
            max_requests,
            window: Duration::from_secs(60),
            trust_forwarded_for: false,
        })
    }

    #[test]
    fn test_rate_limit_allows_under_limit() {
        let limiter = limiter(5);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for expected_remaining in (0..5).rev() {
            assert_eq!(
                limiter.check(ip),
                RateLimitResult::Allowed {
                    remaining: expected_remaining
                }
            );
        }
        assert!(matches!(limiter.check(ip), RateLimitResult::Exceeded { .. }));
    }

    #[test]
    fn test_limits_are_per_ip() {
        let limiter = limiter(1);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(matches!(limiter.check(a), RateLimitResult::Allowed { .. }));
        assert!(matches!(limiter.check(a), RateLimitResult::Exceeded { .. }));
        assert!(matches!(limiter.check(b), RateLimitResult::Allowed { .. }));
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(1);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        let start = Instant::now();

        assert!(matches!(limiter.check_at(ip, start), RateLimitResult::Allowed { .. }));
        match limiter.check_at(ip, start + Duration::from_secs(20)) {
            RateLimitResult::Exceeded { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(40))
            }
            other => panic!("expected exceeded, got {:?}", other),
        }
        assert!(matches!(
            limiter.check_at(ip, start + Duration::from_secs(60)),
            RateLimitResult::Allowed { .. }
        ));
    }

    #[test]
    fn test_cleanup_keeps_recent_entries() {
        let limiter = limiter(3);
        limiter.check("10.0.0.4".parse().unwrap());
        limiter.cleanup();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_client_ip_resolution() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();

        let direct = limiter(1);
        assert_eq!(
            direct.client_ip(&headers, Some(peer)),
            "192.0.2.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            direct.client_ip(&headers, None),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        );

        let proxied = RateLimitLayer::new(RateLimitConfig {
            trust_forwarded_for: true,
            ..RateLimitConfig::default()
        });
        assert_eq!(
            proxied.client_ip(&headers, Some(peer)),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );

        let mut spoofed = HeaderMap::new();
        spoofed.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7, 10.0.0.1"));
        assert_eq!(
            proxied.client_ip(&spoofed, Some(peer)),
            proxied.client_ip(&headers, Some(peer))
        );
    }
}
