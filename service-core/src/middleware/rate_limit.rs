use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP address
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// `attempts` requests per `window_seconds`, replenished evenly, with the
/// whole window available as burst.
pub fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.max(1) * 1000) / u64::from(burst.get());
    Quota::with_period(Duration::from_millis(period_ms.max(1)))
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Per-IP limiter together with how the client address is resolved.
#[derive(Clone)]
pub struct IpRateLimit {
    pub limiter: IpRateLimiter,
    pub trust_forwarded_for: bool,
}

impl IpRateLimit {
    pub fn new(attempts: u32, window_seconds: u64, trust_forwarded_for: bool) -> Self {
        Self {
            limiter: create_ip_rate_limiter(attempts, window_seconds),
            trust_forwarded_for,
        }
    }

    /// Forgets addresses whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_addresses(&self) -> usize {
        self.limiter.len()
    }
}

/// Peer address, or the first `x-forwarded-for` hop when the deployment
/// sits behind a trusted proxy.
pub fn client_ip(request: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    let forwarded_ip = trust_forwarded_for
        .then(|| {
            request
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<IpAddr>().ok())
        })
        .flatten();

    forwarded_ip.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

pub async fn ip_rate_limit_middleware(
    State(limit): State<IpRateLimit>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match client_ip(&request, limit.trust_forwarded_for) {
        Some(ip) => match limit.limiter.check_key(&ip) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(client_ip = %ip, "IP rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs()),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn limiter_allows_burst_then_rejects() {
        let limiter = create_ip_rate_limiter(3, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_err());
    }

    #[test]
    fn ip_limiter_tracks_addresses_independently() {
        let limiter = create_ip_rate_limiter(1, 60);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_err());
        assert!(limiter.check_key(&b).is_ok());
    }

    #[test]
    fn zero_attempts_still_builds_a_quota() {
        let limiter = create_ip_rate_limiter(0, 0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
    }

    fn forwarded_request() -> Request {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 1], 4000))));
        request
    }

    #[test]
    fn forwarded_header_is_used_only_behind_a_trusted_proxy() {
        let request = forwarded_request();
        assert_eq!(
            client_ip(&request, true),
            Some("203.0.113.9".parse().unwrap())
        );
        assert_eq!(
            client_ip(&request, false),
            Some("192.0.2.1".parse().unwrap())
        );
    }

    #[test]
    fn untrusted_forwarded_header_without_peer_is_unknown() {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, false), None);
    }

    #[test]
    fn prune_drops_replenished_addresses() {
        // 1000 cells per second: a single hit replenishes within a few ms.
        let limit = IpRateLimit::new(1000, 1, false);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limit.limiter.check_key(&ip).is_ok());
        assert_eq!(limit.tracked_addresses(), 1);

        std::thread::sleep(Duration::from_millis(50));
        limit.prune();
        assert_eq!(limit.tracked_addresses(), 0);
    }
}
