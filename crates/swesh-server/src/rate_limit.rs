//! Per-client token-bucket rate limiting for the HTTP layer.
//!
//! This caps raw request throughput below the domain layer; the per-day
//! proposal ceiling lives in the store.  Buckets are keyed by the acting
//! user when the request carries one, otherwise by client IP, so one
//! aggressive swiper cannot starve everyone behind the same NAT.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// What a bucket is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    User(Uuid),
    Ip(IpAddr),
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RequestLimiter {
    buckets: Arc<Mutex<HashMap<ClientKey, TokenBucket>>>,
    rate: f64,
    capacity: f64,
}

impl RequestLimiter {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            rate,
            capacity,
        }
    }

    pub async fn check(&self, key: ClientKey) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RequestLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(key) = extract_client_key(&req) {
        if !limiter.check(key.clone()).await {
            warn!(?key, "request rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Prefer the acting user id; fall back to ConnectInfo, then
/// X-Forwarded-For, then X-Real-IP.
fn extract_client_key(req: &Request) -> Option<ClientKey> {
    if let Some(user) = req.headers().get("x-user-id") {
        if let Some(user) = user.to_str().ok().and_then(|s| Uuid::parse_str(s).ok()) {
            return Some(ClientKey::User(user));
        }
    }

    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(ClientKey::Ip(connect_info.0.ip()));
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ClientKey::Ip(ip));
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ClientKey::Ip(ip));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_then_blocks() {
        let limiter = RequestLimiter::new(10.0, 5.0);
        let key = ClientKey::User(Uuid::new_v4());

        for _ in 0..5 {
            assert!(limiter.check(key.clone()).await);
        }

        assert!(!limiter.check(key).await);
    }

    #[tokio::test]
    async fn users_get_independent_buckets() {
        let limiter = RequestLimiter::new(10.0, 2.0);
        let alice = ClientKey::User(Uuid::new_v4());
        let bob = ClientKey::User(Uuid::new_v4());

        assert!(limiter.check(alice.clone()).await);
        assert!(limiter.check(alice.clone()).await);
        assert!(!limiter.check(alice).await);

        assert!(limiter.check(bob).await);
    }

    #[tokio::test]
    async fn user_and_ip_keys_do_not_collide() {
        let limiter = RequestLimiter::new(10.0, 1.0);
        let user = ClientKey::User(Uuid::new_v4());
        let ip = ClientKey::Ip("10.0.0.1".parse().unwrap());

        assert!(limiter.check(user).await);
        assert!(limiter.check(ip).await);
    }

    #[tokio::test]
    async fn purges_idle_buckets() {
        let limiter = RequestLimiter::new(10.0, 5.0);
        let key = ClientKey::Ip("192.168.1.1".parse().unwrap());
        assert!(limiter.check(key).await);

        limiter.purge_stale(0.0).await;

        let buckets = limiter.buckets.lock().await;
        assert!(buckets.is_empty());
    }
}
