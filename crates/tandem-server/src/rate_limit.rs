use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Sliding-window counter: at most `limit` hits inside the trailing `window`.
///
/// Only accepted hits are recorded, so a caller that keeps retrying while
/// limited does not extend its own penalty. Check-and-record happens under
/// one lock, so concurrent hits for the same key are never lost.
#[derive(Clone)]
pub struct RateLimiter<K> {
    windows: Arc<Mutex<HashMap<K, VecDeque<Instant>>>>,
    limit: usize,
    window: Duration,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Record a hit for `key`. Returns `false` when the key is over quota.
    pub async fn check(&self, key: &K) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let hits = windows.entry(key.clone()).or_default();

        while hits
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.limit {
            return false;
        }
        hits.push_back(now);
        true
    }

    /// Drop keys whose every hit has left the window. Returns how many
    /// were removed.
    pub async fn purge_stale(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, hits| {
            hits.back()
                .is_some_and(|&t| now.duration_since(t) < self.window)
        });
        before - windows.len()
    }
}

pub async fn rate_limit_middleware(
    axum::extract::State(limiter): axum::extract::State<RateLimiter<IpAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&req);

    if let Some(ip) = ip {
        if !limiter.check(&ip).await {
            warn!(ip = %ip, "HTTP rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Try ConnectInfo first, then X-Forwarded-For, then X-Real-IP.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    if let Some(forwarded) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = req.headers().get("x-real-ip") {
        if let Ok(value) = real_ip.to_str() {
            if let Ok(ip) = value.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn eleventh_send_in_window_is_rejected() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        let sender = "u@x.com".to_string();

        for _ in 0..10 {
            assert!(limiter.check(&sender).await);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(!limiter.check(&sender).await);
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let key = "u@x.com".to_string();

        assert!(limiter.check(&key).await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check(&key).await);
        assert!(!limiter.check(&key).await);

        // First hit ages out; the second still counts.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check(&key).await);
        assert!(!limiter.check(&key).await);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_hits_are_not_recorded() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let key = "u@x.com".to_string();

        assert!(limiter.check(&key).await);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(10)).await;
            assert!(!limiter.check(&key).await);
        }
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(limiter.check(&key).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let ip1: IpAddr = "10.0.0.1".parse().unwrap();
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(&ip1).await);
        assert!(limiter.check(&ip2).await);
        assert!(!limiter.check(&ip1).await);
    }

    #[tokio::test]
    async fn concurrent_hits_are_all_counted() {
        let limiter = RateLimiter::new(10, Duration::from_secs(60));
        let tasks: Vec<_> = (0..25)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.check(&"u@x.com".to_string()).await })
            })
            .collect();

        let mut allowed = 0;
        for task in tasks {
            if task.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_idle_keys() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        limiter.check(&"a".to_string()).await;
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check(&"b".to_string()).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(limiter.purge_stale().await, 1);
        assert_eq!(limiter.purge_stale().await, 0);
    }

    #[test]
    fn client_ip_from_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(
            extract_client_ip(&req),
            Some("203.0.113.7".parse().unwrap())
        );
    }
}
