use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::routes::user_fingerprint;

/// Fixed-window request limits per user and endpoint class.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    sync_limit: u32,
    write_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Debug, Clone, Copy)]
pub enum ProtectedEndpoint {
    /// `POST /notes/sync`
    Sync,
    /// Single-note create, update, trash, restore and purge
    NoteWrite,
}

#[derive(Default)]
struct RateLimitMetrics {
    sync_allowed: AtomicU64,
    sync_limited: AtomicU64,
    write_allowed: AtomicU64,
    write_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub write_allowed: u64,
    pub write_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_rate_limit_per_window,
            config.note_write_rate_limit_per_window,
        )
    }

    fn new(window: Duration, sync_limit: u32, write_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            sync_limit,
            write_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        let limit = match endpoint {
            ProtectedEndpoint::Sync => self.sync_limit,
            ProtectedEndpoint::NoteWrite => self.write_limit,
        };

        let key = format!("{}:{user_id}", endpoint.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(endpoint, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                "Too many requests, please try again later",
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(endpoint, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drop windows that have fully elapsed.
    pub async fn prune(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let before = guard.len();
        guard.retain(|_, window| now.duration_since(window.started_at) < self.window);
        before - guard.len()
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            sync_allowed: self.metrics.sync_allowed.load(Ordering::Relaxed),
            sync_limited: self.metrics.sync_limited.load(Ordering::Relaxed),
            write_allowed: self.metrics.write_allowed.load(Ordering::Relaxed),
            write_limited: self.metrics.write_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, endpoint: ProtectedEndpoint, allowed: bool) -> &AtomicU64 {
        match (endpoint, allowed) {
            (ProtectedEndpoint::Sync, true) => &self.metrics.sync_allowed,
            (ProtectedEndpoint::Sync, false) => &self.metrics.sync_limited,
            (ProtectedEndpoint::NoteWrite, true) => &self.metrics.write_allowed,
            (ProtectedEndpoint::NoteWrite, false) => &self.metrics.write_limited,
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::NoteWrite => "note_write",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 2, 2);

        limiter.check(ProtectedEndpoint::Sync, "user-a").await.unwrap();
        limiter.check(ProtectedEndpoint::Sync, "user-a").await.unwrap();

        let err = limiter
            .check(ProtectedEndpoint::Sync, "user-a")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, retry) if retry > 0));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.sync_allowed, 2);
        assert_eq!(metrics.sync_limited, 1);
    }

    #[tokio::test]
    async fn rate_limiter_tracks_users_and_endpoints_separately() {
        let limiter = EndpointRateLimiter::new(Duration::from_secs(60), 1, 1);

        limiter.check(ProtectedEndpoint::Sync, "user-a").await.unwrap();
        limiter.check(ProtectedEndpoint::Sync, "user-b").await.unwrap();
        limiter
            .check(ProtectedEndpoint::NoteWrite, "user-a")
            .await
            .unwrap();
        assert!(limiter
            .check(ProtectedEndpoint::NoteWrite, "user-a")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn rate_limiter_resets_after_window() {
        let limiter = EndpointRateLimiter::new(Duration::from_millis(20), 1, 1);

        limiter.check(ProtectedEndpoint::Sync, "user-a").await.unwrap();
        assert!(limiter.check(ProtectedEndpoint::Sync, "user-a").await.is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(limiter.prune().await, 1);
        limiter.check(ProtectedEndpoint::Sync, "user-a").await.unwrap();
    }
}
