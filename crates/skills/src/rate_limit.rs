//! Per-tenant, per-skill sliding-window rate limiting.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use orchestra_core::types::TenantId;

pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Sliding one-minute window of call timestamps per `(tenant, skill)`.
#[derive(Default)]
pub struct RateLimiter {
    windows: DashMap<(TenantId, String), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call if it fits under `per_minute`. Returns false when the
    /// window is already full; the rejected call is not recorded.
    pub fn try_acquire(&self, tenant: TenantId, skill: &str, per_minute: u32) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry((tenant, skill.to_string())).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= RATE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= per_minute as usize {
            return false;
        }
        window.push_back(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = RateLimiter::new();
        let tenant = Uuid::new_v4();

        assert!(limiter.try_acquire(tenant, "gmail", 2));
        assert!(limiter.try_acquire(tenant, "gmail", 2));
        assert!(!limiter.try_acquire(tenant, "gmail", 2));

        // Other skills and tenants have their own windows.
        assert!(limiter.try_acquire(tenant, "slack", 2));
        assert!(limiter.try_acquire(Uuid::new_v4(), "gmail", 2));

        tokio::time::advance(RATE_WINDOW).await;
        assert!(limiter.try_acquire(tenant, "gmail", 2));
    }
}
