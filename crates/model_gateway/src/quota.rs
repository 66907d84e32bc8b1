//! Per-caller request quota.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use codementor_core::{config::TutorConfig, CallerId, Error, Result};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Fixed-window counter, one window per caller.
///
/// A caller's window starts with their first request and lasts
/// `window`; the first request after it ends opens a fresh one.
pub struct DailyQuota {
    limit: u32,
    window: Duration,
    callers: DashMap<CallerId, Window>,
}

impl DailyQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            callers: DashMap::new(),
        }
    }

    /// Count one request for `caller`, failing once the window is spent.
    pub fn check(&self, caller: &CallerId) -> Result<()> {
        let now = Instant::now();
        let mut entry = self.callers.entry(caller.clone()).or_insert(Window {
            count: 0,
            resets_at: now + self.window,
        });

        if now >= entry.resets_at {
            *entry = Window {
                count: 0,
                resets_at: now + self.window,
            };
        }
        if entry.count >= self.limit {
            tracing::warn!(caller = %caller, limit = self.limit, "Tutor quota exceeded");
            return Err(Error::RateLimited {
                caller: caller.to_string(),
                limit: self.limit,
            });
        }
        entry.count += 1;
        Ok(())
    }

    /// Requests left in the caller's current window.
    pub fn remaining(&self, caller: &CallerId) -> u32 {
        match self.callers.get(caller) {
            Some(window) if Instant::now() < window.resets_at => {
                self.limit.saturating_sub(window.count)
            }
            _ => self.limit,
        }
    }
}

impl From<&TutorConfig> for DailyQuota {
    fn from(config: &TutorConfig) -> Self {
        Self::new(config.daily_quota, Duration::from_secs(config.quota_window_secs))
    }
}
