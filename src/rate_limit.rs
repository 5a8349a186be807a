//! Request rate limiting.
//!
//! Sliding window log keyed by `client_id:endpoint_class`. Each key owns its
//! own mutex, so two clients hammering different keys never contend; a
//! single global lock would serialize unrelated traffic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Endpoint classes with independent limits. Credential endpoints are
/// strict, admin mutations moderate, public reads generous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Login,
    AdminMutation,
    PublicRead,
}

impl EndpointClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::AdminMutation => "admin",
            Self::PublicRead => "public",
        }
    }
}

/// Outcome of a rate-limit check. `Limited` is a distinct condition from any
/// authentication failure and carries a retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Limited { retry_after: Duration },
}

struct Window {
    hits: Mutex<VecDeque<Instant>>,
}

pub struct RateLimiter {
    windows: DashMap<String, Arc<Window>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    const fn limit_for(&self, class: EndpointClass) -> u32 {
        match class {
            EndpointClass::Login => self.config.login_limit,
            EndpointClass::AdminMutation => self.config.admin_limit,
            EndpointClass::PublicRead => self.config.public_limit,
        }
    }

    /// Record a hit for the client/class pair and decide whether to admit it.
    pub fn check(&self, client_id: &str, class: EndpointClass) -> Decision {
        let key = format!("{client_id}:{}", class.as_str());
        let window_len = Duration::from_secs(self.config.window_seconds);
        let limit = self.limit_for(class) as usize;
        let now = Instant::now();

        let entry = self
            .windows
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Window {
                    hits: Mutex::new(VecDeque::new()),
                })
            })
            .clone();

        let mut hits = entry.hits.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        while let Some(oldest) = hits.front() {
            if now.duration_since(*oldest) >= window_len {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() < limit {
            hits.push_back(now);
            return Decision::Allowed;
        }

        let retry_after = hits.front().map_or(window_len, |oldest| {
            window_len.saturating_sub(now.duration_since(*oldest))
        });

        Decision::Limited { retry_after }
    }

    /// Drop keys with no hit inside the cleanup horizon to bound memory.
    pub fn sweep(&self) {
        let horizon = Duration::from_secs(self.config.gc_idle_seconds);
        let now = Instant::now();
        let mut removed = 0usize;

        // Counted inside the closure: `check` can insert fresh keys while
        // retain walks the shards, so before/after length arithmetic is
        // not reliable.
        self.windows.retain(|_, window| {
            let hits = window
                .hits
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let keep = hits
                .back()
                .is_some_and(|last| now.duration_since(*last) < horizon);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!("Rate limiter GC dropped {removed} stale keys");
        }
    }

    /// Periodic GC loop. Runs until the process exits.
    pub fn spawn_gc(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.gc_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}
