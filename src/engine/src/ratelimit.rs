//! Per-role request quotas over minute/hour/day windows
//!
//! Counters live behind the narrow `CounterStore` seam (check the three
//! thresholds and increment as one atomic step) so the in-memory store can
//! be swapped for a distributed one without touching callers. Buckets are
//! keyed by window start and expire with their window.

use crate::hierarchy::Role;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Quota window granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    /// All windows, narrowest first
    pub const ALL: [Window; 3] = [Window::Minute, Window::Hour, Window::Day];

    /// Window length in seconds
    pub fn seconds(&self) -> u64 {
        match self {
            Window::Minute => 60,
            Window::Hour => 3_600,
            Window::Day => 86_400,
        }
    }

    /// Start of the bucket containing `now` (unix seconds)
    pub fn bucket_start(&self, now: u64) -> u64 {
        now - (now % self.seconds())
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        };
        f.write_str(name)
    }
}

/// Per-window thresholds for one role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleThresholds {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

impl RoleThresholds {
    /// Threshold for a window
    pub fn limit(&self, window: Window) -> u64 {
        match window {
            Window::Minute => self.per_minute,
            Window::Hour => self.per_hour,
            Window::Day => self.per_day,
        }
    }
}

/// Static role -> thresholds table
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    thresholds: HashMap<Role, RoleThresholds>,
}

impl RateLimitConfig {
    /// Build a table from explicit entries
    pub fn new(entries: impl IntoIterator<Item = (Role, RoleThresholds)>) -> Self {
        Self {
            thresholds: entries.into_iter().collect(),
        }
    }

    /// Thresholds for a role; roles missing from the table get the
    /// viewer-tier default
    pub fn for_role(&self, role: Role) -> RoleThresholds {
        self.thresholds
            .get(&role)
            .copied()
            .unwrap_or(RoleThresholds {
                per_minute: 60,
                per_hour: 1_000,
                per_day: 10_000,
            })
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new([
            (
                Role::Viewer,
                RoleThresholds {
                    per_minute: 60,
                    per_hour: 1_000,
                    per_day: 10_000,
                },
            ),
            (
                Role::Consultant,
                RoleThresholds {
                    per_minute: 120,
                    per_hour: 3_000,
                    per_day: 20_000,
                },
            ),
            (
                Role::Manager,
                RoleThresholds {
                    per_minute: 300,
                    per_hour: 10_000,
                    per_day: 50_000,
                },
            ),
            (
                Role::Admin,
                RoleThresholds {
                    per_minute: 600,
                    per_hour: 20_000,
                    per_day: 100_000,
                },
            ),
        ])
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// All three counters incremented
    Allowed,
    /// No counter incremented; the first exceeded window is reported
    Limited {
        window: Window,
        usage: u64,
        limit: u64,
        retry_after_seconds: u64,
    },
}

impl RateDecision {
    /// Whether the request may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

/// Usage snapshot for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub window: Window,
    pub usage: u64,
    pub limit: u64,
}

/// Narrow counter seam: check every threshold and increment atomically
///
/// Implementations must guarantee that either all three counters advance
/// or none do, even under concurrent callers for the same subject.
pub trait CounterStore: Send + Sync {
    /// Increment the subject's minute/hour/day counters iff none is at its
    /// threshold; on denial report the first exceeded window
    fn check_and_increment(
        &self,
        subject_id: &str,
        thresholds: RoleThresholds,
        now: u64,
    ) -> RateDecision;

    /// Read current usage without side effects
    fn usage(&self, subject_id: &str, thresholds: RoleThresholds, now: u64) -> Vec<WindowUsage>;
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    window_start: u64,
    count: u64,
}

impl Bucket {
    /// Count valid for the bucket containing `now`, rolling over stale
    /// buckets to zero
    fn current(&self, window: Window, now: u64) -> u64 {
        if self.window_start == window.bucket_start(now) {
            self.count
        } else {
            0
        }
    }
}

#[derive(Debug, Default)]
struct SubjectCounters {
    minute: Bucket,
    hour: Bucket,
    day: Bucket,
}

impl SubjectCounters {
    fn bucket_mut(&mut self, window: Window) -> &mut Bucket {
        match window {
            Window::Minute => &mut self.minute,
            Window::Hour => &mut self.hour,
            Window::Day => &mut self.day,
        }
    }

    fn bucket(&self, window: Window) -> Bucket {
        match window {
            Window::Minute => self.minute,
            Window::Hour => self.hour,
            Window::Day => self.day,
        }
    }
}

/// In-memory counter store
///
/// A distributed deployment would back this seam with a shared KV store;
/// the per-subject mutex here provides the same all-or-nothing increment
/// within one process.
pub struct InMemoryCounterStore {
    /// One fixed-size counter block per subject ever seen; buckets roll
    /// over in place, so the map is bounded by the subject population
    subjects: DashMap<String, Arc<Mutex<SubjectCounters>>>,
}

impl InMemoryCounterStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
        }
    }

    fn counters(&self, subject_id: &str) -> Arc<Mutex<SubjectCounters>> {
        self.subjects
            .entry(subject_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SubjectCounters::default())))
            .value()
            .clone()
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn check_and_increment(
        &self,
        subject_id: &str,
        thresholds: RoleThresholds,
        now: u64,
    ) -> RateDecision {
        let counters = self.counters(subject_id);
        let mut counters = counters.lock();

        // Check every window before touching any counter.
        for window in Window::ALL {
            let usage = counters.bucket(window).current(window, now);
            let limit = thresholds.limit(window);
            if usage >= limit {
                let reset = window.bucket_start(now) + window.seconds();
                return RateDecision::Limited {
                    window,
                    usage,
                    limit,
                    retry_after_seconds: reset.saturating_sub(now),
                };
            }
        }

        for window in Window::ALL {
            let start = window.bucket_start(now);
            let bucket = counters.bucket_mut(window);
            if bucket.window_start != start {
                bucket.window_start = start;
                bucket.count = 0;
            }
            bucket.count += 1;
        }

        RateDecision::Allowed
    }

    fn usage(&self, subject_id: &str, thresholds: RoleThresholds, now: u64) -> Vec<WindowUsage> {
        let counters = self.counters(subject_id);
        let counters = counters.lock();

        Window::ALL
            .into_iter()
            .map(|window| WindowUsage {
                window,
                usage: counters.bucket(window).current(window, now),
                limit: thresholds.limit(window),
            })
            .collect()
    }
}

/// Per-role sliding-window rate limiter
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Create a limiter over a counter store
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Check the subject's quota, incrementing on allow
    pub fn allow(&self, subject_id: &str, role: Role) -> RateDecision {
        self.store
            .check_and_increment(subject_id, self.config.for_role(role), unix_now())
    }

    /// Side-effect-free usage snapshot
    pub fn status(&self, subject_id: &str, role: Role) -> Vec<WindowUsage> {
        self.store
            .usage(subject_id, self.config.for_role(role), unix_now())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
