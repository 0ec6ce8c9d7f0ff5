//! Durable-backend health tracking for the resilient store.
//!
//! The tracker decides whether the next call should reach the durable
//! backend at all, and records whether the volatile backend has accepted
//! writes the durable backend never saw.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::config::FallbackConfig;

/// Whether the durable backend is currently being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Every call goes to the durable backend first.
    Healthy,
    /// The durable backend is skipped except for periodic probes.
    Degraded,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendMode::Healthy => write!(f, "healthy"),
            BackendMode::Degraded => write!(f, "degraded"),
        }
    }
}

/// Point-in-time view of the store's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreHealth {
    pub mode: BackendMode,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Writes served by the volatile backend since startup.
    pub volatile_writes: u64,
    /// True once any write has landed only in the volatile backend.
    /// There is no reconciliation, so this never resets.
    pub diverged: bool,
    pub last_error: Option<String>,
}

impl StoreHealth {
    /// Snapshot for a durable backend that could not even be opened.
    pub fn unreachable(reason: &str) -> Self {
        Self {
            mode: BackendMode::Degraded,
            consecutive_failures: 1,
            total_failures: 1,
            volatile_writes: 0,
            diverged: false,
            last_error: Some(format!("open: {reason}")),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    consecutive_failures: u32,
    total_failures: u64,
    volatile_writes: u64,
    skipped_since_probe: u32,
    last_error: Option<String>,
}

/// Consecutive-failure counter with a probe schedule.
#[derive(Debug)]
pub struct HealthTracker {
    policy: FallbackConfig,
    state: Mutex<State>,
}

impl HealthTracker {
    pub fn new(policy: FallbackConfig) -> Self {
        Self {
            policy,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn degraded(&self, state: &State) -> bool {
        self.policy.failure_threshold > 0
            && state.consecutive_failures >= self.policy.failure_threshold
    }

    /// Whether the next call should be sent to the durable backend.
    ///
    /// While degraded, only every `probe_interval`-th call is let through.
    pub fn should_try_durable(&self) -> bool {
        let mut state = self.lock();
        if !self.degraded(&state) {
            return true;
        }
        state.skipped_since_probe += 1;
        if state.skipped_since_probe >= self.policy.probe_interval {
            state.skipped_since_probe = 0;
            tracing::debug!("probing durable backend");
            return true;
        }
        false
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        if self.degraded(&state) {
            tracing::info!(
                failures = state.consecutive_failures,
                "durable backend recovered"
            );
        }
        state.consecutive_failures = 0;
        state.skipped_since_probe = 0;
    }

    pub fn record_failure(&self, operation: &str, reason: &str) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.total_failures += 1;
        state.last_error = Some(format!("{operation}: {reason}"));
        if self.policy.failure_threshold > 0
            && state.consecutive_failures == self.policy.failure_threshold
        {
            tracing::warn!(
                threshold = self.policy.failure_threshold,
                "durable backend degraded, routing calls to volatile backend"
            );
        }
    }

    /// Note a write that only the volatile backend has seen.
    pub fn record_volatile_write(&self, operation: &str) {
        let mut state = self.lock();
        if state.volatile_writes == 0 {
            tracing::warn!(operation, "volatile backend now diverges from durable backend");
        }
        state.volatile_writes += 1;
    }

    pub fn diverged(&self) -> bool {
        self.lock().volatile_writes > 0
    }

    pub fn snapshot(&self) -> StoreHealth {
        let state = self.lock();
        StoreHealth {
            mode: if self.degraded(&state) {
                BackendMode::Degraded
            } else {
                BackendMode::Healthy
            },
            consecutive_failures: state.consecutive_failures,
            total_failures: state.total_failures,
            volatile_writes: state.volatile_writes,
            diverged: state.volatile_writes > 0,
            last_error: state.last_error.clone(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(FallbackConfig::default())
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
