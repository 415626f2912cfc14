//! Central table of session timing constants.
//!
//! Every timer, TTL and retry delay used by the cache, the daemon and the
//! orchestrator is read from [`SessionTimings`]. Their relative ordering
//! matters: the startup fallback must fire well before the first daemon
//! check, and a check must happen well before the refresh threshold is
//! crossed. [`SessionTimings::validate`] enforces that.

use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing constants for the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    /// Hard bound on how long the UI `loading` flag may stay true at startup.
    pub fallback_timeout_ms: u64,
    /// Daemon check timer period.
    pub check_interval_ms: u64,
    /// Refresh proactively once the session expires within this window.
    pub refresh_threshold_ms: u64,
    /// Daemon heartbeat timer period.
    pub heartbeat_interval_ms: u64,
    /// Daemon storage cleanup timer period.
    pub cleanup_interval_ms: u64,
    /// Base delay for linear retry backoff (`base * retry_count`).
    pub retry_delay_ms: u64,
    /// Consecutive failures tolerated before the daemon gives up.
    pub max_retry_attempts: u32,
    /// Legacy storage keys older than this are deleted by cleanup.
    pub legacy_key_max_age_ms: u64,
    /// TTL of the in-memory cache shadow.
    pub quick_access_ttl_ms: u64,
    /// TTL of the durable session record.
    pub session_ttl_ms: u64,
    /// TTL of the dashboard snapshot payload.
    pub dashboard_ttl_ms: u64,
    /// TTL of the profile payload.
    pub profile_ttl_ms: u64,
    /// Delay before the first session re-read during an OAuth callback.
    pub oauth_retry_delay_ms: u64,
    /// Delay before the last session re-read during an OAuth callback.
    pub oauth_final_retry_delay_ms: u64,
    /// Number of daemon events kept for diagnostics.
    pub event_history_limit: usize,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            fallback_timeout_ms: 1_000,
            check_interval_ms: 30_000,
            refresh_threshold_ms: 5 * 60_000,
            heartbeat_interval_ms: 60_000,
            cleanup_interval_ms: 5 * 60_000,
            retry_delay_ms: 5_000,
            max_retry_attempts: 3,
            legacy_key_max_age_ms: 24 * 60 * 60_000,
            quick_access_ttl_ms: 30_000,
            session_ttl_ms: 24 * 60 * 60_000,
            dashboard_ttl_ms: 5 * 60_000,
            profile_ttl_ms: 15 * 60_000,
            oauth_retry_delay_ms: 1_000,
            oauth_final_retry_delay_ms: 2_000,
            event_history_limit: 50,
        }
    }
}

impl SessionTimings {
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_millis(self.refresh_threshold_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn oauth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.oauth_retry_delay_ms)
    }

    pub fn oauth_final_retry_delay(&self) -> Duration {
        Duration::from_millis(self.oauth_final_retry_delay_ms)
    }

    /// Linear backoff: the n-th consecutive failure waits `n * retry_delay`.
    pub fn retry_delay_for(&self, retry_count: u32) -> Duration {
        Duration::from_millis(self.retry_delay_ms.saturating_mul(u64::from(retry_count)))
    }

    /// Check the ordering invariants between the constants.
    pub fn validate(&self) -> CoreResult<()> {
        if self.fallback_timeout_ms >= self.check_interval_ms {
            return Err(CoreError::Config(format!(
                "fallback timeout ({}ms) must be shorter than the check interval ({}ms)",
                self.fallback_timeout_ms, self.check_interval_ms
            )));
        }
        if self.check_interval_ms >= self.refresh_threshold_ms {
            return Err(CoreError::Config(format!(
                "check interval ({}ms) must be shorter than the refresh threshold ({}ms)",
                self.check_interval_ms, self.refresh_threshold_ms
            )));
        }
        if self.quick_access_ttl_ms >= self.session_ttl_ms {
            return Err(CoreError::Config(format!(
                "quick access TTL ({}ms) must be shorter than the session TTL ({}ms)",
                self.quick_access_ttl_ms, self.session_ttl_ms
            )));
        }
        if self.max_retry_attempts == 0 {
            return Err(CoreError::Config(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.event_history_limit == 0 {
            return Err(CoreError::Config(
                "event_history_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        SessionTimings::default().validate().unwrap();
    }

    #[test]
    fn test_default_ordering_fallback_check_threshold() {
        let timings = SessionTimings::default();
        assert!(timings.fallback_timeout() < timings.check_interval());
        assert!(timings.check_interval() < timings.refresh_threshold());
        assert!(timings.oauth_retry_delay() < timings.check_interval());
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let timings = SessionTimings::default();
        assert_eq!(timings.retry_delay_for(1), Duration::from_secs(5));
        assert_eq!(timings.retry_delay_for(2), Duration::from_secs(10));
        assert_eq!(timings.retry_delay_for(3), Duration::from_secs(15));
    }

    #[test]
    fn test_validate_rejects_fallback_after_check() {
        let timings = SessionTimings {
            fallback_timeout_ms: 60_000,
            ..SessionTimings::default()
        };
        assert!(timings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_check_after_threshold() {
        let timings = SessionTimings {
            check_interval_ms: 10 * 60_000,
            ..SessionTimings::default()
        };
        assert!(timings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let timings = SessionTimings {
            max_retry_attempts: 0,
            ..SessionTimings::default()
        };
        assert!(timings.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let timings: SessionTimings =
            serde_json::from_str(r#"{"check_interval_ms": 15000}"#).unwrap();
        assert_eq!(timings.check_interval_ms, 15_000);
        assert_eq!(timings.fallback_timeout_ms, 1_000);
        assert_eq!(timings.max_retry_attempts, 3);
    }
}
