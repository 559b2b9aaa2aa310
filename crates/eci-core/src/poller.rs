//! Status Poller
//!
//! Bounded polling with exponential backoff. The poller knows nothing about
//! resource kinds: callers hand it a status accessor and the set of
//! statuses they are willing to stop on.
//!
//! ```text
//! attempt 0 ── accessor ── target? ──yes──▶ return status
//!                  │           │no
//!                  │fail       ▼
//!                  └──warn──▶ sleep(min(base + 2^i, cap)) ──▶ attempt i+1
//! ```
//!
//! The backoff sleep is taken after a failed accessor call as well, so a
//! struggling backend is never hammered in a tight loop.

use crate::diagnostics::{Diagnostics, resource_detail};
use crate::error::RemoteResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and backoff shape for one kind of wait
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of accessor calls
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Added to `2^attempt` when computing the delay (seconds)
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: f64,

    /// Upper bound on any single delay (seconds)
    #[serde(default = "default_cap_secs")]
    pub cap_secs: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: f64, cap_secs: f64) -> Self {
        Self {
            max_attempts,
            base_delay_secs,
            cap_secs,
        }
    }

    /// Delay after attempt `attempt` (0-indexed): `min(base + 2^attempt, cap)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.min(1023) as i32);
        let secs = (self.base_delay_secs + exp).min(self.cap_secs);
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Worst-case time spent sleeping, i.e. the implicit timeout
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("max_attempts must be >= 1"));
        }
        if !(self.cap_secs > 0.0) || !self.cap_secs.is_finite() {
            return Err(crate::Error::config("cap_secs must be a positive number"));
        }
        if !(self.base_delay_secs >= 0.0) || !self.base_delay_secs.is_finite() {
            return Err(crate::Error::config(
                "base_delay_secs must be a non-negative number",
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            cap_secs: default_cap_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_secs() -> f64 {
    0.5
}

fn default_cap_secs() -> f64 {
    15.0
}

/// One sampled status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusObservation {
    pub status: String,
    pub observed_at: DateTime<Utc>,
}

impl StatusObservation {
    pub fn now(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            observed_at: Utc::now(),
        }
    }
}

/// Poll `accessor` until it reports one of `targets` or the budget runs out
///
/// Returns the reached status (if any) plus the diagnostics gathered along
/// the way. Accessor failures become warnings; exhaustion becomes an error
/// naming `resource_id`. With `max_attempts == 0` the accessor is never
/// called.
pub async fn await_status<F, Fut>(
    resource_id: &str,
    mut accessor: F,
    targets: &[&str],
    policy: &RetryPolicy,
) -> (Option<String>, Diagnostics)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<StatusObservation>>,
{
    let mut diags = Diagnostics::new();

    for attempt in 0..policy.max_attempts {
        match accessor().await {
            Ok(observation) => {
                debug!(
                    resource_id = %resource_id,
                    attempt,
                    status = %observation.status,
                    observed_at = %observation.observed_at,
                    "Polled status"
                );
                if targets.contains(&observation.status.as_str()) {
                    return (Some(observation.status), diags);
                }
            }
            Err(e) => {
                warn!(resource_id = %resource_id, attempt, error = %e, "Failed to get status");
                diags.push_warning(
                    "failed to get status",
                    format!("retry: {} (err: {})", attempt, e),
                );
            }
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.delay_for(attempt);
            debug!(
                resource_id = %resource_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Target status not reached, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    diags.push_error(
        "unexpected status",
        resource_detail(
            format!(
                "reached maximum retry without observing target status {:?}",
                targets
            ),
            resource_id,
        ),
    );
    (None, diags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, RemoteError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_follows_base_plus_power_of_two_capped() {
        let policy = RetryPolicy::new(10, 0.5, 10.0);
        let delays: Vec<f64> = (0..5).map(|i| policy.delay_for(i).as_secs_f64()).collect();
        assert_eq!(delays, vec![1.5, 2.5, 4.5, 8.5, 10.0]);
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        let policy = RetryPolicy::new(10, 0.5, 10.0);
        for attempt in [5, 10, 31, 64, 1000, u32::MAX] {
            assert_eq!(policy.delay_for(attempt), Duration::from_secs(10));
        }
    }

    #[test]
    fn backoff_is_monotonic() {
        let policy = RetryPolicy::new(10, 0.5, 15.0);
        let delays: Vec<Duration> = (0..12).map(|i| policy.delay_for(i)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn max_total_delay_skips_sleep_after_last_attempt() {
        let policy = RetryPolicy::new(3, 0.5, 10.0);
        assert_eq!(policy.max_total_delay(), Duration::from_secs(4));
    }

    #[test]
    fn huge_cap_saturates_instead_of_panicking() {
        let policy = RetryPolicy::new(200, 0.5, f64::MAX);
        assert_eq!(policy.delay_for(64), Duration::MAX);
        assert_eq!(policy.delay_for(u32::MAX), Duration::MAX);
        assert_eq!(policy.max_total_delay(), Duration::MAX);

        let unbounded = RetryPolicy::new(3, 0.5, f64::INFINITY);
        assert_eq!(unbounded.delay_for(1), Duration::from_secs_f64(2.5));
    }

    #[test]
    fn validate_rejects_bad_policies() {
        assert!(RetryPolicy::new(0, 0.5, 10.0).validate().is_err());
        assert!(RetryPolicy::new(3, 0.5, 0.0).validate().is_err());
        assert!(RetryPolicy::new(3, -1.0, 10.0).validate().is_err());
        assert!(RetryPolicy::new(3, 0.5, f64::NAN).validate().is_err());
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_target_is_seen() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(10, 0.5, 15.0);

        let (status, diags) = await_status(
            "vol-1",
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let status = if n < 2 { "assigned" } else { "prepared" };
                    Ok(StatusObservation::now(status))
                }
            },
            &["prepared"],
            &policy,
        )
        .await;

        assert_eq!(status.as_deref(), Some("prepared"));
        assert!(diags.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_is_immediately_fatal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(0, 0.5, 15.0);
        let started = tokio::time::Instant::now();

        let (status, diags) = await_status(
            "vm-1",
            || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(StatusObservation::now("idle")) }
            },
            &["idle"],
            &policy,
        )
        .await;

        assert!(status.is_none());
        assert!(diags.has_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn accessor_failure_still_backs_off() {
        let policy = RetryPolicy::new(2, 0.5, 15.0);
        let started = tokio::time::Instant::now();

        let (status, diags) = await_status(
            "vm-1",
            || async { Err::<StatusObservation, _>(RemoteError::from(ApiError::new(503))) },
            &["idle"],
            &policy,
        )
        .await;

        assert!(status.is_none());
        assert_eq!(diags.warnings().count(), 2);
        assert_eq!(diags.errors().count(), 1);
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }
}
