//! Rate limiter gate for the GitHub REST API.
//!
//! GitHub replenishes quota at a fixed wall-clock instant reported in the
//! `x-ratelimit-reset` header. When the remaining quota drops to the
//! low-water mark the gate sleeps until that instant plus a small margin,
//! before the next request is issued.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Remaining-quota threshold at or below which the gate forces a wait.
pub const LOW_WATER_MARK: u32 = 10;

/// Added to the reset instant to absorb clock skew between us and GitHub.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Quota metadata carried by one API response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateState {
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

impl RateState {
    pub fn new(remaining: u32, reset: DateTime<Utc>) -> Self {
        Self { remaining, reset }
    }

    /// Parse the raw header values; `reset` is a unix timestamp in seconds.
    pub fn from_headers(remaining: &str, reset: &str) -> Option<Self> {
        let remaining = remaining.trim().parse::<u32>().ok()?;
        let reset = reset.trim().parse::<i64>().ok()?;
        let reset = DateTime::<Utc>::from_timestamp(reset, 0)?;
        Some(Self { remaining, reset })
    }
}

/// How long to wait before the next request, if at all.
///
/// Returns `None` while `remaining` is above [`LOW_WATER_MARK`]. A reset
/// instant already in the past still yields the safety margin.
pub fn wait_duration(remaining: u32, reset: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    if remaining > LOW_WATER_MARK {
        return None;
    }

    let until_reset = (reset - now).to_std().unwrap_or(Duration::ZERO);
    Some(until_reset + SAFETY_MARGIN)
}

type Clock = fn() -> DateTime<Utc>;

/// Stateful gate owned by the listing flow.
///
/// Only the paginator's flow calls [`RateLimiter::observe`]; everything else
/// reads through [`RateLimiter::state`].
pub struct RateLimiter {
    state: Mutex<Option<RateState>>,
    clock: Clock,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Use a fixed clock, so tests can pin "now" relative to the reset.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            state: Mutex::new(None),
            clock,
        }
    }

    /// Record the quota reported by the most recent response.
    pub fn observe(&self, state: RateState) {
        debug!(
            "Rate limit: {} remaining, resets at {}",
            state.remaining,
            state.reset.to_rfc3339()
        );
        if let Ok(mut current) = self.state.lock() {
            *current = Some(state);
        }
    }

    pub fn state(&self) -> Option<RateState> {
        self.state.lock().ok().and_then(|s| *s)
    }

    /// The wait the next request would incur, given the last observation.
    pub fn pending_wait(&self) -> Option<Duration> {
        let state = self.state()?;
        wait_duration(state.remaining, state.reset, (self.clock)())
    }

    /// Suspend the caller until the quota resets, if it is nearly exhausted.
    pub async fn throttle(&self) {
        let Some(wait) = self.pending_wait() else {
            return;
        };

        let resume_at = (self.clock)()
            + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            "Approaching rate limit, sleeping for {}s until {}",
            wait.as_secs(),
            resume_at.to_rfc3339()
        );
        tokio::time::sleep(wait).await;

        // The quota was replenished; forget the stale reading until the next
        // response reports a fresh one.
        if let Ok(mut current) = self.state.lock() {
            *current = None;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use quickcheck_macros::quickcheck;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_wait_above_low_water_mark() {
        let now = fixed_now();
        let reset = now + chrono::Duration::minutes(30);

        assert_eq!(wait_duration(11, reset, now), None);
        assert_eq!(wait_duration(5000, reset, now), None);
    }

    #[test]
    fn test_waits_exactly_at_low_water_mark() {
        let now = fixed_now();
        let reset = now + chrono::Duration::seconds(120);

        assert_eq!(
            wait_duration(LOW_WATER_MARK, reset, now),
            Some(Duration::from_secs(130))
        );
        assert_eq!(wait_duration(0, reset, now), Some(Duration::from_secs(130)));
    }

    #[test]
    fn test_past_reset_waits_only_margin() {
        let now = fixed_now();
        let reset = now - chrono::Duration::seconds(45);

        assert_eq!(wait_duration(3, reset, now), Some(SAFETY_MARGIN));
    }

    #[test]
    fn test_from_headers() {
        let state = RateState::from_headers("42", "1714564800").unwrap();
        assert_eq!(state.remaining, 42);
        assert_eq!(state.reset, fixed_now());

        assert!(RateState::from_headers("many", "1714564800").is_none());
        assert!(RateState::from_headers("1", "").is_none());
    }

    #[test]
    fn test_limiter_without_observation_never_waits() {
        let limiter = RateLimiter::with_clock(fixed_now);
        assert_eq!(limiter.state(), None);
        assert_eq!(limiter.pending_wait(), None);
    }

    #[test]
    fn test_limiter_tracks_latest_observation() {
        let limiter = RateLimiter::with_clock(fixed_now);
        let reset = fixed_now() + chrono::Duration::seconds(60);

        limiter.observe(RateState::new(5, reset));
        assert_eq!(limiter.pending_wait(), Some(Duration::from_secs(70)));

        limiter.observe(RateState::new(4999, reset));
        assert_eq!(limiter.pending_wait(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_sleeps_until_reset_plus_margin() {
        let limiter = RateLimiter::with_clock(fixed_now);
        limiter.observe(RateState::new(2, fixed_now() + chrono::Duration::seconds(30)));

        let started = tokio::time::Instant::now();
        limiter.throttle().await;

        assert!(started.elapsed() >= Duration::from_secs(40));
        assert_eq!(limiter.state(), None);
    }

    #[quickcheck]
    fn prop_wait_never_shorter_than_reset(remaining: u32, reset_in_secs: u16) -> bool {
        let now = fixed_now();
        let reset = now + chrono::Duration::seconds(reset_in_secs as i64);

        match wait_duration(remaining, reset, now) {
            None => remaining > LOW_WATER_MARK,
            Some(wait) => {
                remaining <= LOW_WATER_MARK
                    && wait == Duration::from_secs(reset_in_secs as u64) + SAFETY_MARGIN
            }
        }
    }
}
