//! Pure delay-scheduling strategies used between reconnect attempts.

use std::fmt::Debug;
use std::time::Duration;

use rand::Rng as _;

const DEFAULT_LINEAR_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_EXPONENTIAL_INITIAL: Duration = Duration::from_secs(1);
const DEFAULT_EXPONENTIAL_MAX: Duration = Duration::from_secs(30);
const DEFAULT_EXPONENTIAL_MULTIPLIER: f64 = 1.5;
const DEFAULT_EXPONENTIAL_JITTER: f64 = 0.2;

/// A delay-scheduling strategy for reconnect attempts.
///
/// `next` is a pure function of `attempt` and the strategy's own
/// configuration (plus, for [`Exponential`], an internal RNG draw for
/// jitter) — it must never return a negative duration. `reset` clears any
/// internal counter; strategies that are stateless may treat it as a no-op.
///
/// The Supervisor owns exactly one `Backoff` at a time, so this trait
/// requires `Send` but not `Sync`.
pub trait Backoff: Debug + Send + 'static {
    /// Compute the delay before reconnect attempt number `attempt` (≥ 1).
    fn next(&mut self, attempt: u32) -> Duration;

    /// Clear any internal counter, e.g. after a successful connection.
    fn reset(&mut self);
}

/// A constant delay between every reconnect attempt.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct Linear {
    pub interval: Duration,
}

impl Default for Linear {
    fn default() -> Self {
        Self {
            interval: DEFAULT_LINEAR_INTERVAL,
        }
    }
}

impl Linear {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Backoff for Linear {
    fn next(&mut self, _attempt: u32) -> Duration {
        self.interval
    }

    fn reset(&mut self) {}
}

/// Exponential delay with multiplicative jitter, clamped to a maximum.
///
/// `next(attempt) = clamp(initial * multiplier^(attempt-1) + jitter_offset, [0, max])`
/// where `jitter_offset` is drawn uniformly from `[-jitter * base, jitter * base]`
/// and `base = initial * multiplier^(attempt-1)`. The clamp to `max` is
/// applied after jitter, so the final result never exceeds `max` even if a
/// large jitter would otherwise push it over.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct Exponential {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for Exponential {
    fn default() -> Self {
        Self {
            initial: DEFAULT_EXPONENTIAL_INITIAL,
            max: DEFAULT_EXPONENTIAL_MAX,
            multiplier: DEFAULT_EXPONENTIAL_MULTIPLIER,
            jitter: DEFAULT_EXPONENTIAL_JITTER,
        }
    }
}

impl Backoff for Exponential {
    fn next(&mut self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exponent);

        let jitter_range = base * self.jitter;
        let offset = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        let clamped = (base + offset).max(0.0).min(self.max.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_returns_configured_interval_for_every_attempt() {
        let mut backoff = Linear::new(Duration::from_millis(500));

        for attempt in 1..=5 {
            assert_eq!(backoff.next(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn exponential_without_jitter_matches_closed_form() {
        let mut backoff = Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        };

        assert_eq!(backoff.next(1), Duration::from_millis(100));
        assert_eq!(backoff.next(2), Duration::from_millis(200));
        assert_eq!(backoff.next(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_clamps_to_max() {
        let mut backoff = Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(2),
            multiplier: 10.0,
            jitter: 0.0,
        };

        assert_eq!(backoff.next(5), Duration::from_secs(2));
    }

    #[test]
    fn exponential_never_yields_negative_durations() {
        let mut backoff = Exponential {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: 2.0,
        };

        for attempt in 1..=100 {
            let delay = backoff.next(attempt);
            assert!(delay >= Duration::ZERO);
        }
    }
}
