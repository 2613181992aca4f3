//! Adaptive per-category rate limiter

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::outcome::{Category, Outcome};
use crate::error::UploadError;

/// Smallest delay used as the base of an increase when the current delay is zero
const BACKOFF_FLOOR: Duration = Duration::from_millis(10);

/// Pacing configuration for all categories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacerSettings {
    /// Minimum inter-call delay, indexed by category
    min_delays: [Duration; 5],
    /// Ceiling for the adaptive delay
    pub max_delay: Duration,
    /// Success shrinks the delay by `delay / 2^decay_constant`
    pub decay_constant: u32,
    /// Backpressure multiplies the delay by `2^attack_constant`; 0 jumps straight to `max_delay`
    pub attack_constant: u32,
}

impl Default for PacerSettings {
    fn default() -> Self {
        let mut settings = Self {
            min_delays: [Duration::ZERO; 5],
            max_delay: Duration::from_secs(2),
            decay_constant: 2,
            attack_constant: 1,
        };
        settings.min_delays[Category::Listing.index()] = Duration::from_millis(250);
        settings.min_delays[Category::UploadInit.index()] = Duration::from_millis(500);
        settings.min_delays[Category::DownloadLink.index()] = Duration::from_millis(300);
        settings.min_delays[Category::Mutation.index()] = Duration::from_millis(250);
        settings
    }
}

impl PacerSettings {
    /// Settings with every category unthrottled
    pub fn unthrottled() -> Self {
        Self {
            min_delays: [Duration::ZERO; 5],
            ..Self::default()
        }
    }

    pub fn min_delay(&self, category: Category) -> Duration {
        self.min_delays[category.index()]
    }

    pub fn with_min_delay(mut self, category: Category, delay: Duration) -> Self {
        self.min_delays[category.index()] = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

#[derive(Debug)]
struct PacerState {
    min_delay: Duration,
    current: Duration,
}

#[derive(Debug)]
struct CategoryPacer {
    /// Serializes acquisitions; holds the instant of the previous grant
    gate: tokio::sync::Mutex<Option<Instant>>,
    /// Adaptive delay, locked only for a single read or read-modify-write
    state: Mutex<PacerState>,
}

impl CategoryPacer {
    fn new(min_delay: Duration) -> Self {
        Self {
            gate: tokio::sync::Mutex::new(None),
            state: Mutex::new(PacerState {
                min_delay,
                current: min_delay,
            }),
        }
    }

    fn current_delay(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).current
    }
}

/// Rate limiter shared by every upload running on one engine instance
#[derive(Debug)]
pub struct RateLimiter {
    pacers: [CategoryPacer; 5],
    max_delay: Duration,
    decay_constant: u32,
    attack_constant: u32,
}

impl RateLimiter {
    pub fn new(settings: &PacerSettings) -> Self {
        Self {
            pacers: Category::ALL.map(|c| CategoryPacer::new(settings.min_delay(c))),
            max_delay: settings.max_delay,
            decay_constant: settings.decay_constant,
            attack_constant: settings.attack_constant,
        }
    }

    fn pacer(&self, category: Category) -> &CategoryPacer {
        &self.pacers[category.index()]
    }

    /// Wait until one call in `category` may be issued.
    ///
    /// Returns the instant the call was granted. Grants in one category are
    /// never closer together than that category's delay at grant time.
    pub async fn acquire(
        &self,
        category: Category,
        cancel: &CancellationToken,
    ) -> Result<Instant, UploadError> {
        let pacer = self.pacer(category);

        let mut last_grant = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UploadError::Cancelled),
            guard = pacer.gate.lock() => guard,
        };

        if let Some(previous) = *last_grant {
            // The delay may grow while we sleep; recheck it on every wake
            loop {
                let ready_at = previous + pacer.current_delay();
                if ready_at <= Instant::now() {
                    break;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                    _ = sleep_until(ready_at) => {}
                }
            }
        }

        let granted = Instant::now();
        *last_grant = Some(granted);
        Ok(granted)
    }

    /// Feed a call outcome back so the category's delay can adapt
    pub fn report_outcome(&self, category: Category, outcome: Outcome) {
        let pacer = self.pacer(category);
        let (old, new) = {
            let mut state = pacer.state.lock().unwrap_or_else(|e| e.into_inner());
            let old = state.current;
            state.current = if outcome.is_backpressure() {
                self.increase(old, state.min_delay)
            } else {
                self.decay(old, state.min_delay)
            };
            (old, state.current)
        };

        if old != new {
            debug!(
                "Pacer {} {:?}: delay {:?} -> {:?}",
                category, outcome, old, new
            );
        }
    }

    /// Current adaptive delay for a category
    pub fn current_delay(&self, category: Category) -> Duration {
        self.pacer(category).current_delay()
    }

    fn increase(&self, old: Duration, min: Duration) -> Duration {
        if self.attack_constant == 0 {
            return self.max_delay.max(min);
        }
        let factor = 1u32.checked_shl(self.attack_constant).unwrap_or(u32::MAX);
        old.max(BACKOFF_FLOOR)
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
            .max(min)
    }

    fn decay(&self, old: Duration, min: Duration) -> Duration {
        let divisor = 1u32.checked_shl(self.decay_constant).unwrap_or(u32::MAX);
        let reduced = old - old / divisor;
        if reduced <= min || reduced == old {
            min
        } else {
            reduced
        }
    }
}
