//! Per-call options and per-tube defaults.

use std::time::Duration;

/// Most urgent priority.
pub const URGENT_PRIORITY: u32 = 0;

/// beanstalkd's default priority.
pub const DEFAULT_PRIORITY: u32 = 1024;

pub const DEFAULT_TTR: Duration = Duration::from_secs(60);

/// A ttr below this is raised to it; a lease must end in the future.
pub const MIN_TTR: Duration = Duration::from_secs(1);

/// Longest delay or ttr a message can carry; larger values are clamped.
/// beanstalkd carries both as 32-bit seconds.
pub const MAX_DURATION: Duration = Duration::from_secs(u32::MAX as u64);

/// Options for `submit`. Unset fields fall back to the tube's settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub priority: Option<u32>,
    pub delay: Option<Duration>,
    pub ttr: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ttr(mut self, ttr: Duration) -> Self {
        self.ttr = Some(ttr);
        self
    }
}

/// Options for `release`.
///
/// `priority: None` keeps the message's current priority; `delay: None`
/// releases straight to ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseOptions {
    pub priority: Option<u32>,
    pub delay: Option<Duration>,
}

impl ReleaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay to apply, clamped to `MAX_DURATION`.
    pub(crate) fn resolved_delay(&self) -> Duration {
        self.delay.unwrap_or_default().min(MAX_DURATION)
    }
}

/// Resolved settings of one tube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TubeSettings {
    pub priority: u32,
    pub delay: Duration,
    pub ttr: Duration,

    /// Used when `reserve` is called without a timeout. `None` blocks forever.
    pub reserve_timeout: Option<Duration>,

    /// Expired leases of a message reserved this many times bury it instead
    /// of returning it to ready. `None` redelivers forever.
    pub max_reserves: Option<u32>,

    /// Largest `peek` limit this tube serves. `None` means unlimited.
    pub peek_window: Option<usize>,
}

impl Default for TubeSettings {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            delay: Duration::ZERO,
            ttr: DEFAULT_TTR,
            reserve_timeout: None,
            max_reserves: None,
            peek_window: None,
        }
    }
}

impl TubeSettings {
    /// Applies the tube defaults to a submit request.
    pub(crate) fn resolve(&self, options: &SubmitOptions) -> (u32, Duration, Duration) {
        let priority = options.priority.unwrap_or(self.priority);
        let delay = options.delay.unwrap_or(self.delay).min(MAX_DURATION);
        let ttr = options.ttr.unwrap_or(self.ttr).clamp(MIN_TTR, MAX_DURATION);
        (priority, delay, ttr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_options_use_tube_defaults() {
        let settings = TubeSettings {
            priority: 7,
            delay: Duration::from_secs(3),
            ..TubeSettings::default()
        };
        let (priority, delay, ttr) = settings.resolve(&SubmitOptions::new());
        assert_eq!(priority, 7);
        assert_eq!(delay, Duration::from_secs(3));
        assert_eq!(ttr, DEFAULT_TTR);
    }

    #[test]
    fn explicit_options_win() {
        let options = SubmitOptions::new()
            .priority(URGENT_PRIORITY)
            .delay(Duration::ZERO)
            .ttr(Duration::from_secs(5));
        let (priority, delay, ttr) = TubeSettings::default().resolve(&options);
        assert_eq!(priority, 0);
        assert_eq!(delay, Duration::ZERO);
        assert_eq!(ttr, Duration::from_secs(5));
    }

    #[test]
    fn oversized_durations_are_clamped() {
        let options = SubmitOptions::new()
            .delay(Duration::MAX)
            .ttr(Duration::MAX);
        let (_, delay, ttr) = TubeSettings::default().resolve(&options);
        assert_eq!(delay, MAX_DURATION);
        assert_eq!(ttr, MAX_DURATION);
        assert_eq!(
            ReleaseOptions::new().delay(Duration::MAX).resolved_delay(),
            MAX_DURATION
        );
        assert_eq!(ReleaseOptions::new().resolved_delay(), Duration::ZERO);
    }

    #[test]
    fn zero_ttr_is_raised_to_minimum() {
        let options = SubmitOptions::new().ttr(Duration::ZERO);
        let (_, _, ttr) = TubeSettings::default().resolve(&options);
        assert_eq!(ttr, MIN_TTR);
    }
}
