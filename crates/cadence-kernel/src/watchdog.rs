//! [`CycleWatchdog`] – per-cycle overrun detector.
//!
//! The scheduler resets the watchdog at the start of every
//! [`run`][crate::CommandScheduler::run] and records an *epoch* after each
//! phase.  When the cycle takes longer than the configured period the epoch
//! breakdown shows which phase ate the budget.  The watchdog only observes;
//! it never changes what gets scheduled.

use std::time::{Duration, Instant};

/// Tracks elapsed time within one control cycle against a fixed budget.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cadence_kernel::watchdog::CycleWatchdog;
///
/// let mut wd = CycleWatchdog::new(Duration::from_secs(1));
/// wd.reset();
/// wd.add_epoch("poll_triggers");
/// wd.add_epoch("execute");
///
/// assert!(!wd.is_expired());
/// assert_eq!(wd.epochs().len(), 2);
/// ```
pub struct CycleWatchdog {
    period: Duration,
    started: Instant,
    last_epoch: Instant,
    epochs: Vec<(&'static str, Duration)>,
}

impl CycleWatchdog {
    pub fn new(period: Duration) -> Self {
        let now = Instant::now();
        Self {
            period,
            started: now,
            last_epoch: now,
            epochs: Vec::new(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn set_period(&mut self, period: Duration) {
        self.period = period;
    }

    /// Start a new cycle: restart the clock and forget previous epochs.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.started = now;
        self.last_epoch = now;
        self.epochs.clear();
    }

    /// Record the time spent since the previous epoch (or the reset) under
    /// `name`.
    pub fn add_epoch(&mut self, name: &'static str) {
        let now = Instant::now();
        self.epochs.push((name, now - self.last_epoch));
        self.last_epoch = now;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `true` when the current cycle has run past its period.
    pub fn is_expired(&self) -> bool {
        self.elapsed() > self.period
    }

    pub fn epochs(&self) -> &[(&'static str, Duration)] {
        &self.epochs
    }

    /// One-line breakdown, e.g. `"poll_triggers=0.012ms execute=3.400ms"`.
    pub fn report(&self) -> String {
        self.epochs
            .iter()
            .map(|(name, d)| format!("{name}={:.3}ms", d.as_secs_f64() * 1e3))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
