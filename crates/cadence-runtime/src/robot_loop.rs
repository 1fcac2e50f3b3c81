//! [`RobotLoop`] – drive the scheduler at a fixed period.
//!
//! Each [`step`][RobotLoop::step] runs one scheduler cycle.  The timed
//! drivers sleep away whatever is left of the period afterwards; a cycle that
//! overruns its period is followed immediately by the next one, with no
//! attempt to catch up.
//!
//! ```
//! use std::time::Duration;
//! use cadence_kernel::CommandScheduler;
//! use cadence_runtime::robot_loop::RobotLoop;
//!
//! let mut robot = RobotLoop::new(CommandScheduler::new(), Duration::from_millis(1));
//! robot.run_for(3);
//! assert_eq!(robot.cycles(), 3);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use cadence_kernel::CommandScheduler;
use tracing::{debug, info};

pub struct RobotLoop {
    scheduler: CommandScheduler,
    period: Duration,
    cycles: u64,
}

impl RobotLoop {
    pub fn new(scheduler: CommandScheduler, period: Duration) -> Self {
        Self {
            scheduler,
            period,
            cycles: 0,
        }
    }

    /// Use the period from the scheduler's own configuration.
    pub fn from_config(scheduler: CommandScheduler) -> Self {
        let period = scheduler.config().period();
        Self::new(scheduler, period)
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cycles run so far by this loop.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run exactly one scheduler cycle, without sleeping.
    pub fn step(&mut self) {
        self.scheduler.run();
        self.cycles += 1;
    }

    /// Run `cycles` cycles at the configured period.
    pub fn run_for(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.timed_step();
        }
    }

    /// Run cycles at the configured period until `stop` is set.  Returns the
    /// number of cycles run.
    pub fn run_until(&mut self, stop: &AtomicBool) -> u64 {
        info!(period_ms = self.period.as_millis() as u64, "robot loop started");
        let start = self.cycles;
        while !stop.load(Ordering::SeqCst) {
            self.timed_step();
        }
        let ran = self.cycles - start;
        info!(cycles = ran, "robot loop stopped");
        ran
    }

    fn timed_step(&mut self) {
        let started = Instant::now();
        self.step();
        let elapsed = started.elapsed();
        match self.period.checked_sub(elapsed) {
            Some(remaining) => thread::sleep(remaining),
            None => debug!(
                cycle = self.cycles,
                elapsed_ms = elapsed.as_secs_f64() * 1e3,
                "cycle ran past its period; starting the next one immediately"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::probe;
    use cadence_types::SchedulerConfig;
    use std::sync::Arc;

    #[test]
    fn step_runs_one_cycle() {
        let scheduler = CommandScheduler::new();
        let (cmd, log) = probe("cmd");
        scheduler.schedule(&cmd);
        let mut robot = RobotLoop::new(scheduler.clone(), Duration::from_millis(5));
        robot.step();
        robot.step();
        assert_eq!(log.execute(), 2);
        assert_eq!(robot.cycles(), 2);
        assert_eq!(scheduler.cycle(), 2);
    }

    #[test]
    fn run_for_respects_the_period() {
        let mut robot = RobotLoop::new(CommandScheduler::new(), Duration::from_millis(10));
        let started = Instant::now();
        robot.run_for(3);
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(robot.cycles(), 3);
    }

    #[test]
    fn run_until_stops_on_flag() {
        let stop = Arc::new(AtomicBool::new(false));
        let setter = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            setter.store(true, Ordering::SeqCst);
        });
        let mut robot = RobotLoop::new(CommandScheduler::new(), Duration::from_millis(5));
        let ran = robot.run_until(&stop);
        handle.join().unwrap();
        assert!(ran >= 1);
        assert_eq!(ran, robot.cycles());
    }

    #[test]
    fn run_until_with_flag_already_set_runs_nothing() {
        let stop = AtomicBool::new(true);
        let mut robot = RobotLoop::new(CommandScheduler::new(), Duration::from_millis(5));
        assert_eq!(robot.run_until(&stop), 0);
    }

    #[test]
    fn from_config_uses_the_configured_period() {
        let config = SchedulerConfig {
            period_ms: 7,
            ..SchedulerConfig::default()
        };
        let robot = RobotLoop::from_config(CommandScheduler::with_config(config));
        assert_eq!(robot.period(), Duration::from_millis(7));
        assert!(robot.scheduler().scheduled_commands().is_empty());
    }
}
