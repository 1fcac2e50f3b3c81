//! Simulated two-subsystem robot driven by the command scheduler.
//!
//! | Subsystem | State | Default command |
//! |---|---|---|
//! | `drivetrain` | speed (m/s), distance travelled (m) | `Idle` – hold speed at zero |
//! | `intake` | roller power, time spent feeding (s) | `HoldIntake` – roller off |
//!
//! The autonomous routine logs, drives out [`DRIVE_DISTANCE`] metres, runs
//! the intake until a game piece is detected (bounded by a timeout) and logs
//! again.  A trigger on the piece sensor logs the pickup.  Physics integrate
//! in each subsystem's `periodic` using the scheduler period as the time step,
//! so a run is deterministic in cycles regardless of wall-clock jitter.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use cadence_kernel::{CommandHandle, CommandScheduler, Subsystem, SubsystemHandle, Trigger};
use cadence_runtime::commands::{FunctionalCommand, LogCommand};
use cadence_runtime::decorators::CommandExt;
use cadence_types::{CommandError, SchedulerError, SchedulerEventKind};
use tracing::debug;

/// Drive speed used during autonomous, in m/s.
pub const DRIVE_SPEED: f64 = 2.0;
/// Distance the autonomous routine drives before collecting, in metres.
pub const DRIVE_DISTANCE: f64 = 1.0;
/// Roller time needed to pull a game piece in, in seconds.
pub const FEED_TIME: f64 = 0.3;
/// Upper bound on the collect step.
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(3);

// ─────────────────────────────────────────────────────────────────────────────
// Subsystems
// ─────────────────────────────────────────────────────────────────────────────

pub struct Drivetrain {
    speed: f64,
    distance: f64,
    dt: f64,
}

impl Drivetrain {
    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }
}

impl Subsystem for Drivetrain {
    fn name(&self) -> &str {
        "drivetrain"
    }

    fn periodic(&mut self) -> Result<(), CommandError> {
        self.distance += self.speed * self.dt;
        Ok(())
    }
}

pub struct Intake {
    roller: f64,
    fed: f64,
    dt: f64,
}

impl Intake {
    /// Beam-break sensor.
    pub fn has_piece(&self) -> bool {
        self.fed >= FEED_TIME
    }

    pub fn roller(&self) -> f64 {
        self.roller
    }
}

impl Subsystem for Intake {
    fn name(&self) -> &str {
        "intake"
    }

    fn periodic(&mut self) -> Result<(), CommandError> {
        if self.roller > 0.0 {
            self.fed += self.dt;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event summary
// ─────────────────────────────────────────────────────────────────────────────

/// Running totals of scheduler events and reported errors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventSummary {
    pub scheduled: u64,
    pub executed: u64,
    pub interrupted: u64,
    pub finished: u64,
    pub errors: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo robot
// ─────────────────────────────────────────────────────────────────────────────

pub struct Demo {
    drivetrain: Rc<RefCell<Drivetrain>>,
    intake: Rc<RefCell<Intake>>,
    drivetrain_handle: SubsystemHandle,
    intake_handle: SubsystemHandle,
    autonomous: CommandHandle,
    enabled: Rc<Cell<bool>>,
    summary: Rc<RefCell<EventSummary>>,
}

impl Demo {
    /// Register the subsystems, default commands, sensor trigger and event
    /// observers on `scheduler`, and build (but do not schedule) the
    /// autonomous routine.
    pub fn build(scheduler: &CommandScheduler) -> Result<Self, SchedulerError> {
        let dt = scheduler.config().period().as_secs_f64();
        let drivetrain = Rc::new(RefCell::new(Drivetrain {
            speed: 0.0,
            distance: 0.0,
            dt,
        }));
        let intake = Rc::new(RefCell::new(Intake {
            roller: 0.0,
            fed: 0.0,
            dt,
        }));
        let drivetrain_handle = SubsystemHandle::new(drivetrain.clone());
        let intake_handle = SubsystemHandle::new(intake.clone());
        scheduler.register_subsystem(&drivetrain_handle);
        scheduler.register_subsystem(&intake_handle);

        let enabled = Rc::new(Cell::new(true));
        let flag = enabled.clone();
        scheduler.set_enabled_source(move || flag.get());

        let summary = Rc::new(RefCell::new(EventSummary::default()));
        let counts = summary.clone();
        scheduler.on_event(move |event| {
            let mut counts = counts.borrow_mut();
            match event.kind {
                SchedulerEventKind::Scheduled => counts.scheduled += 1,
                SchedulerEventKind::Executed => counts.executed += 1,
                SchedulerEventKind::Unscheduled { .. } => counts.interrupted += 1,
                SchedulerEventKind::Finished => counts.finished += 1,
            }
        });
        let counts = summary.clone();
        scheduler.on_error(move |_| counts.borrow_mut().errors += 1);

        let drive = drivetrain.clone();
        let idle = FunctionalCommand::new("Idle")
            .on_execute(move || drive.borrow_mut().speed = 0.0)
            .requires(&drivetrain_handle)
            .build();
        scheduler.set_default_command(&drivetrain_handle, &idle)?;

        let roller = intake.clone();
        let hold = FunctionalCommand::new("HoldIntake")
            .on_execute(move || roller.borrow_mut().roller = 0.0)
            .requires(&intake_handle)
            .build();
        scheduler.set_default_command(&intake_handle, &hold)?;

        let sensor = intake.clone();
        Trigger::new(scheduler, move || sensor.borrow().has_piece())
            .on_true(&CommandHandle::new(LogCommand::new("intake: piece acquired")));

        let autonomous = autonomous(&drivetrain, &drivetrain_handle, &intake, &intake_handle)?;
        debug!(command = autonomous.name(), "demo robot built");

        Ok(Self {
            drivetrain,
            intake,
            drivetrain_handle,
            intake_handle,
            autonomous,
            enabled,
            summary,
        })
    }

    pub fn autonomous(&self) -> &CommandHandle {
        &self.autonomous
    }

    pub fn drivetrain(&self) -> std::cell::Ref<'_, Drivetrain> {
        self.drivetrain.borrow()
    }

    pub fn intake(&self) -> std::cell::Ref<'_, Intake> {
        self.intake.borrow()
    }

    pub fn drivetrain_handle(&self) -> &SubsystemHandle {
        &self.drivetrain_handle
    }

    pub fn intake_handle(&self) -> &SubsystemHandle {
        &self.intake_handle
    }

    /// Flip the simulated enable switch.  Takes effect in the next cycle's
    /// mode phase.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn summary(&self) -> EventSummary {
        *self.summary.borrow()
    }
}

fn autonomous(
    drivetrain: &Rc<RefCell<Drivetrain>>,
    drivetrain_handle: &SubsystemHandle,
    intake: &Rc<RefCell<Intake>>,
    intake_handle: &SubsystemHandle,
) -> Result<CommandHandle, SchedulerError> {
    let (drive, stop, odometer) = (drivetrain.clone(), drivetrain.clone(), drivetrain.clone());
    let drive_out = FunctionalCommand::new("DriveOut")
        .on_execute(move || drive.borrow_mut().speed = DRIVE_SPEED)
        .on_end(move |_| stop.borrow_mut().speed = 0.0)
        .finished_when(move || odometer.borrow().distance >= DRIVE_DISTANCE)
        .requires(drivetrain_handle)
        .build();

    let (start, stop, sensor) = (intake.clone(), intake.clone(), intake.clone());
    let collect = FunctionalCommand::new("Collect")
        .on_initialize(move || start.borrow_mut().roller = 1.0)
        .on_end(move |_| stop.borrow_mut().roller = 0.0)
        .finished_when(move || sensor.borrow().has_piece())
        .requires(intake_handle)
        .build()
        .with_timeout(COLLECT_TIMEOUT)?;

    CommandHandle::new(LogCommand::new("autonomous: driving out"))
        .and_then(drive_out)
        .and_then(|seq| seq.and_then(collect))
        .and_then(|seq| seq.and_then(CommandHandle::new(LogCommand::new("autonomous: complete"))))
        .and_then(|seq| seq.with_name("Autonomous"))
}
