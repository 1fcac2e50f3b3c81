//! Ready-made leaf commands.
//!
//! | Constructor | Finishes |
//! |-------------|----------|
//! | [`FunctionalCommand`] | when its `is_finished` closure says so |
//! | [`instant`] | the cycle it is scheduled |
//! | [`run`] | never |
//! | [`start_end`] | never; runs one closure at start, another at end |
//! | [`WaitCommand`] | after a fixed duration |
//! | [`WaitUntilCommand`] | when a condition becomes true |
//! | [`LogCommand`] | immediately, after logging a message |
//! | [`none`] | immediately, doing nothing |
//! | [`ScheduleCommand`] | immediately, after forking other commands |
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use cadence_kernel::{CommandScheduler, SubsystemHandle};
//! use cadence_runtime::commands::FunctionalCommand;
//!
//! let scheduler = CommandScheduler::new();
//! let intake = SubsystemHandle::named("intake");
//! let spins = Rc::new(Cell::new(0));
//! let counter = spins.clone();
//! let done = spins.clone();
//!
//! let spin = FunctionalCommand::new("spin")
//!     .on_execute(move || counter.set(counter.get() + 1))
//!     .finished_when(move || done.get() >= 3)
//!     .requires(&intake)
//!     .build();
//!
//! scheduler.schedule(&spin);
//! for _ in 0..5 {
//!     scheduler.run();
//! }
//! assert_eq!(spins.get(), 3);
//! assert!(!scheduler.is_scheduled(&spin));
//! ```

use std::time::{Duration, Instant};

use cadence_kernel::{
    Command, CommandHandle, CommandScheduler, Requirements, SubsystemHandle, WeakScheduler,
};
use cadence_types::CommandError;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// FunctionalCommand
// ─────────────────────────────────────────────────────────────────────────────

/// A command assembled from closures.
pub struct FunctionalCommand {
    name: String,
    on_initialize: Box<dyn FnMut()>,
    on_execute: Box<dyn FnMut()>,
    on_end: Box<dyn FnMut(bool)>,
    is_finished: Box<dyn FnMut() -> bool>,
    requirements: Requirements,
    runs_when_disabled: bool,
}

impl FunctionalCommand {
    /// A command that does nothing and never finishes until configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_initialize: Box::new(|| {}),
            on_execute: Box::new(|| {}),
            on_end: Box::new(|_| {}),
            is_finished: Box::new(|| false),
            requirements: Requirements::new(),
            runs_when_disabled: false,
        }
    }

    pub fn on_initialize(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_initialize = Box::new(f);
        self
    }

    pub fn on_execute(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_execute = Box::new(f);
        self
    }

    /// `f` receives the `interrupted` flag.
    pub fn on_end(mut self, f: impl FnMut(bool) + 'static) -> Self {
        self.on_end = Box::new(f);
        self
    }

    pub fn finished_when(mut self, f: impl FnMut() -> bool + 'static) -> Self {
        self.is_finished = Box::new(f);
        self
    }

    pub fn requires(mut self, subsystem: &SubsystemHandle) -> Self {
        self.requirements.insert(subsystem.clone());
        self
    }

    pub fn requiring(mut self, requirements: &Requirements) -> Self {
        self.requirements.extend_from(requirements);
        self
    }

    pub fn runs_when_disabled(mut self, yes: bool) -> Self {
        self.runs_when_disabled = yes;
        self
    }

    pub fn build(self) -> CommandHandle {
        CommandHandle::new(self)
    }
}

impl Command for FunctionalCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        (self.on_initialize)();
        Ok(())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        (self.on_execute)();
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok((self.is_finished)())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        (self.on_end)(interrupted);
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        self.requirements.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn runs_when_disabled(&self) -> bool {
        self.runs_when_disabled
    }
}

/// Run `action` once at initialize and finish the same cycle.
pub fn instant(action: impl FnMut() + 'static, requirements: &Requirements) -> CommandHandle {
    FunctionalCommand::new("InstantCommand")
        .on_initialize(action)
        .finished_when(|| true)
        .requiring(requirements)
        .build()
}

/// Run `action` every cycle until interrupted.
pub fn run(action: impl FnMut() + 'static, requirements: &Requirements) -> CommandHandle {
    FunctionalCommand::new("RunCommand")
        .on_execute(action)
        .requiring(requirements)
        .build()
}

/// Run `start` at initialize and `end` at retirement; never finishes on its
/// own.
pub fn start_end(
    start: impl FnMut() + 'static,
    mut end: impl FnMut() + 'static,
    requirements: &Requirements,
) -> CommandHandle {
    FunctionalCommand::new("StartEndCommand")
        .on_initialize(start)
        .on_end(move |_| end())
        .requiring(requirements)
        .build()
}

/// Do nothing and finish immediately.  Runs when disabled.
pub fn none() -> CommandHandle {
    FunctionalCommand::new("NoneCommand")
        .finished_when(|| true)
        .runs_when_disabled(true)
        .build()
}

// ─────────────────────────────────────────────────────────────────────────────
// WaitCommand / WaitUntilCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Finishes once `duration` has elapsed since initialize.  Runs when
/// disabled.
pub struct WaitCommand {
    duration: Duration,
    started: Option<Instant>,
}

impl WaitCommand {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: None,
        }
    }
}

impl Command for WaitCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.started = Some(Instant::now());
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.started.is_some_and(|t| t.elapsed() >= self.duration))
    }

    fn end(&mut self, _interrupted: bool) -> Result<(), CommandError> {
        self.started = None;
        Ok(())
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}

/// Finishes the first cycle `condition` is true.
pub struct WaitUntilCommand {
    condition: Box<dyn FnMut() -> bool>,
}

impl WaitUntilCommand {
    pub fn new(condition: impl FnMut() -> bool + 'static) -> Self {
        Self {
            condition: Box::new(condition),
        }
    }
}

impl Command for WaitUntilCommand {
    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok((self.condition)())
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LogCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Logs `message` at `info` level on initialize and finishes.  Runs when
/// disabled.
pub struct LogCommand {
    message: String,
}

impl LogCommand {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Command for LogCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        info!(target: "cadence::log_command", "{}", self.message);
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(true)
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScheduleCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Schedules other commands through the scheduler and finishes immediately.
///
/// The forked commands are independent: they are not composed, and they keep
/// running after this command has finished or been interrupted.  Requires
/// nothing and runs when disabled.
pub struct ScheduleCommand {
    scheduler: WeakScheduler,
    commands: Vec<CommandHandle>,
}

impl ScheduleCommand {
    pub fn new(scheduler: &CommandScheduler, commands: Vec<CommandHandle>) -> Self {
        Self {
            scheduler: scheduler.downgrade(),
            commands,
        }
    }
}

impl Command for ScheduleCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        let scheduler = self
            .scheduler
            .upgrade()
            .ok_or_else(|| CommandError::failed("scheduler dropped before ScheduleCommand ran"))?;
        scheduler.schedule_all(&self.commands);
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(true)
    }

    fn runs_when_disabled(&self) -> bool {
        true
    }
}
