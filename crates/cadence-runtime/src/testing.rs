//! Instrumented commands shared by the unit tests of this crate.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use cadence_kernel::{Command, CommandHandle, CommandScheduler, Requirements, SubsystemHandle};
use cadence_types::{CommandError, SchedulerError};

/// Counts every lifecycle call of a [`Probe`] and steers its outcome.
#[derive(Default)]
pub struct ProbeLog {
    initialize: Cell<u32>,
    execute: Cell<u32>,
    end_false: Cell<u32>,
    end_true: Cell<u32>,
    finished: Cell<bool>,
    fail_execute: Cell<bool>,
}

impl ProbeLog {
    pub fn initialize(&self) -> u32 {
        self.initialize.get()
    }
    pub fn execute(&self) -> u32 {
        self.execute.get()
    }
    pub fn end_false(&self) -> u32 {
        self.end_false.get()
    }
    pub fn end_true(&self) -> u32 {
        self.end_true.get()
    }
    pub fn ends(&self) -> u32 {
        self.end_false() + self.end_true()
    }
    /// Make `is_finished()` report `true` from now on.
    pub fn finish(&self) {
        self.finished.set(true);
    }
    pub fn unfinish(&self) {
        self.finished.set(false);
    }
    pub fn fail_execute(&self) {
        self.fail_execute.set(true);
    }
}

pub struct Probe {
    name: String,
    requirements: Requirements,
    log: Rc<ProbeLog>,
}

impl Probe {
    pub fn new(name: &str) -> (Self, Rc<ProbeLog>) {
        let log = Rc::new(ProbeLog::default());
        let probe = Self {
            name: name.to_string(),
            requirements: Requirements::new(),
            log: log.clone(),
        };
        (probe, log)
    }

    pub fn requiring(name: &str, subsystem: &SubsystemHandle) -> (Self, Rc<ProbeLog>) {
        let (mut probe, log) = Self::new(name);
        probe.requirements.insert(subsystem.clone());
        (probe, log)
    }
}

impl Command for Probe {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.log.initialize.set(self.log.initialize.get() + 1);
        Ok(())
    }
    fn execute(&mut self) -> Result<(), CommandError> {
        self.log.execute.set(self.log.execute.get() + 1);
        if self.log.fail_execute.get() {
            return Err(CommandError::failed(format!("{} failed", self.name)));
        }
        Ok(())
    }
    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.log.finished.get())
    }
    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        let counter = if interrupted { &self.log.end_true } else { &self.log.end_false };
        counter.set(counter.get() + 1);
        Ok(())
    }
    fn requirements(&self) -> Requirements {
        self.requirements.clone()
    }
    fn name(&self) -> String {
        self.name.clone()
    }
}

/// A probe wrapped in a handle.
pub fn probe(name: &str) -> (CommandHandle, Rc<ProbeLog>) {
    let (probe, log) = Probe::new(name);
    (CommandHandle::new(probe), log)
}

pub fn probe_requiring(name: &str, subsystem: &SubsystemHandle) -> (CommandHandle, Rc<ProbeLog>) {
    let (probe, log) = Probe::requiring(name, subsystem);
    (CommandHandle::new(probe), log)
}

pub fn collect_errors(scheduler: &CommandScheduler) -> Rc<RefCell<Vec<SchedulerError>>> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    scheduler.on_error(move |e| sink.borrow_mut().push(e.clone()));
    errors
}
