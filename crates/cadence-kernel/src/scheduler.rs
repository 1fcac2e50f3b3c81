//! [`CommandScheduler`] – admission, arbitration and the per-cycle run loop.
//!
//! One call to [`CommandScheduler::run`] performs, strictly in order:
//!
//! | # | Phase | What happens |
//! |---|-------|--------------|
//! | 0 | mode | sample the enabled source; on a transition to disabled interrupt every command that does not run disabled |
//! | 1 | poll triggers | sample every binding, fire its action with the detected [`Edge`][crate::Edge] |
//! | 2 | execute | `execute()` every live command |
//! | 3 | retire | `is_finished()` every live command; `end(false)` and release the finished ones |
//! | 4 | defaults | admit the default command of every unowned subsystem |
//! | 5 | periodic | `periodic()` every registered subsystem |
//! | 6 | apply pending | admit / cancel, in call order, everything requested from inside a callback |
//!
//! # Re-entrancy
//!
//! The live state is never borrowed while user code runs.  Each phase walks a
//! snapshot, and any [`schedule`][CommandScheduler::schedule] or
//! [`cancel`][CommandScheduler::cancel] issued from inside a callback (trigger
//! action, command lifecycle, observer, periodic hook) lands in the pending
//! buffer and is applied in phase 6.  Calls made between cycles take effect
//! immediately, and so does anything their callbacks request in turn.
//!
//! # Error containment
//!
//! A failing callback is reported as a [`SchedulerError::CallbackFailure`]
//! to the `tracing` log and every registered error sink.  The command is then
//! retired with a single `end(true)`; a second failure there is
//! suppressed.  `run()` itself never fails.
//!
//! # Example
//!
//! ```
//! use cadence_kernel::{Command, CommandHandle, CommandScheduler, Requirements, SubsystemHandle};
//! use cadence_types::CommandError;
//!
//! struct Nudge { arm: SubsystemHandle, cycles: u32 }
//!
//! impl Command for Nudge {
//!     fn execute(&mut self) -> Result<(), CommandError> { self.cycles += 1; Ok(()) }
//!     fn is_finished(&mut self) -> Result<bool, CommandError> { Ok(self.cycles == 2) }
//!     fn requirements(&self) -> Requirements { Requirements::of([self.arm.clone()]) }
//! }
//!
//! let scheduler = CommandScheduler::new();
//! let arm = SubsystemHandle::named("arm");
//! scheduler.register_subsystem(&arm);
//!
//! let nudge = CommandHandle::new(Nudge { arm: arm.clone(), cycles: 0 });
//! scheduler.schedule(&nudge);
//! assert_eq!(scheduler.requiring(&arm), Some(nudge.clone()));
//!
//! scheduler.run();
//! scheduler.run();
//! assert!(!scheduler.is_scheduled(&nudge));
//! assert_eq!(scheduler.requiring(&arm), None);
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

use cadence_types::{
    CommandError, CommandId, CommandPhase, InterruptionBehavior, SchedulerConfig, SchedulerError,
    SchedulerEvent, SchedulerEventKind,
};
use tracing::{debug, error, instrument, trace, warn};

use crate::command::CommandHandle;
use crate::guard::guarded;
use crate::requirements::{RequirementLedger, Requirements};
use crate::subsystem::SubsystemHandle;
use crate::trigger::TriggerBinding;
use crate::watchdog::CycleWatchdog;

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

type EventObserver = Rc<RefCell<dyn FnMut(&SchedulerEvent)>>;
type ErrorSink = Rc<RefCell<dyn FnMut(&SchedulerError)>>;
type EnabledSource = Rc<dyn Fn() -> bool>;

enum PendingRequest {
    Schedule(CommandHandle),
    Cancel(CommandHandle),
}

/// How a scheduled command leaves the live set.
#[derive(Clone, Copy)]
enum Retirement {
    Finished,
    Interrupted(Option<CommandId>),
    /// A callback failed; `end(true)` is attempted once and its own failure
    /// is suppressed.
    Failed,
}

struct RegisteredSubsystem {
    handle: SubsystemHandle,
    default_command: Option<CommandHandle>,
}

struct SchedulerState {
    config: SchedulerConfig,
    /// Live scheduled commands, in admission order.
    scheduled: Vec<CommandHandle>,
    /// Requirement snapshot taken at admission, per scheduled command.
    snapshots: HashMap<CommandId, Requirements>,
    ledger: RequirementLedger,
    subsystems: Vec<RegisteredSubsystem>,
    bindings: Vec<TriggerBinding>,
    bindings_cleared: bool,
    pending: VecDeque<PendingRequest>,
    in_run_loop: bool,
    /// Depth of user callbacks currently on the stack.
    dispatch_depth: usize,
    enabled_source: Option<EnabledSource>,
    was_enabled: bool,
    suspended: bool,
    observers: Vec<EventObserver>,
    error_sinks: Vec<ErrorSink>,
    watchdog: CycleWatchdog,
    cycle: u64,
}

impl SchedulerState {
    fn new(config: SchedulerConfig) -> Self {
        let watchdog = CycleWatchdog::new(config.period());
        Self {
            config,
            scheduled: Vec::new(),
            snapshots: HashMap::new(),
            ledger: RequirementLedger::new(),
            subsystems: Vec::new(),
            bindings: Vec::new(),
            bindings_cleared: false,
            pending: VecDeque::new(),
            in_run_loop: false,
            dispatch_depth: 0,
            enabled_source: None,
            was_enabled: true,
            suspended: false,
            observers: Vec::new(),
            error_sinks: Vec::new(),
            watchdog,
            cycle: 0,
        }
    }

    fn defers_mutation(&self) -> bool {
        self.in_run_loop || self.dispatch_depth > 0
    }

    fn subsystem_mut(&mut self, subsystem: &SubsystemHandle) -> Option<&mut RegisteredSubsystem> {
        self.subsystems.iter_mut().find(|r| r.handle == *subsystem)
    }
}

thread_local! {
    static INSTANCE: RefCell<Option<CommandScheduler>> = const { RefCell::new(None) };
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// The command scheduler.  Cloning yields another handle to the same
/// scheduler.
///
/// Most robot programs use the per-thread [`instance`][Self::instance];
/// tests build isolated schedulers with [`new`][Self::new].
#[derive(Clone)]
pub struct CommandScheduler {
    state: Rc<RefCell<SchedulerState>>,
}

/// Non-owning handle to a [`CommandScheduler`], held by trigger bindings so
/// that the scheduler and its bindings do not keep each other alive.
#[derive(Clone)]
pub struct WeakScheduler {
    state: Weak<RefCell<SchedulerState>>,
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<CommandScheduler> {
        self.state.upgrade().map(|state| CommandScheduler { state })
    }
}

/// Marks the scheduler as "inside user code" for as long as it lives.
struct Dispatch<'a> {
    scheduler: &'a CommandScheduler,
}

impl Drop for Dispatch<'_> {
    fn drop(&mut self) {
        self.scheduler.state.borrow_mut().dispatch_depth -= 1;
    }
}

impl Default for CommandScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandScheduler {
    /// An isolated scheduler with the default [`SchedulerConfig`].
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(SchedulerState::new(config))),
        }
    }

    /// The scheduler shared by everything on the current thread, created on
    /// first use.
    pub fn instance() -> Self {
        INSTANCE.with(|cell| cell.borrow_mut().get_or_insert_with(Self::new).clone())
    }

    /// Drop the shared instance; the next [`instance`][Self::instance] call
    /// builds a fresh one.  Existing clones of the old instance keep working.
    pub fn reset_instance() {
        let old = INSTANCE.with(|cell| cell.borrow_mut().take());
        drop(old);
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            state: Rc::downgrade(&self.state),
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.state.borrow().config.clone()
    }

    /// Number of completed [`run`][Self::run] calls.
    pub fn cycle(&self) -> u64 {
        self.state.borrow().cycle
    }

    // ── Subsystems ──────────────────────────────────────────────────────────

    /// Register `subsystem` so its periodic hook runs and its default
    /// command is arbitrated.  Registering twice is a no-op.
    pub fn register_subsystem(&self, subsystem: &SubsystemHandle) {
        let mut state = self.state.borrow_mut();
        if state.subsystems.iter().any(|r| r.handle == *subsystem) {
            return;
        }
        debug!(subsystem = subsystem.name(), "subsystem registered");
        state.subsystems.push(RegisteredSubsystem {
            handle: subsystem.clone(),
            default_command: None,
        });
    }

    /// Stop running `subsystem`'s periodic hook and forget its default
    /// command.  A command currently requiring it keeps running.
    pub fn unregister_subsystem(&self, subsystem: &SubsystemHandle) {
        self.state
            .borrow_mut()
            .subsystems
            .retain(|r| r.handle != *subsystem);
    }

    /// The registered subsystem called `name`, if any.
    pub fn subsystem(&self, name: &str) -> Option<SubsystemHandle> {
        self.state
            .borrow()
            .subsystems
            .iter()
            .find(|r| r.handle.name() == name)
            .map(|r| r.handle.clone())
    }

    /// Resolve subsystem names into a requirement set.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::NullRequirement`] for the first name that does not
    /// match a registered subsystem.
    pub fn resolve_requirements(&self, names: &[&str]) -> Result<Requirements, SchedulerError> {
        let mut reqs = Requirements::new();
        for name in names {
            let subsystem = self
                .subsystem(name)
                .ok_or_else(|| SchedulerError::NullRequirement(name.to_string()))?;
            reqs.insert(subsystem);
        }
        Ok(reqs)
    }

    /// Install `command` as the default of `subsystem`, registering the
    /// subsystem if needed.  It is scheduled in the defaults phase of the
    /// next cycle in which the subsystem is unowned.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::CompositionViolation`] – `command` belongs to a
    ///   composition.
    /// - [`SchedulerError::InvalidDefaultCommand`] – `command` does not
    ///   require exactly `subsystem`, or is
    ///   [`CancelIncoming`][InterruptionBehavior::CancelIncoming].
    pub fn set_default_command(
        &self,
        subsystem: &SubsystemHandle,
        command: &CommandHandle,
    ) -> Result<(), SchedulerError> {
        if command.is_composed() {
            return Err(SchedulerError::CompositionViolation {
                command: command.name().to_string(),
                reason: "composed commands cannot be default commands".to_string(),
            });
        }
        let reqs = command.requirements();
        if reqs.len() != 1 || !reqs.contains(subsystem) {
            return Err(SchedulerError::InvalidDefaultCommand {
                subsystem: subsystem.name().to_string(),
                reason: format!(
                    "`{}` must require exactly this subsystem, requires {:?}",
                    command.name(),
                    reqs.names()
                ),
            });
        }
        if command.interruption_behavior() == InterruptionBehavior::CancelIncoming {
            return Err(SchedulerError::InvalidDefaultCommand {
                subsystem: subsystem.name().to_string(),
                reason: format!("`{}` must be interruptible", command.name()),
            });
        }

        self.register_subsystem(subsystem);
        let mut state = self.state.borrow_mut();
        if let Some(entry) = state.subsystem_mut(subsystem) {
            entry.default_command = Some(command.clone());
        }
        debug!(subsystem = subsystem.name(), command = command.name(), "default command set");
        Ok(())
    }

    /// Forget the default command of `subsystem`.  A running instance is not
    /// cancelled.
    pub fn remove_default_command(&self, subsystem: &SubsystemHandle) {
        if let Some(entry) = self.state.borrow_mut().subsystem_mut(subsystem) {
            entry.default_command = None;
        }
    }

    pub fn default_command(&self, subsystem: &SubsystemHandle) -> Option<CommandHandle> {
        self.state
            .borrow()
            .subsystems
            .iter()
            .find(|r| r.handle == *subsystem)
            .and_then(|r| r.default_command.clone())
    }

    /// The scheduled command currently holding `subsystem`.
    pub fn requiring(&self, subsystem: &SubsystemHandle) -> Option<CommandHandle> {
        self.state.borrow().ledger.owner(subsystem.id()).cloned()
    }

    // ── Scheduling ──────────────────────────────────────────────────────────

    /// Request admission of `command`.
    ///
    /// Outside callbacks the admission algorithm runs now and `initialize()`
    /// is called before this returns, along with any requests issued from the
    /// callbacks it triggered.  From inside a callback the request is buffered
    /// until the end of the current cycle.
    pub fn schedule(&self, command: &CommandHandle) {
        if command.is_composed() {
            self.report(composition_violation(command, "cannot be scheduled independently"));
            return;
        }
        if self.defer(|| PendingRequest::Schedule(command.clone())) {
            trace!(command = command.name(), "schedule deferred");
            return;
        }
        self.admit(command);
        self.apply_pending();
    }

    /// Schedule each command in order.
    pub fn schedule_all(&self, commands: &[CommandHandle]) {
        for command in commands {
            self.schedule(command);
        }
    }

    /// Interrupt `command` if it is scheduled.  Buffered like
    /// [`schedule`][Self::schedule] when called from a callback.
    pub fn cancel(&self, command: &CommandHandle) {
        if command.is_composed() {
            self.report(composition_violation(command, "cannot be cancelled independently"));
            return;
        }
        if self.defer(|| PendingRequest::Cancel(command.clone())) {
            trace!(command = command.name(), "cancel deferred");
            return;
        }
        self.retire(command, Retirement::Interrupted(None));
        self.apply_pending();
    }

    /// Cancel every scheduled command.
    pub fn cancel_all(&self) {
        for command in self.scheduled_commands() {
            self.cancel(&command);
        }
    }

    pub fn is_scheduled(&self, command: &CommandHandle) -> bool {
        self.state.borrow().snapshots.contains_key(&command.id())
    }

    pub fn is_composed(&self, command: &CommandHandle) -> bool {
        command.is_composed()
    }

    /// The requirement snapshot taken when `command` was admitted.
    pub fn requirements(&self, command: &CommandHandle) -> Option<Requirements> {
        self.state.borrow().snapshots.get(&command.id()).cloned()
    }

    /// Scheduled commands, in admission order.
    pub fn scheduled_commands(&self) -> Vec<CommandHandle> {
        self.state.borrow().scheduled.clone()
    }

    // ── Mode ────────────────────────────────────────────────────────────────

    /// Install the robot's enabled/disabled signal.  Without one the robot
    /// counts as always enabled.
    pub fn set_enabled_source(&self, source: impl Fn() -> bool + 'static) {
        self.state.borrow_mut().enabled_source = Some(Rc::new(source));
    }

    /// Sample the enabled source.  A source that panics is reported as a
    /// [`SchedulerError::CallbackFailure`] and the last sampled mode is
    /// kept.
    pub fn is_enabled(&self) -> bool {
        let (source, last) = {
            let state = self.state.borrow();
            (state.enabled_source.clone(), state.was_enabled)
        };
        let Some(source) = source else {
            return true;
        };
        match guarded(|| Ok(source())) {
            Ok(enabled) => enabled,
            Err(source) => {
                self.report(SchedulerError::CallbackFailure {
                    command: "enabled source".to_string(),
                    phase: CommandPhase::Mode,
                    source,
                });
                last
            }
        }
    }

    /// Freeze the scheduler: `run()` and admissions become no-ops until
    /// [`resume`][Self::resume].  Scheduled commands stay scheduled.
    pub fn suspend(&self) {
        self.state.borrow_mut().suspended = true;
    }

    pub fn resume(&self) {
        self.state.borrow_mut().suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.state.borrow().suspended
    }

    // ── Trigger bindings ────────────────────────────────────────────────────

    pub(crate) fn add_binding(&self, binding: TriggerBinding) {
        self.state.borrow_mut().bindings.push(binding);
    }

    /// Drop every trigger binding.
    pub fn clear_bindings(&self) {
        let mut state = self.state.borrow_mut();
        state.bindings.clear();
        state.bindings_cleared = true;
    }

    pub fn binding_count(&self) -> usize {
        self.state.borrow().bindings.len()
    }

    // ── Observers ───────────────────────────────────────────────────────────

    /// Observe every lifecycle event.
    pub fn on_event(&self, observer: impl FnMut(&SchedulerEvent) + 'static) {
        self.state
            .borrow_mut()
            .observers
            .push(Rc::new(RefCell::new(observer)));
    }

    /// Called once per admission, after `initialize()`.
    pub fn on_schedule(&self, mut observer: impl FnMut(&SchedulerEvent) + 'static) {
        self.on_event(move |event| {
            if event.kind == SchedulerEventKind::Scheduled {
                observer(event);
            }
        });
    }

    /// Called after every successful `execute()`.
    pub fn on_execute(&self, mut observer: impl FnMut(&SchedulerEvent) + 'static) {
        self.on_event(move |event| {
            if event.kind == SchedulerEventKind::Executed {
                observer(event);
            }
        });
    }

    /// Called once per interruption, after `end(true)`.
    pub fn on_unschedule(&self, mut observer: impl FnMut(&SchedulerEvent) + 'static) {
        self.on_event(move |event| {
            if matches!(event.kind, SchedulerEventKind::Unscheduled { .. }) {
                observer(event);
            }
        });
    }

    /// Called once per normal finish, after `end(false)`.
    pub fn on_finish(&self, mut observer: impl FnMut(&SchedulerEvent) + 'static) {
        self.on_event(move |event| {
            if event.kind == SchedulerEventKind::Finished {
                observer(event);
            }
        });
    }

    /// Receive every reported [`SchedulerError`].
    pub fn on_error(&self, sink: impl FnMut(&SchedulerError) + 'static) {
        self.state
            .borrow_mut()
            .error_sinks
            .push(Rc::new(RefCell::new(sink)));
    }

    // ── Run loop ────────────────────────────────────────────────────────────

    /// Run one scheduler cycle.  See the [module docs](self) for the phases.
    #[instrument(level = "trace", skip_all)]
    pub fn run(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.suspended {
                return;
            }
            if state.in_run_loop {
                warn!("run() called from inside a scheduler callback; ignored");
                return;
            }
            state.in_run_loop = true;
            state.watchdog.reset();
        }

        self.sample_mode();
        self.epoch("mode");

        self.poll_triggers();
        self.epoch("poll_triggers");

        let live = self.scheduled_commands();
        let mut failed = Vec::new();
        for command in &live {
            if !self.is_scheduled(command) {
                continue;
            }
            let result = {
                let _dispatch = self.dispatch();
                command.execute()
            };
            match result {
                Ok(()) => self.emit(command, SchedulerEventKind::Executed),
                Err(source) => {
                    self.report_callback(command, CommandPhase::Execute, source);
                    failed.push(command.clone());
                }
            }
        }
        for command in &failed {
            self.retire(command, Retirement::Failed);
        }
        self.epoch("execute");

        for command in &live {
            if !self.is_scheduled(command) {
                continue;
            }
            let result = {
                let _dispatch = self.dispatch();
                command.is_finished()
            };
            match result {
                Ok(true) => self.retire(command, Retirement::Finished),
                Ok(false) => {}
                Err(source) => {
                    self.report_callback(command, CommandPhase::IsFinished, source);
                    self.retire(command, Retirement::Failed);
                }
            }
        }
        self.epoch("retire");

        self.schedule_defaults();
        self.epoch("defaults");

        self.run_periodic();
        self.epoch("periodic");

        self.state.borrow_mut().in_run_loop = false;
        self.apply_pending();
        self.epoch("apply_pending");

        let mut state = self.state.borrow_mut();
        state.cycle += 1;
        if state.config.report_overruns && state.watchdog.is_expired() {
            warn!(
                cycle = state.cycle,
                elapsed_ms = state.watchdog.elapsed().as_secs_f64() * 1e3,
                period_ms = state.config.period_ms,
                epochs = %state.watchdog.report(),
                "scheduler cycle overrun"
            );
        }
    }

    // ── Internals ───────────────────────────────────────────────────────────

    fn dispatch(&self) -> Dispatch<'_> {
        self.state.borrow_mut().dispatch_depth += 1;
        Dispatch { scheduler: self }
    }

    fn epoch(&self, name: &'static str) {
        self.state.borrow_mut().watchdog.add_epoch(name);
    }

    /// Buffer the request when mutation must be deferred.  Returns whether
    /// it was buffered.
    fn defer(&self, request: impl FnOnce() -> PendingRequest) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.defers_mutation() {
            return false;
        }
        state.pending.push_back(request());
        true
    }

    /// The admission algorithm.  Never called with the state borrowed.
    fn admit(&self, command: &CommandHandle) {
        if command.is_composed() {
            self.report(composition_violation(command, "cannot be scheduled independently"));
            return;
        }
        let (suspended, already_scheduled) = {
            let state = self.state.borrow();
            (state.suspended, state.snapshots.contains_key(&command.id()))
        };
        if suspended || already_scheduled {
            return;
        }
        if !command.runs_when_disabled() && !self.is_enabled() {
            debug!(command = command.name(), "admission rejected: robot disabled");
            return;
        }

        let conflicts = self.state.borrow().ledger.conflicts(command.requirements());
        if let Some(blocker) = conflicts
            .iter()
            .find(|c| c.interruption_behavior() == InterruptionBehavior::CancelIncoming)
        {
            debug!(
                command = command.name(),
                blocker = blocker.name(),
                "admission rejected: requirement held by a non-interruptible command"
            );
            return;
        }
        for conflict in &conflicts {
            self.retire(conflict, Retirement::Interrupted(Some(command.id())));
        }

        {
            let mut state = self.state.borrow_mut();
            let reqs = command.requirements().clone();
            state.ledger.claim(command, &reqs);
            state.snapshots.insert(command.id(), reqs);
            state.scheduled.push(command.clone());
        }
        command.set_scheduled(true);

        let result = {
            let _dispatch = self.dispatch();
            command.initialize()
        };
        match result {
            Ok(()) => {
                debug!(command = command.name(), requirements = ?command.requirements().names(), "command scheduled");
                self.emit(command, SchedulerEventKind::Scheduled);
            }
            Err(source) => {
                self.report_callback(command, CommandPhase::Initialize, source);
                self.retire(command, Retirement::Failed);
            }
        }
    }

    /// Call `end`, release requirements and notify observers.  No-op for
    /// commands that are not scheduled.
    fn retire(&self, command: &CommandHandle, how: Retirement) {
        if !self.is_scheduled(command) {
            return;
        }
        let interrupted = !matches!(how, Retirement::Finished);
        let result = {
            let _dispatch = self.dispatch();
            command.end(interrupted)
        };
        if let Err(source) = result {
            match how {
                Retirement::Failed => {
                    debug!(command = command.name(), error = %source, "suppressed failure in end(true) after a callback failure");
                }
                _ => self.report_callback(command, CommandPhase::End, source),
            }
        }

        {
            let mut state = self.state.borrow_mut();
            state.scheduled.retain(|c| c != command);
            state.snapshots.remove(&command.id());
            state.ledger.release(command);
        }
        command.set_scheduled(false);

        match how {
            Retirement::Finished => {
                debug!(command = command.name(), "command finished");
                self.emit(command, SchedulerEventKind::Finished);
            }
            Retirement::Interrupted(interruptor) => {
                debug!(command = command.name(), "command interrupted");
                self.emit(command, SchedulerEventKind::Unscheduled { interruptor });
            }
            Retirement::Failed => {
                self.emit(command, SchedulerEventKind::Unscheduled { interruptor: None });
            }
        }
    }

    fn sample_mode(&self) {
        let enabled = self.is_enabled();
        let was_enabled = std::mem::replace(&mut self.state.borrow_mut().was_enabled, enabled);
        if was_enabled && !enabled {
            debug!("robot disabled; interrupting commands that do not run when disabled");
            let victims: Vec<CommandHandle> = self
                .scheduled_commands()
                .into_iter()
                .filter(|c| !c.runs_when_disabled())
                .collect();
            for command in &victims {
                self.retire(command, Retirement::Interrupted(None));
            }
        }
    }

    fn poll_triggers(&self) {
        let mut bindings = {
            let mut state = self.state.borrow_mut();
            state.bindings_cleared = false;
            std::mem::take(&mut state.bindings)
        };
        for binding in bindings.iter_mut() {
            if let Err(error) = binding.poll() {
                self.report(error);
            }
        }
        let mut state = self.state.borrow_mut();
        let added = std::mem::take(&mut state.bindings);
        if state.bindings_cleared {
            state.bindings = added;
        } else {
            bindings.extend(added);
            state.bindings = bindings;
        }
    }

    fn schedule_defaults(&self) {
        let candidates: Vec<CommandHandle> = {
            let state = self.state.borrow();
            state
                .subsystems
                .iter()
                .filter(|r| state.ledger.is_free(r.handle.id()))
                .filter_map(|r| r.default_command.clone())
                .collect()
        };
        for command in &candidates {
            self.admit(command);
        }
    }

    fn run_periodic(&self) {
        let subsystems: Vec<SubsystemHandle> = self
            .state
            .borrow()
            .subsystems
            .iter()
            .map(|r| r.handle.clone())
            .collect();
        for subsystem in &subsystems {
            let result = {
                let _dispatch = self.dispatch();
                subsystem.periodic()
            };
            if let Err(source) = result {
                self.report(SchedulerError::CallbackFailure {
                    command: subsystem.name().to_string(),
                    phase: CommandPhase::Periodic,
                    source,
                });
            }
        }
    }

    fn apply_pending(&self) {
        let max_passes = self.state.borrow().config.max_pending_passes.max(1);
        for _ in 0..max_passes {
            let batch: Vec<PendingRequest> = self.state.borrow_mut().pending.drain(..).collect();
            if batch.is_empty() {
                return;
            }
            for request in batch {
                match request {
                    PendingRequest::Schedule(command) => self.admit(&command),
                    PendingRequest::Cancel(command) => {
                        self.retire(&command, Retirement::Interrupted(None))
                    }
                }
            }
        }
        let remaining = self.state.borrow().pending.len();
        if remaining > 0 {
            warn!(remaining, "pending requests keep re-queueing; deferring the rest to the next cycle");
        }
    }

    fn emit(&self, command: &CommandHandle, kind: SchedulerEventKind) {
        let observers = self.state.borrow().observers.clone();
        if observers.is_empty() {
            return;
        }
        let event = SchedulerEvent::new(command.id(), command.name(), kind);
        let _dispatch = self.dispatch();
        for observer in &observers {
            let Ok(mut observer) = observer.try_borrow_mut() else {
                continue;
            };
            let result = guarded(|| {
                (&mut *observer)(&event);
                Ok(())
            });
            if let Err(source) = result {
                warn!(command = command.name(), error = %source, "scheduler observer failed");
            }
        }
    }

    fn report_callback(&self, command: &CommandHandle, phase: CommandPhase, source: CommandError) {
        self.report(SchedulerError::CallbackFailure {
            command: command.name().to_string(),
            phase,
            source,
        });
    }

    fn report(&self, err: SchedulerError) {
        match &err {
            SchedulerError::CompositionViolation { .. } => warn!(error = %err, "scheduler request rejected"),
            SchedulerError::CallbackFailure { command, phase, source } => {
                error!(command = %command, phase = %phase, error = %source, "command callback failed")
            }
            _ => error!(error = %err, "scheduler error"),
        }
        let sinks = self.state.borrow().error_sinks.clone();
        for sink in &sinks {
            let Ok(mut sink) = sink.try_borrow_mut() else {
                continue;
            };
            let result = guarded(|| {
                (&mut *sink)(&err);
                Ok(())
            });
            if let Err(source) = result {
                warn!(error = %source, "scheduler error sink failed");
            }
        }
    }
}

fn composition_violation(command: &CommandHandle, what: &str) -> SchedulerError {
    SchedulerError::CompositionViolation {
        command: command.name().to_string(),
        reason: format!("composed commands {what}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::trigger::Trigger;
    use std::cell::Cell;

    // ── Probe command ────────────────────────────────────────────────────────

    /// Shared record of a probe's lifecycle calls.
    #[derive(Default)]
    struct Calls {
        initialize: Cell<u32>,
        execute: Cell<u32>,
        is_finished: Cell<u32>,
        end_false: Cell<u32>,
        end_true: Cell<u32>,
        finished: Cell<bool>,
        fail_in: Cell<Option<CommandPhase>>,
    }

    impl Calls {
        fn bump(cell: &Cell<u32>) {
            cell.set(cell.get() + 1);
        }

        fn ends(&self) -> u32 {
            self.end_false.get() + self.end_true.get()
        }

        fn fail(&self, phase: CommandPhase) -> Result<(), CommandError> {
            if self.fail_in.get() == Some(phase) {
                return Err(CommandError::failed(format!("injected {phase} failure")));
            }
            Ok(())
        }
    }

    struct Probe {
        name: String,
        calls: Rc<Calls>,
        requirements: Requirements,
        behavior: InterruptionBehavior,
        runs_when_disabled: bool,
    }

    impl Command for Probe {
        fn initialize(&mut self) -> Result<(), CommandError> {
            Calls::bump(&self.calls.initialize);
            self.calls.fail(CommandPhase::Initialize)
        }
        fn execute(&mut self) -> Result<(), CommandError> {
            Calls::bump(&self.calls.execute);
            self.calls.fail(CommandPhase::Execute)
        }
        fn is_finished(&mut self) -> Result<bool, CommandError> {
            Calls::bump(&self.calls.is_finished);
            self.calls.fail(CommandPhase::IsFinished)?;
            Ok(self.calls.finished.get())
        }
        fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
            if interrupted {
                Calls::bump(&self.calls.end_true);
            } else {
                Calls::bump(&self.calls.end_false);
            }
            self.calls.fail(CommandPhase::End)
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
        fn interruption_behavior(&self) -> InterruptionBehavior {
            self.behavior
        }
    }

    struct ProbeBuilder {
        probe: Probe,
    }

    impl ProbeBuilder {
        fn requiring(mut self, subsystem: &SubsystemHandle) -> Self {
            self.probe.requirements.insert(subsystem.clone());
            self
        }
        fn cancel_incoming(mut self) -> Self {
            self.probe.behavior = InterruptionBehavior::CancelIncoming;
            self
        }
        fn runs_when_disabled(mut self) -> Self {
            self.probe.runs_when_disabled = true;
            self
        }
        fn build(self) -> (CommandHandle, Rc<Calls>) {
            let calls = self.probe.calls.clone();
            (CommandHandle::new(self.probe), calls)
        }
    }

    fn probe(name: &str) -> ProbeBuilder {
        ProbeBuilder {
            probe: Probe {
                name: name.to_string(),
                calls: Rc::new(Calls::default()),
                requirements: Requirements::new(),
                behavior: InterruptionBehavior::CancelSelf,
                runs_when_disabled: false,
            },
        }
    }

    fn collect_errors(scheduler: &CommandScheduler) -> Rc<RefCell<Vec<SchedulerError>>> {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = errors.clone();
        scheduler.on_error(move |e| sink.borrow_mut().push(e.clone()));
        errors
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    #[test]
    fn schedule_initializes_immediately_and_runs_each_cycle() {
        let scheduler = CommandScheduler::new();
        let (cmd, calls) = probe("a").build();

        scheduler.schedule(&cmd);
        assert!(scheduler.is_scheduled(&cmd));
        assert_eq!(calls.initialize.get(), 1);
        assert_eq!(calls.execute.get(), 0);

        scheduler.run();
        scheduler.run();
        assert_eq!(calls.execute.get(), 2);
        assert_eq!(calls.is_finished.get(), 2);

        calls.finished.set(true);
        scheduler.run();
        assert!(!scheduler.is_scheduled(&cmd));
        assert_eq!(calls.execute.get(), 3);
        assert_eq!(calls.end_false.get(), 1);
        assert_eq!(calls.end_true.get(), 0);
        assert_eq!(calls.initialize.get(), 1);
    }

    #[test]
    fn schedule_twice_is_noop() {
        let scheduler = CommandScheduler::new();
        let (cmd, calls) = probe("a").build();
        scheduler.schedule(&cmd);
        scheduler.schedule(&cmd);
        assert_eq!(calls.initialize.get(), 1);
        assert_eq!(scheduler.scheduled_commands().len(), 1);
    }

    #[test]
    fn cancel_unscheduled_is_noop() {
        let scheduler = CommandScheduler::new();
        let (cmd, calls) = probe("a").build();
        scheduler.cancel(&cmd);
        assert_eq!(calls.ends(), 0);

        scheduler.schedule(&cmd);
        scheduler.cancel(&cmd);
        scheduler.cancel(&cmd);
        assert_eq!(calls.end_true.get(), 1);
        assert!(!scheduler.is_scheduled(&cmd));
    }

    #[test]
    fn cancel_all_interrupts_everything() {
        let scheduler = CommandScheduler::new();
        let (a, a_calls) = probe("a").build();
        let (b, b_calls) = probe("b").build();
        scheduler.schedule_all(&[a, b]);
        scheduler.cancel_all();
        assert!(scheduler.scheduled_commands().is_empty());
        assert_eq!(a_calls.end_true.get(), 1);
        assert_eq!(b_calls.end_true.get(), 1);
    }

    // ── Arbitration ──────────────────────────────────────────────────────────

    #[test]
    fn conflicting_schedule_interrupts_cancel_self_holder() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let (a, a_calls) = probe("a").requiring(&arm).build();
        let (b, b_calls) = probe("b").requiring(&arm).build();

        let interruptors = Rc::new(RefCell::new(Vec::new()));
        let seen = interruptors.clone();
        scheduler.on_unschedule(move |e| {
            if let SchedulerEventKind::Unscheduled { interruptor } = e.kind {
                seen.borrow_mut().push((e.command, interruptor));
            }
        });

        scheduler.schedule(&a);
        scheduler.schedule(&b);

        assert!(!scheduler.is_scheduled(&a));
        assert!(scheduler.is_scheduled(&b));
        assert_eq!(a_calls.end_true.get(), 1);
        assert_eq!(b_calls.initialize.get(), 1);
        assert_eq!(scheduler.requiring(&arm), Some(b.clone()));
        assert_eq!(*interruptors.borrow(), vec![(a.id(), Some(b.id()))]);
    }

    #[test]
    fn cancel_incoming_holder_blocks_admission_all_or_nothing() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let drive = SubsystemHandle::named("drive");
        let (yielding, yielding_calls) = probe("yielding").requiring(&drive).build();
        let (stubborn, stubborn_calls) = probe("stubborn").requiring(&arm).cancel_incoming().build();
        let (both, both_calls) = probe("both").requiring(&drive).requiring(&arm).build();

        scheduler.schedule(&yielding);
        scheduler.schedule(&stubborn);
        scheduler.schedule(&both);

        assert!(!scheduler.is_scheduled(&both));
        assert_eq!(both_calls.initialize.get(), 0);
        // Neither holder was touched, even the one that would have yielded.
        assert!(scheduler.is_scheduled(&yielding));
        assert!(scheduler.is_scheduled(&stubborn));
        assert_eq!(yielding_calls.ends(), 0);
        assert_eq!(stubborn_calls.ends(), 0);
    }

    #[test]
    fn no_two_scheduled_commands_share_a_subsystem() {
        let scheduler = CommandScheduler::new();
        let subsystems: Vec<SubsystemHandle> =
            (0..3).map(|i| SubsystemHandle::named(format!("s{i}"))).collect();
        let mut commands = Vec::new();
        for i in 0..6 {
            let (cmd, _) = probe(&format!("c{i}"))
                .requiring(&subsystems[i % 3])
                .requiring(&subsystems[(i + 1) % 3])
                .build();
            commands.push(cmd);
        }
        for (cycle, cmd) in commands.iter().enumerate() {
            scheduler.schedule(cmd);
            scheduler.run();
            let scheduled = scheduler.scheduled_commands();
            for (i, x) in scheduled.iter().enumerate() {
                for y in &scheduled[i + 1..] {
                    assert!(
                        x.requirements().first_shared(y.requirements()).is_none(),
                        "cycle {cycle}: {} and {} share a subsystem",
                        x.name(),
                        y.name()
                    );
                }
            }
        }
    }

    #[test]
    fn requirements_snapshot_is_queryable() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let (cmd, _) = probe("a").requiring(&arm).build();
        assert!(scheduler.requirements(&cmd).is_none());
        scheduler.schedule(&cmd);
        assert_eq!(scheduler.requirements(&cmd), Some(Requirements::of([arm])));
    }

    // ── Default commands ─────────────────────────────────────────────────────

    #[test]
    fn default_command_yields_and_returns_on_the_same_cycle() {
        let scheduler = CommandScheduler::new();
        let s = SubsystemHandle::named("s");
        let (d, d_calls) = probe("default").requiring(&s).build();
        let (c, c_calls) = probe("c").requiring(&s).build();
        scheduler.set_default_command(&s, &d).unwrap();

        scheduler.run();
        assert!(scheduler.is_scheduled(&d));
        assert_eq!(d_calls.initialize.get(), 1);

        scheduler.schedule(&c);
        assert_eq!(d_calls.end_true.get(), 1);
        assert_eq!(c_calls.initialize.get(), 1);

        for cycle in 1..=5 {
            if cycle == 5 {
                c_calls.finished.set(true);
            }
            scheduler.run();
            if cycle < 5 {
                assert!(scheduler.is_scheduled(&c));
                assert!(!scheduler.is_scheduled(&d));
            }
        }
        assert_eq!(c_calls.end_false.get(), 1);
        assert!(scheduler.is_scheduled(&d));
        assert_eq!(d_calls.initialize.get(), 2);
        assert_eq!(scheduler.requiring(&s), Some(d.clone()));
    }

    #[test]
    fn subsystem_with_default_always_has_an_owner_after_a_cycle() {
        let scheduler = CommandScheduler::new();
        let s = SubsystemHandle::named("s");
        let (d, _) = probe("default").requiring(&s).build();
        scheduler.set_default_command(&s, &d).unwrap();

        let (short, short_calls) = probe("short").requiring(&s).build();
        short_calls.finished.set(true);
        for _ in 0..4 {
            scheduler.schedule(&short);
            scheduler.run();
            assert!(scheduler.requiring(&s).is_some());
        }
    }

    #[test]
    fn default_command_must_require_exactly_its_subsystem() {
        let scheduler = CommandScheduler::new();
        let s = SubsystemHandle::named("s");
        let other = SubsystemHandle::named("other");

        let (none, _) = probe("none").build();
        let (wide, _) = probe("wide").requiring(&s).requiring(&other).build();
        let (stubborn, _) = probe("stubborn").requiring(&s).cancel_incoming().build();

        for cmd in [&none, &wide, &stubborn] {
            assert!(matches!(
                scheduler.set_default_command(&s, cmd),
                Err(SchedulerError::InvalidDefaultCommand { .. })
            ));
        }
        assert!(scheduler.default_command(&s).is_none());
    }

    #[test]
    fn removed_default_is_not_rescheduled() {
        let scheduler = CommandScheduler::new();
        let s = SubsystemHandle::named("s");
        let (d, d_calls) = probe("default").requiring(&s).build();
        scheduler.set_default_command(&s, &d).unwrap();
        scheduler.remove_default_command(&s);
        scheduler.run();
        assert_eq!(d_calls.initialize.get(), 0);
    }

    // ── Composition guard ────────────────────────────────────────────────────

    #[test]
    fn composed_commands_cannot_be_scheduled_or_cancelled() {
        let scheduler = CommandScheduler::new();
        let errors = collect_errors(&scheduler);
        let (cmd, calls) = probe("child").build();
        cmd.mark_composed().unwrap();

        scheduler.schedule(&cmd);
        scheduler.cancel(&cmd);

        assert!(!scheduler.is_scheduled(&cmd));
        assert!(scheduler.is_composed(&cmd));
        assert_eq!(calls.initialize.get(), 0);
        let errors = errors.borrow();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, SchedulerError::CompositionViolation { .. })));
    }

    // ── Mode ─────────────────────────────────────────────────────────────────

    #[test]
    fn disabled_robot_admits_only_commands_that_run_disabled() {
        let scheduler = CommandScheduler::new();
        scheduler.set_enabled_source(|| false);
        let (normal, normal_calls) = probe("normal").build();
        let (always, _) = probe("always").runs_when_disabled().build();

        scheduler.schedule(&normal);
        scheduler.schedule(&always);

        assert!(!scheduler.is_scheduled(&normal));
        assert_eq!(normal_calls.initialize.get(), 0);
        assert!(scheduler.is_scheduled(&always));
    }

    #[test]
    fn disable_transition_interrupts_commands_that_do_not_run_disabled() {
        let scheduler = CommandScheduler::new();
        let enabled = Rc::new(Cell::new(true));
        let source = enabled.clone();
        scheduler.set_enabled_source(move || source.get());

        let (normal, normal_calls) = probe("normal").build();
        let (always, always_calls) = probe("always").runs_when_disabled().build();
        scheduler.schedule_all(&[normal.clone(), always.clone()]);
        scheduler.run();

        enabled.set(false);
        scheduler.run();
        assert!(!scheduler.is_scheduled(&normal));
        assert_eq!(normal_calls.end_true.get(), 1);
        assert_eq!(normal_calls.execute.get(), 1);
        assert!(scheduler.is_scheduled(&always));
        assert_eq!(always_calls.execute.get(), 2);
    }

    #[test]
    fn defaults_wait_for_enable() {
        let scheduler = CommandScheduler::new();
        let enabled = Rc::new(Cell::new(false));
        let source = enabled.clone();
        scheduler.set_enabled_source(move || source.get());
        let s = SubsystemHandle::named("s");
        let (d, _) = probe("default").requiring(&s).build();
        scheduler.set_default_command(&s, &d).unwrap();

        scheduler.run();
        assert!(!scheduler.is_scheduled(&d));
        enabled.set(true);
        scheduler.run();
        assert!(scheduler.is_scheduled(&d));
    }

    #[test]
    fn suspended_scheduler_does_nothing() {
        let scheduler = CommandScheduler::new();
        let (cmd, calls) = probe("a").build();
        scheduler.schedule(&cmd);
        scheduler.suspend();
        scheduler.run();
        assert_eq!(calls.execute.get(), 0);

        let (late, late_calls) = probe("late").build();
        scheduler.schedule(&late);
        assert_eq!(late_calls.initialize.get(), 0);

        scheduler.resume();
        scheduler.run();
        assert_eq!(calls.execute.get(), 1);
        assert_eq!(scheduler.cycle(), 1);
    }

    // ── Re-entrancy ──────────────────────────────────────────────────────────

    struct Spawner {
        scheduler: CommandScheduler,
        child: CommandHandle,
        cancel_self: Option<CommandHandle>,
    }

    impl Command for Spawner {
        fn execute(&mut self) -> Result<(), CommandError> {
            self.scheduler.schedule(&self.child);
            if let Some(me) = &self.cancel_self {
                self.scheduler.cancel(me);
            }
            Ok(())
        }
    }

    #[test]
    fn schedule_from_execute_is_applied_at_end_of_cycle() {
        let scheduler = CommandScheduler::new();
        let (child, child_calls) = probe("child").build();
        let spawner = CommandHandle::new(Spawner {
            scheduler: scheduler.clone(),
            child: child.clone(),
            cancel_self: None,
        });
        scheduler.schedule(&spawner);

        scheduler.run();
        // Admitted in the apply phase: initialized now, executed next cycle.
        assert!(scheduler.is_scheduled(&child));
        assert_eq!(child_calls.initialize.get(), 1);
        assert_eq!(child_calls.execute.get(), 0);

        scheduler.run();
        assert_eq!(child_calls.execute.get(), 1);
    }

    #[test]
    fn cancel_self_from_execute_still_finishes_the_cycle() {
        let scheduler = CommandScheduler::new();
        let slot: Rc<RefCell<Option<CommandHandle>>> = Rc::new(RefCell::new(None));

        struct SelfCancel {
            scheduler: CommandScheduler,
            me: Rc<RefCell<Option<CommandHandle>>>,
            ends: Rc<Cell<u32>>,
        }
        impl Command for SelfCancel {
            fn execute(&mut self) -> Result<(), CommandError> {
                if let Some(me) = self.me.borrow().as_ref() {
                    self.scheduler.cancel(me);
                }
                Ok(())
            }
            fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
                assert!(interrupted);
                self.ends.set(self.ends.get() + 1);
                Ok(())
            }
        }
        let ends = Rc::new(Cell::new(0));
        let cmd = CommandHandle::new(SelfCancel {
            scheduler: scheduler.clone(),
            me: slot.clone(),
            ends: ends.clone(),
        });
        *slot.borrow_mut() = Some(cmd.clone());

        scheduler.schedule(&cmd);
        scheduler.run();
        assert!(!scheduler.is_scheduled(&cmd));
        assert_eq!(ends.get(), 1);
    }

    #[test]
    fn pending_requests_apply_in_call_order() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let (first, first_calls) = probe("first").requiring(&arm).build();
        let (second, second_calls) = probe("second").requiring(&arm).build();

        let s = scheduler.clone();
        let (a, b) = (first.clone(), second.clone());
        Trigger::new(&scheduler, || true).on_edge(move |_| {
            s.schedule(&a);
            s.schedule(&b);
        });
        scheduler.run();

        // Both admitted one at a time; the later one wins the subsystem.
        assert_eq!(first_calls.initialize.get(), 1);
        assert_eq!(first_calls.end_true.get(), 1);
        assert_eq!(second_calls.initialize.get(), 1);
        assert_eq!(scheduler.requiring(&arm), Some(second));
    }

    #[test]
    fn observers_fire_once_per_occurrence() {
        let scheduler = CommandScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let (s, e, u, f) = (log.clone(), log.clone(), log.clone(), log.clone());
        scheduler.on_schedule(move |ev| s.borrow_mut().push(format!("schedule {}", ev.command_name)));
        scheduler.on_execute(move |ev| e.borrow_mut().push(format!("execute {}", ev.command_name)));
        scheduler.on_unschedule(move |ev| u.borrow_mut().push(format!("unschedule {}", ev.command_name)));
        scheduler.on_finish(move |ev| f.borrow_mut().push(format!("finish {}", ev.command_name)));

        let (a, a_calls) = probe("a").build();
        let (b, _) = probe("b").build();
        scheduler.schedule(&a);
        scheduler.schedule(&b);
        a_calls.finished.set(true);
        scheduler.run();
        scheduler.cancel(&b);

        assert_eq!(
            *log.borrow(),
            vec![
                "schedule a",
                "schedule b",
                "execute a",
                "execute b",
                "finish a",
                "unschedule b",
            ]
        );
    }

    // ── Error containment ────────────────────────────────────────────────────

    #[test]
    fn execute_failure_retires_with_end_true_and_loop_continues() {
        let scheduler = CommandScheduler::new();
        let errors = collect_errors(&scheduler);
        let (bad, bad_calls) = probe("bad").build();
        let (good, good_calls) = probe("good").build();
        bad_calls.fail_in.set(Some(CommandPhase::Execute));

        scheduler.schedule_all(&[bad.clone(), good.clone()]);
        scheduler.run();

        assert!(!scheduler.is_scheduled(&bad));
        assert_eq!(bad_calls.end_true.get(), 1);
        assert_eq!(bad_calls.is_finished.get(), 0);
        assert!(scheduler.is_scheduled(&good));
        assert_eq!(good_calls.execute.get(), 1);
        assert!(matches!(
            errors.borrow().as_slice(),
            [SchedulerError::CallbackFailure { phase: CommandPhase::Execute, .. }]
        ));
    }

    #[test]
    fn initialize_failure_leaves_command_unscheduled() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let errors = collect_errors(&scheduler);
        let (bad, bad_calls) = probe("bad").requiring(&arm).build();
        bad_calls.fail_in.set(Some(CommandPhase::Initialize));

        scheduler.schedule(&bad);
        assert!(!scheduler.is_scheduled(&bad));
        assert_eq!(bad_calls.end_true.get(), 1);
        assert!(scheduler.requiring(&arm).is_none());
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn end_failure_is_reported_and_treated_as_returned() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        let errors = collect_errors(&scheduler);
        let (bad, bad_calls) = probe("bad").requiring(&arm).build();
        bad_calls.fail_in.set(Some(CommandPhase::End));

        scheduler.schedule(&bad);
        scheduler.cancel(&bad);
        assert!(!scheduler.is_scheduled(&bad));
        assert!(scheduler.requiring(&arm).is_none());
        // end() is not retried after its own failure.
        assert_eq!(bad_calls.end_true.get(), 1);
        assert!(matches!(
            errors.borrow().as_slice(),
            [SchedulerError::CallbackFailure { phase: CommandPhase::End, .. }]
        ));
    }

    #[test]
    fn second_failure_in_cleanup_end_is_suppressed() {
        let scheduler = CommandScheduler::new();
        let errors = collect_errors(&scheduler);

        struct AlwaysFails;
        impl Command for AlwaysFails {
            fn execute(&mut self) -> Result<(), CommandError> {
                Err(CommandError::failed("execute"))
            }
            fn end(&mut self, _interrupted: bool) -> Result<(), CommandError> {
                panic!("end too");
            }
        }
        let cmd = CommandHandle::new(AlwaysFails);
        scheduler.schedule(&cmd);
        scheduler.run();

        assert!(!scheduler.is_scheduled(&cmd));
        assert_eq!(errors.borrow().len(), 1);
    }

    #[test]
    fn periodic_runs_every_cycle_and_failures_are_contained() {
        struct Flaky {
            ticks: Rc<Cell<u32>>,
        }
        impl crate::Subsystem for Flaky {
            fn name(&self) -> &str {
                "flaky"
            }
            fn periodic(&mut self) -> Result<(), CommandError> {
                self.ticks.set(self.ticks.get() + 1);
                Err(CommandError::failed("sensor timeout"))
            }
        }
        let scheduler = CommandScheduler::new();
        let errors = collect_errors(&scheduler);
        let ticks = Rc::new(Cell::new(0));
        let flaky = SubsystemHandle::new(Rc::new(RefCell::new(Flaky { ticks: ticks.clone() })));
        let calm = SubsystemHandle::named("calm");
        scheduler.register_subsystem(&flaky);
        scheduler.register_subsystem(&calm);
        scheduler.register_subsystem(&flaky);

        scheduler.run();
        scheduler.run();
        assert_eq!(ticks.get(), 2);
        assert!(errors.borrow().iter().all(|e| matches!(
            e,
            SchedulerError::CallbackFailure { phase: CommandPhase::Periodic, .. }
        )));
    }

    // ── Instance and lookup ──────────────────────────────────────────────────

    #[test]
    fn instance_is_shared_until_reset() {
        CommandScheduler::reset_instance();
        let a = CommandScheduler::instance();
        let b = CommandScheduler::instance();
        let (cmd, _) = probe("shared").runs_when_disabled().build();
        a.schedule(&cmd);
        assert!(b.is_scheduled(&cmd));

        CommandScheduler::reset_instance();
        assert!(!CommandScheduler::instance().is_scheduled(&cmd));
    }

    #[test]
    fn resolve_requirements_rejects_unknown_names() {
        let scheduler = CommandScheduler::new();
        let arm = SubsystemHandle::named("arm");
        scheduler.register_subsystem(&arm);

        let reqs = scheduler.resolve_requirements(&["arm"]).unwrap();
        assert!(reqs.contains(&arm));
        assert_eq!(
            scheduler.resolve_requirements(&["arm", "ghost"]),
            Err(SchedulerError::NullRequirement("ghost".to_string()))
        );
    }

    #[test]
    fn handle_tracks_membership_in_the_scheduled_set() {
        let scheduler = CommandScheduler::new();
        let (cmd, calls) = probe("a").build();
        assert!(!cmd.is_scheduled());

        scheduler.schedule(&cmd);
        assert!(cmd.is_scheduled());
        calls.finished.set(true);
        scheduler.run();
        assert!(!cmd.is_scheduled());

        calls.fail_in.set(Some(CommandPhase::Initialize));
        scheduler.schedule(&cmd);
        assert!(!cmd.is_scheduled());
    }

    #[test]
    fn panicking_enabled_source_keeps_the_last_mode_and_the_loop_alive() {
        let scheduler = CommandScheduler::new();
        let errors = collect_errors(&scheduler);
        let broken = Rc::new(Cell::new(true));
        let flag = broken.clone();
        scheduler.set_enabled_source(move || {
            if flag.get() {
                panic!("enable line unplugged");
            }
            true
        });
        let (cmd, calls) = probe("a").build();

        scheduler.schedule(&cmd);
        assert!(scheduler.is_scheduled(&cmd));
        scheduler.run();
        assert_eq!(scheduler.cycle(), 1);
        assert!(scheduler.is_scheduled(&cmd));

        broken.set(false);
        scheduler.run();
        assert_eq!(scheduler.cycle(), 2);
        assert_eq!(calls.execute.get(), 2);
        assert_eq!(calls.end_true.get(), 0);

        let errors = errors.borrow();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(
            e,
            SchedulerError::CallbackFailure { phase: CommandPhase::Mode, .. }
        )));
    }

    #[test]
    fn panicking_error_sink_does_not_starve_later_sinks() {
        let scheduler = CommandScheduler::new();
        scheduler.on_error(|_| panic!("dashboard gone"));
        let errors = collect_errors(&scheduler);
        let (bad, calls) = probe("bad").build();
        calls.fail_in.set(Some(CommandPhase::Execute));

        scheduler.schedule(&bad);
        scheduler.run();
        scheduler.run();

        assert_eq!(scheduler.cycle(), 2);
        assert_eq!(errors.borrow().len(), 1);
    }
}
