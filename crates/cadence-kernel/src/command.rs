//! The [`Command`] trait and its shared [`CommandHandle`].
//!
//! A command is a stateful unit of robot behavior with a four-phase
//! lifecycle driven by the scheduler:
//!
//! | Callback | When |
//! |----------|------|
//! | [`initialize`][Command::initialize] | once, the cycle the command is admitted |
//! | [`execute`][Command::execute] | once per cycle while scheduled |
//! | [`is_finished`][Command::is_finished] | once per cycle, after `execute` |
//! | [`end`][Command::end] | once, at retirement; `interrupted` tells finish from cancel |
//!
//! Every callback returns a `Result`; an `Err` (or a panic) is contained by
//! the scheduler and reported as a
//! [`SchedulerError::CallbackFailure`][cadence_types::SchedulerError::CallbackFailure].
//!
//! Commands are shared between the scheduler, trigger bindings and parent
//! compositions, so they are always handled through a [`CommandHandle`].
//! The handle captures the command's name, requirements, disabled policy and
//! interruption behavior once, when it is created.
//!
//! # Example
//!
//! ```
//! use cadence_kernel::{Command, CommandHandle, Requirements, SubsystemHandle};
//! use cadence_types::CommandError;
//!
//! struct Spin { arm: SubsystemHandle, turns: u32 }
//!
//! impl Command for Spin {
//!     fn execute(&mut self) -> Result<(), CommandError> {
//!         self.turns += 1;
//!         Ok(())
//!     }
//!     fn is_finished(&mut self) -> Result<bool, CommandError> {
//!         Ok(self.turns >= 3)
//!     }
//!     fn requirements(&self) -> Requirements {
//!         Requirements::of([self.arm.clone()])
//!     }
//! }
//!
//! let arm = SubsystemHandle::named("arm");
//! let spin = CommandHandle::new(Spin { arm: arm.clone(), turns: 0 });
//! assert_eq!(spin.name(), "Spin");
//! assert!(spin.requirements().contains(&arm));
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use cadence_types::{CommandError, CommandId, InterruptionBehavior, SchedulerError};

use crate::guard::guarded;
use crate::requirements::Requirements;
use crate::subsystem::SubsystemHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Command
// ─────────────────────────────────────────────────────────────────────────────

/// A schedulable unit of robot behavior.
///
/// Only the scheduler (or a parent composition) calls the lifecycle
/// callbacks.  Between `initialize` and `end` the command is the only writer
/// of its required subsystems.
pub trait Command {
    fn initialize(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    /// Commands that never report `true` run until interrupted.
    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(false)
    }

    fn end(&mut self, _interrupted: bool) -> Result<(), CommandError> {
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        Requirements::new()
    }

    /// Defaults to the implementing type's unqualified name.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        false
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        InterruptionBehavior::CancelSelf
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandHandle
// ─────────────────────────────────────────────────────────────────────────────

struct CommandCell {
    id: CommandId,
    name: String,
    requirements: Requirements,
    runs_when_disabled: bool,
    interruption_behavior: InterruptionBehavior,
    composed: Cell<bool>,
    scheduled: Cell<bool>,
    command: RefCell<Box<dyn Command>>,
}

/// Cloneable, identity-comparable handle to a command.
///
/// Lifecycle methods on the handle contain panics and re-entrant calls,
/// returning them as [`CommandError`]s.  They are public so that
/// compositions can drive their children; application code should leave
/// them to the scheduler.
#[derive(Clone)]
pub struct CommandHandle {
    shared: Rc<CommandCell>,
}

impl CommandHandle {
    pub fn new<C: Command + 'static>(command: C) -> Self {
        let name = command.name();
        let requirements = command.requirements();
        let runs_when_disabled = command.runs_when_disabled();
        let interruption_behavior = command.interruption_behavior();
        Self {
            shared: Rc::new(CommandCell {
                id: CommandId::next(),
                name,
                requirements,
                runs_when_disabled,
                interruption_behavior,
                composed: Cell::new(false),
                scheduled: Cell::new(false),
                command: RefCell::new(Box::new(command)),
            }),
        }
    }

    pub fn id(&self) -> CommandId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn requirements(&self) -> &Requirements {
        &self.shared.requirements
    }

    pub fn has_requirement(&self, subsystem: &SubsystemHandle) -> bool {
        self.shared.requirements.contains(subsystem)
    }

    pub fn runs_when_disabled(&self) -> bool {
        self.shared.runs_when_disabled
    }

    pub fn interruption_behavior(&self) -> InterruptionBehavior {
        self.shared.interruption_behavior
    }

    /// `true` once a composition has adopted this command.
    pub fn is_composed(&self) -> bool {
        self.shared.composed.get()
    }

    /// `true` while the command sits in a scheduler's top-level set.
    /// Compositions refuse to adopt such a command.
    pub fn is_scheduled(&self) -> bool {
        self.shared.scheduled.get()
    }

    pub(crate) fn set_scheduled(&self, scheduled: bool) {
        self.shared.scheduled.set(scheduled);
    }

    /// Mark this command as owned by a composition.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::CompositionViolation`] if it already belongs to one.
    pub fn mark_composed(&self) -> Result<(), SchedulerError> {
        if self.shared.composed.replace(true) {
            return Err(SchedulerError::CompositionViolation {
                command: self.shared.name.clone(),
                reason: "already part of a composition".to_string(),
            });
        }
        Ok(())
    }

    pub fn initialize(&self) -> Result<(), CommandError> {
        self.with_command(|c| c.initialize())
    }

    pub fn execute(&self) -> Result<(), CommandError> {
        self.with_command(|c| c.execute())
    }

    pub fn is_finished(&self) -> Result<bool, CommandError> {
        self.with_command(|c| c.is_finished())
    }

    pub fn end(&self, interrupted: bool) -> Result<(), CommandError> {
        self.with_command(|c| c.end(interrupted))
    }

    fn with_command<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn Command>) -> Result<T, CommandError>,
    ) -> Result<T, CommandError> {
        let mut command = self
            .shared
            .command
            .try_borrow_mut()
            .map_err(|_| CommandError::Reentrant(self.shared.name.clone()))?;
        guarded(|| f(&mut *command))
    }
}

impl PartialEq for CommandHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for CommandHandle {}

impl Hash for CommandHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("requirements", &self.shared.requirements.names())
            .field("composed", &self.shared.composed.get())
            .finish()
    }
}
