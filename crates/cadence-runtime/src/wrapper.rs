//! Single-child compositions: [`WrappedCommand`] and [`RepeatCommand`].
//!
//! [`WrappedCommand`] forwards every lifecycle call to its child while
//! overriding the properties the scheduler reads (name, disabled policy,
//! interruption behavior) and optionally running a closure after the child's
//! `end`.  It backs the property decorators of
//! [`CommandExt`][crate::decorators::CommandExt].

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, CommandPhase, InterruptionBehavior, SchedulerError};

use crate::composition::{Overlap, compose, in_child};

// ─────────────────────────────────────────────────────────────────────────────
// WrappedCommand
// ─────────────────────────────────────────────────────────────────────────────

pub struct WrappedCommand {
    child: CommandHandle,
    requirements: Requirements,
    name: String,
    runs_when_disabled: bool,
    interruption_behavior: InterruptionBehavior,
    finally: Option<Box<dyn FnMut(bool)>>,
}

impl WrappedCommand {
    /// Adopt `child`, inheriting all of its properties.
    pub fn new(child: CommandHandle) -> Result<Self, SchedulerError> {
        let props = compose("WrappedCommand", std::slice::from_ref(&child), Overlap::Exclusive)?;
        Ok(Self {
            name: child.name().to_string(),
            requirements: props.requirements,
            runs_when_disabled: props.runs_when_disabled,
            interruption_behavior: props.interruption_behavior,
            finally: None,
            child,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn runs_when_disabled(mut self, yes: bool) -> Self {
        self.runs_when_disabled = yes;
        self
    }

    pub fn interruption_behavior(mut self, behavior: InterruptionBehavior) -> Self {
        self.interruption_behavior = behavior;
        self
    }

    /// Run `f(interrupted)` after the child's `end`, even when that fails.
    pub fn finally(mut self, f: impl FnMut(bool) + 'static) -> Self {
        self.finally = Some(Box::new(f));
        self
    }
}

impl Command for WrappedCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.child
            .initialize()
            .map_err(|e| in_child(&self.child, CommandPhase::Initialize, e))
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        self.child
            .execute()
            .map_err(|e| in_child(&self.child, CommandPhase::Execute, e))
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        self.child
            .is_finished()
            .map_err(|e| in_child(&self.child, CommandPhase::IsFinished, e))
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        let result = self
            .child
            .end(interrupted)
            .map_err(|e| in_child(&self.child, CommandPhase::End, e));
        if let Some(finally) = self.finally.as_mut() {
            finally(interrupted);
        }
        result
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
        self.interruption_behavior
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RepeatCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Restarts its child every time it finishes.  Never finishes on its own.
///
/// The child is re-initialized on the cycle after it finished, so it runs
/// `initialize` → `execute`… → `end(false)` → `initialize` again.
pub struct RepeatCommand {
    child: CommandHandle,
    requirements: Requirements,
    runs_when_disabled: bool,
    interruption_behavior: InterruptionBehavior,
    /// `true` between the child's `end` and its next `initialize`.
    ended: bool,
}

impl RepeatCommand {
    pub fn new(child: CommandHandle) -> Result<Self, SchedulerError> {
        let props = compose("RepeatCommand", std::slice::from_ref(&child), Overlap::Exclusive)?;
        Ok(Self {
            child,
            requirements: props.requirements,
            runs_when_disabled: props.runs_when_disabled,
            interruption_behavior: props.interruption_behavior,
            ended: true,
        })
    }
}

impl Command for RepeatCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.ended = false;
        self.child
            .initialize()
            .map_err(|e| in_child(&self.child, CommandPhase::Initialize, e))
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        if self.ended {
            self.ended = false;
            self.child
                .initialize()
                .map_err(|e| in_child(&self.child, CommandPhase::Initialize, e))?;
        }
        self.child
            .execute()
            .map_err(|e| in_child(&self.child, CommandPhase::Execute, e))?;
        let finished = self
            .child
            .is_finished()
            .map_err(|e| in_child(&self.child, CommandPhase::IsFinished, e))?;
        if finished {
            self.ended = true;
            self.child
                .end(false)
                .map_err(|e| in_child(&self.child, CommandPhase::End, e))?;
        }
        Ok(())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        if std::mem::replace(&mut self.ended, true) {
            return Ok(());
        }
        self.child
            .end(interrupted)
            .map_err(|e| in_child(&self.child, CommandPhase::End, e))
    }

    fn requirements(&self) -> Requirements {
        self.requirements.clone()
    }

    fn name(&self) -> String {
        format!("Repeat({})", self.child.name())
    }

    fn runs_when_disabled(&self) -> bool {
        self.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.interruption_behavior
    }
}
