//! Branching commands: [`ConditionalCommand`] and [`SelectCommand`].
//!
//! Both pick one branch in `initialize()` and then behave exactly like it
//! until `end()`.  Because the branch is not known in advance, they require
//! the union of every branch's subsystems.

use std::collections::HashMap;
use std::hash::Hash;

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, CommandPhase, InterruptionBehavior, SchedulerError};
use tracing::warn;

use crate::composition::{GroupProps, Overlap, compose, in_child};

/// Drive `selected` through one lifecycle callback, attributing failures.
fn forward<T>(
    selected: Option<&CommandHandle>,
    phase: CommandPhase,
    idle: T,
    f: impl FnOnce(&CommandHandle) -> Result<T, CommandError>,
) -> Result<T, CommandError> {
    match selected {
        Some(child) => f(child).map_err(|e| in_child(child, phase, e)),
        None => Ok(idle),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConditionalCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Runs `on_true` or `on_false` depending on `condition` at initialize time.
pub struct ConditionalCommand {
    on_true: CommandHandle,
    on_false: CommandHandle,
    condition: Box<dyn Fn() -> bool>,
    props: GroupProps,
    selected: Option<CommandHandle>,
}

impl ConditionalCommand {
    pub fn new(
        on_true: CommandHandle,
        on_false: CommandHandle,
        condition: impl Fn() -> bool + 'static,
    ) -> Result<Self, SchedulerError> {
        let props = compose(
            "ConditionalCommand",
            &[on_true.clone(), on_false.clone()],
            Overlap::Exclusive,
        )?;
        Ok(Self {
            on_true,
            on_false,
            condition: Box::new(condition),
            props,
            selected: None,
        })
    }
}

pub fn either(
    on_true: CommandHandle,
    on_false: CommandHandle,
    condition: impl Fn() -> bool + 'static,
) -> Result<CommandHandle, SchedulerError> {
    ConditionalCommand::new(on_true, on_false, condition).map(CommandHandle::new)
}

impl Command for ConditionalCommand {
    fn initialize(&mut self) -> Result<(), CommandError> {
        let branch = if (self.condition)() {
            self.on_true.clone()
        } else {
            self.on_false.clone()
        };
        self.selected = Some(branch);
        forward(self.selected.as_ref(), CommandPhase::Initialize, (), |c| c.initialize())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        forward(self.selected.as_ref(), CommandPhase::Execute, (), |c| c.execute())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        forward(self.selected.as_ref(), CommandPhase::IsFinished, true, |c| c.is_finished())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        let selected = self.selected.take();
        forward(selected.as_ref(), CommandPhase::End, (), |c| c.end(interrupted))
    }

    fn requirements(&self) -> Requirements {
        self.props.requirements.clone()
    }

    fn name(&self) -> String {
        "ConditionalCommand".to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        self.props.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.props.interruption_behavior
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SelectCommand
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the branch whose key `selector` returns at initialize time.
///
/// An unknown key is logged and the command finishes immediately.
pub struct SelectCommand<K> {
    branches: HashMap<K, CommandHandle>,
    selector: Box<dyn Fn() -> K>,
    props: GroupProps,
    selected: Option<CommandHandle>,
}

impl<K: Eq + Hash + std::fmt::Debug + 'static> SelectCommand<K> {
    pub fn new(
        branches: impl IntoIterator<Item = (K, CommandHandle)>,
        selector: impl Fn() -> K + 'static,
    ) -> Result<Self, SchedulerError> {
        let branches: HashMap<K, CommandHandle> = branches.into_iter().collect();
        let children: Vec<CommandHandle> = branches.values().cloned().collect();
        let props = compose("SelectCommand", &children, Overlap::Exclusive)?;
        Ok(Self {
            branches,
            selector: Box::new(selector),
            props,
            selected: None,
        })
    }
}

impl<K: Eq + Hash + std::fmt::Debug + 'static> Command for SelectCommand<K> {
    fn initialize(&mut self) -> Result<(), CommandError> {
        let key = (self.selector)();
        self.selected = self.branches.get(&key).cloned();
        if self.selected.is_none() {
            warn!(key = ?key, "SelectCommand has no branch for key; finishing");
        }
        forward(self.selected.as_ref(), CommandPhase::Initialize, (), |c| c.initialize())
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        forward(self.selected.as_ref(), CommandPhase::Execute, (), |c| c.execute())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        forward(self.selected.as_ref(), CommandPhase::IsFinished, true, |c| c.is_finished())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        let selected = self.selected.take();
        forward(selected.as_ref(), CommandPhase::End, (), |c| c.end(interrupted))
    }

    fn requirements(&self) -> Requirements {
        self.props.requirements.clone()
    }

    fn name(&self) -> String {
        "SelectCommand".to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        self.props.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.props.interruption_behavior
    }
}
