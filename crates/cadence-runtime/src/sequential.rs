//! [`SequentialGroup`] – run children one after another.
//!
//! Child *i + 1* is initialized in the same cycle that child *i* is observed
//! finished, right after its `end(false)`.  The group finishes after its last
//! child.  Interrupting the group interrupts only the active child; children
//! that never started are neither initialized nor ended.
//!
//! Children never run at the same time, so they may share subsystems.
//!
//! ```
//! use cadence_kernel::{CommandHandle, CommandScheduler};
//! use cadence_runtime::commands;
//! use cadence_runtime::sequential::sequence;
//!
//! let scheduler = CommandScheduler::new();
//! let group = sequence(vec![commands::none(), commands::none()]).unwrap();
//!
//! scheduler.schedule(&group);
//! scheduler.run();
//! scheduler.run();
//! assert!(!scheduler.is_scheduled(&group));
//! ```

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, CommandPhase, InterruptionBehavior, SchedulerError};

use crate::composition::{ChildStatus, GroupProps, Overlap, compose, in_child};

pub struct SequentialGroup {
    children: Vec<CommandHandle>,
    props: GroupProps,
    /// Index of the active child; `children.len()` once all have finished.
    index: usize,
    status: ChildStatus,
}

impl SequentialGroup {
    pub fn new(children: Vec<CommandHandle>) -> Result<Self, SchedulerError> {
        let props = compose("SequentialGroup", &children, Overlap::Exclusive)?;
        let index = children.len();
        Ok(Self {
            children,
            props,
            index,
            status: ChildStatus::Idle,
        })
    }

    fn start_child(&mut self) -> Result<(), CommandError> {
        let Some(child) = self.children.get(self.index) else {
            return Ok(());
        };
        self.status = ChildStatus::Running;
        child
            .initialize()
            .map_err(|e| in_child(child, CommandPhase::Initialize, e))
    }
}

/// Build a [`SequentialGroup`] and wrap it in a handle.
pub fn sequence(children: Vec<CommandHandle>) -> Result<CommandHandle, SchedulerError> {
    SequentialGroup::new(children).map(CommandHandle::new)
}

impl Command for SequentialGroup {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.index = 0;
        self.status = ChildStatus::Idle;
        self.start_child()
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        let Some(child) = self.children.get(self.index).cloned() else {
            return Ok(());
        };
        if self.status != ChildStatus::Running {
            return Ok(());
        }
        child
            .execute()
            .map_err(|e| in_child(&child, CommandPhase::Execute, e))?;
        let finished = child
            .is_finished()
            .map_err(|e| in_child(&child, CommandPhase::IsFinished, e))?;
        if !finished {
            return Ok(());
        }

        self.status = ChildStatus::Finished;
        self.index += 1;
        child
            .end(false)
            .map_err(|e| in_child(&child, CommandPhase::End, e))?;
        self.start_child()
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.index >= self.children.len())
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        let active = self.children.get(self.index).cloned();
        let was_running = self.status == ChildStatus::Running;
        self.index = self.children.len();
        if interrupted && was_running && let Some(child) = active {
            self.status = ChildStatus::Interrupted;
            child
                .end(true)
                .map_err(|e| in_child(&child, CommandPhase::End, e))?;
        }
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        self.props.requirements.clone()
    }

    fn name(&self) -> String {
        "SequentialGroup".to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        self.props.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.props.interruption_behavior
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Probe, probe};
    use cadence_kernel::{CommandScheduler, SubsystemHandle};

    #[test]
    fn children_run_in_order_with_handoff_in_the_same_cycle() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let (b, b_log) = probe("b");
        let group = sequence(vec![a, b]).unwrap();

        scheduler.schedule(&group);
        assert_eq!(a_log.initialize(), 1);
        assert_eq!(b_log.initialize(), 0);

        a_log.finish();
        scheduler.run();
        assert_eq!(a_log.end_false(), 1);
        assert_eq!(b_log.initialize(), 1);
        assert_eq!(b_log.execute(), 0);

        b_log.finish();
        scheduler.run();
        assert_eq!(b_log.end_false(), 1);
        assert!(!scheduler.is_scheduled(&group));
    }

    #[test]
    fn cancelling_the_group_ends_only_the_active_child() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let (b, b_log) = probe("b");
        let group = sequence(vec![a, b]).unwrap();

        scheduler.schedule(&group);
        for _ in 0..3 {
            scheduler.run();
        }
        scheduler.cancel(&group);

        assert_eq!(a_log.end_true(), 1);
        assert_eq!(a_log.end_false(), 0);
        assert_eq!(b_log.initialize(), 0);
        assert_eq!(b_log.end_true() + b_log.end_false(), 0);
    }

    #[test]
    fn children_may_share_subsystems() {
        let arm = SubsystemHandle::named("arm");
        let a = CommandHandle::new(Probe::requiring("a", &arm).0);
        let b = CommandHandle::new(Probe::requiring("b", &arm).0);
        let group = sequence(vec![a, b]).unwrap();
        assert_eq!(group.requirements().len(), 1);
    }

    #[test]
    fn children_cannot_be_scheduled_directly() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let _group = sequence(vec![a.clone()]).unwrap();
        scheduler.schedule(&a);
        assert!(!scheduler.is_scheduled(&a));
        assert_eq!(a_log.initialize(), 0);
    }

    #[test]
    fn empty_sequence_finishes_immediately() {
        let scheduler = CommandScheduler::new();
        let group = sequence(Vec::new()).unwrap();
        scheduler.schedule(&group);
        scheduler.run();
        assert!(!scheduler.is_scheduled(&group));
    }

    #[test]
    fn child_failure_is_attributed_and_interrupts_the_child() {
        let scheduler = CommandScheduler::new();
        let errors = crate::testing::collect_errors(&scheduler);
        let (a, a_log) = probe("a");
        let group = sequence(vec![a]).unwrap();
        a_log.fail_execute();

        scheduler.schedule(&group);
        scheduler.run();

        assert!(!scheduler.is_scheduled(&group));
        assert_eq!(a_log.end_true(), 1);
        let errors = errors.borrow();
        assert!(matches!(
            &errors[0],
            SchedulerError::CallbackFailure {
                phase: CommandPhase::Execute,
                source: CommandError::Child { child, .. },
                ..
            } if child == "a"
        ));
    }

    #[test]
    fn scheduled_command_cannot_be_grouped() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        scheduler.schedule(&a);

        assert!(matches!(
            sequence(vec![a.clone()]),
            Err(SchedulerError::CompositionViolation { .. })
        ));
        assert!(!a.is_composed());

        scheduler.run();
        assert_eq!((a_log.initialize(), a_log.execute()), (1, 1));
        scheduler.cancel(&a);
        assert!(!scheduler.is_scheduled(&a));
        assert_eq!(a_log.end_true(), 1);

        // Once retired it may join a group.
        assert!(sequence(vec![a]).is_ok());
    }
}
