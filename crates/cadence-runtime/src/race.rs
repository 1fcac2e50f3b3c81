//! [`RaceGroup`] – run children together until the first one finishes.
//!
//! Each cycle every running child is executed and checked.  Any child that
//! reports finished gets `end(false)`; if at least one did, every other child
//! still running is interrupted with `end(true)` in the same cycle and the
//! group finishes.  A race with no children never finishes on its own.

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, InterruptionBehavior, SchedulerError};

use crate::composition::{ChildStatus, GroupProps, Overlap, compose, interrupt_running};
use crate::parallel::{start_all, step_child};

pub struct RaceGroup {
    children: Vec<CommandHandle>,
    status: Vec<ChildStatus>,
    props: GroupProps,
    finished: bool,
}

impl RaceGroup {
    pub fn new(children: Vec<CommandHandle>) -> Result<Self, SchedulerError> {
        let props = compose("RaceGroup", &children, Overlap::Disjoint)?;
        let status = vec![ChildStatus::Idle; children.len()];
        Ok(Self {
            children,
            status,
            props,
            finished: false,
        })
    }
}

pub fn race(children: Vec<CommandHandle>) -> Result<CommandHandle, SchedulerError> {
    RaceGroup::new(children).map(CommandHandle::new)
}

impl Command for RaceGroup {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.finished = false;
        self.status.fill(ChildStatus::Idle);
        start_all(&self.children, &mut self.status)
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        for (child, status) in self.children.iter().zip(self.status.iter_mut()) {
            if *status == ChildStatus::Running && step_child(child, status)? {
                self.finished = true;
            }
        }
        if self.finished {
            interrupt_running(&self.children, &mut self.status)?;
        }
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(self.finished)
    }

    fn end(&mut self, _interrupted: bool) -> Result<(), CommandError> {
        interrupt_running(&self.children, &mut self.status)
    }

    fn requirements(&self) -> Requirements {
        self.props.requirements.clone()
    }

    fn name(&self) -> String {
        "RaceGroup".to_string()
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
    use crate::testing::probe;
    use cadence_kernel::CommandScheduler;

    #[test]
    fn first_finisher_ends_the_race_in_the_same_cycle() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let (b, b_log) = probe("b");
        let (c, c_log) = probe("c");
        let group = race(vec![a, b, c]).unwrap();

        scheduler.schedule(&group);
        scheduler.run();
        assert!(scheduler.is_scheduled(&group));

        b_log.finish();
        scheduler.run();
        assert!(!scheduler.is_scheduled(&group));
        assert_eq!(b_log.end_false(), 1);
        assert_eq!(a_log.end_true(), 1);
        assert_eq!(c_log.end_true(), 1);
        assert_eq!(a_log.ends() + b_log.ends() + c_log.ends(), 3);
    }

    #[test]
    fn simultaneous_finishers_both_end_normally() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let (b, b_log) = probe("b");
        let group = race(vec![a, b]).unwrap();
        a_log.finish();
        b_log.finish();

        scheduler.schedule(&group);
        scheduler.run();
        assert_eq!(a_log.end_false(), 1);
        assert_eq!(b_log.end_false(), 1);
        assert_eq!(a_log.end_true() + b_log.end_true(), 0);
    }

    #[test]
    fn cancelling_the_race_interrupts_every_child_once() {
        let scheduler = CommandScheduler::new();
        let (a, a_log) = probe("a");
        let (b, b_log) = probe("b");
        let group = race(vec![a, b]).unwrap();
        scheduler.schedule(&group);
        scheduler.run();
        scheduler.cancel(&group);
        assert_eq!(a_log.end_true(), 1);
        assert_eq!(b_log.end_true(), 1);
    }

    #[test]
    fn empty_race_never_finishes() {
        let scheduler = CommandScheduler::new();
        let group = race(Vec::new()).unwrap();
        scheduler.schedule(&group);
        for _ in 0..3 {
            scheduler.run();
        }
        assert!(scheduler.is_scheduled(&group));
    }
}
