//! [`DeadlineGroup`] – run children alongside a deadline child.
//!
//! The group finishes exactly when its deadline child does.  Other children
//! that finish earlier are retired individually; those still running when the
//! deadline child finishes, or when the group is cancelled, get `end(true)`.
//!
//! The deadline child may share subsystems with the others.  The others may
//! not share subsystems with each other.

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, InterruptionBehavior, SchedulerError};

use crate::composition::{ChildStatus, GroupProps, Overlap, compose, interrupt_running};
use crate::parallel::{start_all, step_child};

/// Index of the deadline child in `children`.
const DEADLINE: usize = 0;

pub struct DeadlineGroup {
    children: Vec<CommandHandle>,
    status: Vec<ChildStatus>,
    props: GroupProps,
    finished: bool,
}

impl DeadlineGroup {
    pub fn new(deadline: CommandHandle, others: Vec<CommandHandle>) -> Result<Self, SchedulerError> {
        let mut children = Vec::with_capacity(others.len() + 1);
        children.push(deadline);
        children.extend(others);
        let props = compose("DeadlineGroup", &children, Overlap::DeadlineExempt(DEADLINE))?;
        let status = vec![ChildStatus::Idle; children.len()];
        Ok(Self {
            children,
            status,
            props,
            finished: false,
        })
    }

    pub fn deadline(&self) -> &CommandHandle {
        &self.children[DEADLINE]
    }
}

pub fn deadline(deadline: CommandHandle, others: Vec<CommandHandle>) -> Result<CommandHandle, SchedulerError> {
    DeadlineGroup::new(deadline, others).map(CommandHandle::new)
}

impl Command for DeadlineGroup {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.finished = false;
        self.status.fill(ChildStatus::Idle);
        start_all(&self.children, &mut self.status)
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        for (i, (child, status)) in self.children.iter().zip(self.status.iter_mut()).enumerate() {
            if *status == ChildStatus::Running && step_child(child, status)? && i == DEADLINE {
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
        "DeadlineGroup".to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        self.props.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.props.interruption_behavior
    }
}
