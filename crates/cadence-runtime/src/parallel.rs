//! [`ParallelGroup`] – run children together until all have finished.
//!
//! Every child is initialized with the group.  Each cycle every running child
//! is executed and, once it reports finished, retired individually with
//! `end(false)`.  Interrupting the group ends every child still running with
//! `end(true)`.  Children must not share subsystems.

use cadence_kernel::{Command, CommandHandle, Requirements};
use cadence_types::{CommandError, CommandPhase, InterruptionBehavior, SchedulerError};

use crate::composition::{ChildStatus, GroupProps, Overlap, compose, in_child, interrupt_running};

pub struct ParallelGroup {
    children: Vec<CommandHandle>,
    status: Vec<ChildStatus>,
    props: GroupProps,
}

impl ParallelGroup {
    pub fn new(children: Vec<CommandHandle>) -> Result<Self, SchedulerError> {
        let props = compose("ParallelGroup", &children, Overlap::Disjoint)?;
        let status = vec![ChildStatus::Idle; children.len()];
        Ok(Self {
            children,
            status,
            props,
        })
    }
}

pub fn parallel(children: Vec<CommandHandle>) -> Result<CommandHandle, SchedulerError> {
    ParallelGroup::new(children).map(CommandHandle::new)
}

/// Initialize every child, marking each running before its callback so that
/// a failure still gets the child ended.
pub(crate) fn start_all(
    children: &[CommandHandle],
    status: &mut [ChildStatus],
) -> Result<(), CommandError> {
    for (child, status) in children.iter().zip(status.iter_mut()) {
        *status = ChildStatus::Running;
        child
            .initialize()
            .map_err(|e| in_child(child, CommandPhase::Initialize, e))?;
    }
    Ok(())
}

/// Execute one running child and retire it with `end(false)` when it reports
/// finished.  Returns whether it finished.
pub(crate) fn step_child(child: &CommandHandle, status: &mut ChildStatus) -> Result<bool, CommandError> {
    child
        .execute()
        .map_err(|e| in_child(child, CommandPhase::Execute, e))?;
    let finished = child
        .is_finished()
        .map_err(|e| in_child(child, CommandPhase::IsFinished, e))?;
    if finished {
        *status = ChildStatus::Finished;
        child
            .end(false)
            .map_err(|e| in_child(child, CommandPhase::End, e))?;
    }
    Ok(finished)
}

impl Command for ParallelGroup {
    fn initialize(&mut self) -> Result<(), CommandError> {
        self.status.fill(ChildStatus::Idle);
        start_all(&self.children, &mut self.status)
    }

    fn execute(&mut self) -> Result<(), CommandError> {
        for (child, status) in self.children.iter().zip(self.status.iter_mut()) {
            if *status == ChildStatus::Running {
                step_child(child, status)?;
            }
        }
        Ok(())
    }

    fn is_finished(&mut self) -> Result<bool, CommandError> {
        Ok(!self.status.contains(&ChildStatus::Running))
    }

    fn end(&mut self, interrupted: bool) -> Result<(), CommandError> {
        if interrupted {
            interrupt_running(&self.children, &mut self.status)?;
        }
        Ok(())
    }

    fn requirements(&self) -> Requirements {
        self.props.requirements.clone()
    }

    fn name(&self) -> String {
        "ParallelGroup".to_string()
    }

    fn runs_when_disabled(&self) -> bool {
        self.props.runs_when_disabled
    }

    fn interruption_behavior(&self) -> InterruptionBehavior {
        self.props.interruption_behavior
    }
}
