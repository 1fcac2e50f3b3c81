//! Shared plumbing for command groups.
//!
//! Every group is built through [`compose`], which
//!
//! 1. rejects a child listed twice, already owned by another composition or
//!    currently scheduled on its own ([`SchedulerError::CompositionViolation`]),
//! 2. checks that children that can run at the same time never share a
//!    subsystem ([`SchedulerError::RequirementConflict`]),
//! 3. marks every child as composed, and
//! 4. aggregates the children's properties into a [`GroupProps`].
//!
//! Nothing is marked when any check fails, so a rejected group leaves its
//! children free to be used elsewhere.

use cadence_kernel::{CommandHandle, Requirements};
use cadence_types::{CommandError, CommandPhase, InterruptionBehavior, SchedulerError};

/// Which children of a group may run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// At most one child runs at a time; children may share subsystems.
    Exclusive,
    /// All children may run together; no two may share a subsystem.
    Disjoint,
    /// Like [`Disjoint`][Overlap::Disjoint], except that the child at this
    /// index may share subsystems with the others.
    DeadlineExempt(usize),
}

/// Properties a group reports to the scheduler, derived from its children.
#[derive(Debug, Clone)]
pub struct GroupProps {
    pub requirements: Requirements,
    /// `true` only when every child runs when disabled.
    pub runs_when_disabled: bool,
    /// `CancelSelf` as soon as any child is `CancelSelf`.
    pub interruption_behavior: InterruptionBehavior,
}

impl GroupProps {
    fn aggregate(children: &[CommandHandle]) -> Self {
        let mut requirements = Requirements::new();
        for child in children {
            requirements.extend_from(child.requirements());
        }
        let any_cancel_self = children
            .iter()
            .any(|c| c.interruption_behavior() == InterruptionBehavior::CancelSelf);
        Self {
            requirements,
            runs_when_disabled: children.iter().all(CommandHandle::runs_when_disabled),
            interruption_behavior: if any_cancel_self || children.is_empty() {
                InterruptionBehavior::CancelSelf
            } else {
                InterruptionBehavior::CancelIncoming
            },
        }
    }
}

/// Run state of one child inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildStatus {
    #[default]
    Idle,
    Running,
    Finished,
    Interrupted,
}

/// Validate, adopt and summarize `children` for the group called `group`.
pub fn compose(
    group: &str,
    children: &[CommandHandle],
    overlap: Overlap,
) -> Result<GroupProps, SchedulerError> {
    for (i, child) in children.iter().enumerate() {
        if child.is_composed() {
            return Err(SchedulerError::CompositionViolation {
                command: child.name().to_string(),
                reason: format!("already part of a composition, cannot join `{group}`"),
            });
        }
        if child.is_scheduled() {
            return Err(SchedulerError::CompositionViolation {
                command: child.name().to_string(),
                reason: format!("currently scheduled, cannot join `{group}`"),
            });
        }
        if children[..i].contains(child) {
            return Err(SchedulerError::CompositionViolation {
                command: child.name().to_string(),
                reason: format!("listed twice in `{group}`"),
            });
        }
    }

    if overlap != Overlap::Exclusive {
        let exempt = match overlap {
            Overlap::DeadlineExempt(index) => Some(index),
            _ => None,
        };
        for (i, a) in children.iter().enumerate() {
            for (j, b) in children.iter().enumerate().skip(i + 1) {
                if exempt == Some(i) || exempt == Some(j) {
                    continue;
                }
                if let Some(shared) = a.requirements().first_shared(b.requirements()) {
                    return Err(SchedulerError::RequirementConflict {
                        group: group.to_string(),
                        subsystem: shared.name().to_string(),
                    });
                }
            }
        }
    }

    for child in children {
        child.mark_composed()?;
    }
    Ok(GroupProps::aggregate(children))
}

/// Attribute a child's failure to the group.
pub(crate) fn in_child(child: &CommandHandle, phase: CommandPhase, err: CommandError) -> CommandError {
    err.in_child(child.name(), phase)
}

/// Call `end(true)` on every running child, recording it as interrupted.
///
/// Every child is ended even if an earlier one fails; the first failure is
/// returned.
pub(crate) fn interrupt_running(
    children: &[CommandHandle],
    status: &mut [ChildStatus],
) -> Result<(), CommandError> {
    let mut first_error = None;
    for (child, status) in children.iter().zip(status.iter_mut()) {
        if *status != ChildStatus::Running {
            continue;
        }
        *status = ChildStatus::Interrupted;
        if let Err(err) = child.end(true)
            && first_error.is_none()
        {
            first_error = Some(in_child(child, CommandPhase::End, err));
        }
    }
    first_error.map_or(Ok(()), Err)
}
