//! Requirement sets and the [`RequirementLedger`] of subsystem ownership.
//!
//! [`Requirements`] is the set of subsystems a command claims while it is
//! scheduled.  The [`RequirementLedger`] records, for the current cycle,
//! which scheduled command owns each claimed subsystem.  Before a command is
//! admitted the scheduler asks the ledger for [`conflicts`] and arbitrates
//! them by interruption behavior.
//!
//! [`conflicts`]: RequirementLedger::conflicts

use std::collections::HashMap;

use cadence_types::SubsystemId;

use crate::command::CommandHandle;
use crate::subsystem::SubsystemHandle;

// ────────────────────────────────────────────────────────────────────────────
// Requirements
// ────────────────────────────────────────────────────────────────────────────

/// An insertion-ordered set of subsystems, deduplicated by identity.
///
/// # Example
///
/// ```
/// use cadence_kernel::{Requirements, SubsystemHandle};
///
/// let drive = SubsystemHandle::named("drive");
/// let arm = SubsystemHandle::named("arm");
///
/// let mut reqs = Requirements::of([drive.clone()]);
/// assert!(reqs.insert(arm.clone()));
/// assert!(!reqs.insert(drive.clone()));
///
/// assert_eq!(reqs.len(), 2);
/// assert_eq!(reqs.first_shared(&Requirements::of([arm.clone()])), Some(&arm));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    subsystems: Vec<SubsystemHandle>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from any iterator of handles.
    pub fn of(subsystems: impl IntoIterator<Item = SubsystemHandle>) -> Self {
        subsystems.into_iter().collect()
    }

    /// Add `subsystem`; returns `false` when it was already present.
    pub fn insert(&mut self, subsystem: SubsystemHandle) -> bool {
        if self.contains(&subsystem) {
            return false;
        }
        self.subsystems.push(subsystem);
        true
    }

    /// Union `other` into `self`.
    pub fn extend_from(&mut self, other: &Requirements) {
        for subsystem in other {
            self.insert(subsystem.clone());
        }
    }

    pub fn contains(&self, subsystem: &SubsystemHandle) -> bool {
        self.contains_id(subsystem.id())
    }

    pub fn contains_id(&self, id: SubsystemId) -> bool {
        self.subsystems.iter().any(|s| s.id() == id)
    }

    /// The first subsystem of `self` that also appears in `other`.
    pub fn first_shared(&self, other: &Requirements) -> Option<&SubsystemHandle> {
        self.subsystems.iter().find(|s| other.contains(s))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubsystemHandle> {
        self.subsystems.iter()
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }

    /// Subsystem names, in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.subsystems.iter().map(SubsystemHandle::name).collect()
    }
}

impl FromIterator<SubsystemHandle> for Requirements {
    fn from_iter<I: IntoIterator<Item = SubsystemHandle>>(iter: I) -> Self {
        let mut reqs = Requirements::new();
        for subsystem in iter {
            reqs.insert(subsystem);
        }
        reqs
    }
}

impl<'a> IntoIterator for &'a Requirements {
    type Item = &'a SubsystemHandle;
    type IntoIter = std::slice::Iter<'a, SubsystemHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.subsystems.iter()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RequirementLedger
// ────────────────────────────────────────────────────────────────────────────

/// Which scheduled command currently owns each claimed subsystem.
#[derive(Default)]
pub struct RequirementLedger {
    owners: HashMap<SubsystemId, CommandHandle>,
}

impl RequirementLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `command` as the owner of `requirements`, replacing any
    /// previous owner.  Callers arbitrate conflicts first.
    pub fn claim(&mut self, command: &CommandHandle, requirements: &Requirements) {
        for subsystem in requirements {
            self.owners.insert(subsystem.id(), command.clone());
        }
    }

    /// Release every subsystem owned by `command`.  No-ops when it owns none.
    pub fn release(&mut self, command: &CommandHandle) {
        self.owners.retain(|_, owner| owner != command);
    }

    pub fn owner(&self, subsystem: SubsystemId) -> Option<&CommandHandle> {
        self.owners.get(&subsystem)
    }

    pub fn is_free(&self, subsystem: SubsystemId) -> bool {
        !self.owners.contains_key(&subsystem)
    }

    /// The distinct owners of any subsystem in `requirements`, in requirement
    /// order.
    pub fn conflicts(&self, requirements: &Requirements) -> Vec<CommandHandle> {
        let mut found: Vec<CommandHandle> = Vec::new();
        for subsystem in requirements {
            if let Some(owner) = self.owners.get(&subsystem.id())
                && !found.contains(owner)
            {
                found.push(owner.clone());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
