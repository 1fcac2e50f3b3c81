//! `cadence-types` – shared vocabulary for the Cadence command scheduler.
//!
//! Identifiers, lifecycle enums, the error taxonomy and the serialisable
//! scheduler events that the kernel emits to observers.  Nothing here knows
//! about scheduling; every other crate in the workspace depends on it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

static NEXT_COMMAND_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SUBSYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a command handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(u64);

impl CommandId {
    /// Allocate a fresh id.  Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// Process-unique identity of a subsystem handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubsystemId(u64);

impl SubsystemId {
    /// Allocate a fresh id.  Ids are never reused within a process.
    pub fn next() -> Self {
        Self(NEXT_SUBSYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle enums
// ─────────────────────────────────────────────────────────────────────────────

/// What happens when a new command needs a subsystem this command holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterruptionBehavior {
    /// The running command yields: it is interrupted and the newcomer admitted.
    #[default]
    CancelSelf,
    /// The running command wins: the incoming command is not scheduled.
    CancelIncoming,
}

impl fmt::Display for InterruptionBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptionBehavior::CancelSelf => write!(f, "cancel_self"),
            InterruptionBehavior::CancelIncoming => write!(f, "cancel_incoming"),
        }
    }
}

/// The callback that was running when a failure was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandPhase {
    Initialize,
    Execute,
    IsFinished,
    End,
    /// A subsystem's per-cycle hook.
    Periodic,
    /// A trigger condition or bound action.
    Trigger,
    /// A scheduler observer callback.
    Observer,
    /// The robot's enabled/disabled source.
    Mode,
}

impl fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandPhase::Initialize => "initialize",
            CommandPhase::Execute => "execute",
            CommandPhase::IsFinished => "is_finished",
            CommandPhase::End => "end",
            CommandPhase::Periodic => "periodic",
            CommandPhase::Trigger => "trigger",
            CommandPhase::Observer => "observer",
            CommandPhase::Mode => "mode",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error returned by a command or subsystem callback.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandError {
    #[error("{0}")]
    Failed(String),

    #[error("hardware fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("panicked: {0}")]
    Panicked(String),

    /// The callback tried to run while the same command was already inside
    /// one of its own callbacks.
    #[error("`{0}` is already running a callback")]
    Reentrant(String),

    /// A child of a composition failed.
    #[error("child `{child}` failed during {phase}: {source}")]
    Child {
        child: String,
        phase: CommandPhase,
        #[source]
        source: Box<CommandError>,
    },
}

impl CommandError {
    /// Shorthand for [`CommandError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed(message.into())
    }

    /// Wrap `self` as the failure of composition child `child`.
    pub fn in_child(self, child: &str, phase: CommandPhase) -> Self {
        CommandError::Child {
            child: child.to_string(),
            phase,
            source: Box::new(self),
        }
    }
}

/// Everything the scheduler reports to its error sink.
///
/// Run-loop errors are only ever reported, never propagated; construction-time
/// errors are returned to the caller instead.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchedulerError {
    #[error("requirement conflict in `{group}`: subsystem `{subsystem}` is required by more than one child")]
    RequirementConflict { group: String, subsystem: String },

    #[error("composition violation on `{command}`: {reason}")]
    CompositionViolation { command: String, reason: String },

    #[error("`{command}` failed during {phase}: {source}")]
    CallbackFailure {
        command: String,
        phase: CommandPhase,
        #[source]
        source: CommandError,
    },

    #[error("null requirement: no registered subsystem named `{0}`")]
    NullRequirement(String),

    #[error("invalid default command for `{subsystem}`: {reason}")]
    InvalidDefaultCommand { subsystem: String, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler events
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle event emitted by the scheduler to its observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub command: CommandId,
    pub command_name: String,
    pub kind: SchedulerEventKind,
}

impl SchedulerEvent {
    pub fn new(command: CommandId, command_name: impl Into<String>, kind: SchedulerEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            command,
            command_name: command_name.into(),
            kind,
        }
    }
}

/// What happened to the command named in a [`SchedulerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum SchedulerEventKind {
    /// Admitted and initialized.
    Scheduled,
    /// `execute()` returned normally this cycle.
    Executed,
    /// Retired with `end(true)`.  `interruptor` is the incoming command that
    /// displaced it, when there was one.
    Unscheduled { interruptor: Option<CommandId> },
    /// Retired with `end(false)`.
    Finished,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Tunables for a scheduler instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Nominal control-cycle period in milliseconds.
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// How many times the pending buffer is drained at the end of a cycle
    /// before leftover requests are deferred to the next cycle.
    #[serde(default = "default_max_pending_passes")]
    pub max_pending_passes: usize,

    /// Log a warning with the phase breakdown when a cycle overruns.
    #[serde(default = "default_report_overruns")]
    pub report_overruns: bool,
}

fn default_period_ms() -> u64 {
    20
}
fn default_max_pending_passes() -> usize {
    8
}
fn default_report_overruns() -> bool {
    true
}

impl SchedulerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            max_pending_passes: default_max_pending_passes(),
            report_overruns: default_report_overruns(),
        }
    }
}
