//! `cadence-kernel` – Subsystems, Commands & the Scheduler
//!
//! The cooperative core of Cadence.  Everything here runs on one thread,
//! driven by repeated calls to [`CommandScheduler::run`]; nothing blocks and
//! nothing spawns.
//!
//! # Modules
//!
//! - [`subsystem`] – [`Subsystem`][subsystem::Subsystem] and
//!   [`SubsystemHandle`][subsystem::SubsystemHandle]: exclusive-access groups
//!   of robot hardware with an optional per-cycle `periodic()` hook.
//! - [`command`] – [`Command`][command::Command] and
//!   [`CommandHandle`][command::CommandHandle]: the four-phase lifecycle
//!   (`initialize`, `execute`, `is_finished`, `end`) and the shared handle the
//!   scheduler, triggers and compositions pass around.
//! - [`requirements`] – [`Requirements`][requirements::Requirements] and
//!   [`RequirementLedger`][requirements::RequirementLedger]: which subsystems
//!   a command claims and which scheduled command owns each one.
//! - [`trigger`] – [`Trigger`][trigger::Trigger]: binds polled boolean
//!   conditions to schedule/cancel actions on their rising and falling
//!   [`Edge`][trigger::Edge]s.
//! - [`scheduler`] – [`CommandScheduler`][scheduler::CommandScheduler]:
//!   admission, requirement arbitration by
//!   [`InterruptionBehavior`][cadence_types::InterruptionBehavior], default
//!   commands, mode gating and the ordered run loop.
//! - [`watchdog`] – [`CycleWatchdog`][watchdog::CycleWatchdog]: per-phase
//!   timing of each cycle and overrun detection.

pub mod command;
mod guard;
pub mod requirements;
pub mod scheduler;
pub mod subsystem;
pub mod trigger;
pub mod watchdog;

pub use command::{Command, CommandHandle};
pub use requirements::{RequirementLedger, Requirements};
pub use scheduler::{CommandScheduler, WeakScheduler};
pub use subsystem::{Subsystem, SubsystemHandle};
pub use trigger::{Edge, Trigger};
pub use watchdog::CycleWatchdog;
