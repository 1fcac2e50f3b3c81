//! `cadence-runtime` – Compositions, Leaf Commands & the Robot Loop
//!
//! Everything a robot program builds on top of the scheduler core in
//! `cadence-kernel`.
//!
//! # Modules
//!
//! - [`commands`] – leaf commands: [`FunctionalCommand`][commands::FunctionalCommand],
//!   [`instant`][commands::instant], [`run`][commands::run],
//!   [`start_end`][commands::start_end], [`WaitCommand`][commands::WaitCommand],
//!   [`WaitUntilCommand`][commands::WaitUntilCommand],
//!   [`LogCommand`][commands::LogCommand], [`none`][commands::none] and
//!   [`ScheduleCommand`][commands::ScheduleCommand].
//! - [`composition`] – [`compose`][composition::compose]: the construction-time
//!   checks every group shares (requirement overlap, single ownership of
//!   children) and the aggregation of group properties.
//! - [`sequential`], [`parallel`], [`race`], [`deadline`] – the four command
//!   groups.
//! - [`conditional`] – [`ConditionalCommand`][conditional::ConditionalCommand]
//!   and [`SelectCommand`][conditional::SelectCommand]: pick a branch at
//!   initialize time.
//! - [`wrapper`] – [`WrappedCommand`][wrapper::WrappedCommand] (property
//!   overrides, `finally` hooks) and [`RepeatCommand`][wrapper::RepeatCommand].
//! - [`decorators`] – [`CommandExt`][decorators::CommandExt]: fluent
//!   `with_timeout`, `until`, `and_then`, `along_with`, `repeatedly`, … on any
//!   [`CommandHandle`][cadence_kernel::CommandHandle].
//! - [`robot_loop`] – [`RobotLoop`][robot_loop::RobotLoop]: runs the scheduler
//!   at a fixed period.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP export.

pub mod commands;
pub mod composition;
pub mod conditional;
pub mod deadline;
pub mod decorators;
pub mod parallel;
pub mod race;
pub mod robot_loop;
pub mod sequential;
pub mod telemetry;
pub mod wrapper;

#[cfg(test)]
mod testing;

pub use commands::{FunctionalCommand, LogCommand, ScheduleCommand, WaitCommand, WaitUntilCommand};
pub use conditional::{ConditionalCommand, SelectCommand};
pub use deadline::DeadlineGroup;
pub use decorators::CommandExt;
pub use parallel::ParallelGroup;
pub use race::RaceGroup;
pub use robot_loop::RobotLoop;
pub use sequential::SequentialGroup;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use wrapper::{RepeatCommand, WrappedCommand};

// Re-export the kernel so robot programs can depend on this crate alone.
pub use cadence_kernel as kernel;
pub use cadence_types as types;
