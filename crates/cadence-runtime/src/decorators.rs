//! [`CommandExt`] – fluent composition on [`CommandHandle`].
//!
//! Every decorator adopts the receiver (and any other commands passed in)
//! into a new composition and returns the handle of that composition.  The
//! receiver becomes composed: schedule the returned handle, not the original.
//!
//! ```
//! use std::time::Duration;
//! use cadence_kernel::{CommandHandle, CommandScheduler};
//! use cadence_runtime::commands::{self, LogCommand};
//! use cadence_runtime::decorators::CommandExt;
//!
//! let scheduler = CommandScheduler::new();
//! let auto = CommandHandle::new(LogCommand::new("drive out"))
//!     .and_then(commands::run(|| {}, &Default::default()))
//!     .and_then(|seq| seq.with_timeout(Duration::from_secs(15)))
//!     .and_then(|cmd| cmd.with_name("autonomous"))
//!     .unwrap();
//!
//! scheduler.schedule(&auto);
//! assert_eq!(auto.name(), "autonomous");
//! ```

use std::time::Duration;

use cadence_kernel::CommandHandle;
use cadence_types::{InterruptionBehavior, SchedulerError};

use crate::commands::{WaitCommand, WaitUntilCommand, none};
use crate::conditional::either;
use crate::deadline::deadline;
use crate::parallel::parallel;
use crate::race::race;
use crate::sequential::sequence;
use crate::wrapper::{RepeatCommand, WrappedCommand};

/// Result of every decorator.  Chain further decorators with
/// [`Result::and_then`].
pub type Decorated = Result<CommandHandle, SchedulerError>;

pub trait CommandExt {
    /// Interrupt after `timeout` unless finished earlier.
    fn with_timeout(&self, timeout: Duration) -> Decorated;

    /// Finish (interrupting the command) once `condition` is true.
    fn until(&self, condition: impl FnMut() -> bool + 'static) -> Decorated;

    /// Run only while `condition` holds; finish as soon as it is false.
    fn only_while(&self, condition: impl Fn() -> bool + 'static) -> Decorated;

    /// Run `before` first, then this command.
    fn before_starting(&self, before: CommandHandle) -> Decorated;

    /// Run this command, then `next`.
    fn and_then(&self, next: CommandHandle) -> Decorated;

    /// Run together with `others` until all have finished.
    fn along_with(&self, others: Vec<CommandHandle>) -> Decorated;

    /// Run together with `others` until the first one finishes.
    fn race_with(&self, others: Vec<CommandHandle>) -> Decorated;

    /// Run `others` alongside this command, stopping them when it finishes.
    fn deadline_for(&self, others: Vec<CommandHandle>) -> Decorated;

    /// Restart whenever finished; never finishes on its own.
    fn repeatedly(&self) -> Decorated;

    /// Skip the command (finish immediately) when `condition` is true at
    /// initialize time.
    fn unless(&self, condition: impl Fn() -> bool + 'static) -> Decorated;

    /// Run the command only when `condition` is true at initialize time.
    fn only_if(&self, condition: impl Fn() -> bool + 'static) -> Decorated;

    fn ignoring_disable(&self, runs_when_disabled: bool) -> Decorated;

    fn with_interrupt_behavior(&self, behavior: InterruptionBehavior) -> Decorated;

    fn with_name(&self, name: impl Into<String>) -> Decorated;

    /// Run `f(interrupted)` after the command ends, however it ends.
    fn finally_do(&self, f: impl FnMut(bool) + 'static) -> Decorated;
}

fn wrap(command: &CommandHandle, f: impl FnOnce(WrappedCommand) -> WrappedCommand) -> Decorated {
    WrappedCommand::new(command.clone()).map(|w| CommandHandle::new(f(w)))
}

impl CommandExt for CommandHandle {
    fn with_timeout(&self, timeout: Duration) -> Decorated {
        self.race_with(vec![CommandHandle::new(WaitCommand::new(timeout))])
    }

    fn until(&self, condition: impl FnMut() -> bool + 'static) -> Decorated {
        self.race_with(vec![CommandHandle::new(WaitUntilCommand::new(condition))])
    }

    fn only_while(&self, condition: impl Fn() -> bool + 'static) -> Decorated {
        self.until(move || !condition())
    }

    fn before_starting(&self, before: CommandHandle) -> Decorated {
        sequence(vec![before, self.clone()])
    }

    fn and_then(&self, next: CommandHandle) -> Decorated {
        sequence(vec![self.clone(), next])
    }

    fn along_with(&self, others: Vec<CommandHandle>) -> Decorated {
        let mut children = vec![self.clone()];
        children.extend(others);
        parallel(children)
    }

    fn race_with(&self, others: Vec<CommandHandle>) -> Decorated {
        let mut children = vec![self.clone()];
        children.extend(others);
        race(children)
    }

    fn deadline_for(&self, others: Vec<CommandHandle>) -> Decorated {
        deadline(self.clone(), others)
    }

    fn repeatedly(&self) -> Decorated {
        RepeatCommand::new(self.clone()).map(CommandHandle::new)
    }

    fn unless(&self, condition: impl Fn() -> bool + 'static) -> Decorated {
        either(none(), self.clone(), condition)
    }

    fn only_if(&self, condition: impl Fn() -> bool + 'static) -> Decorated {
        self.unless(move || !condition())
    }

    fn ignoring_disable(&self, runs_when_disabled: bool) -> Decorated {
        wrap(self, |w| w.runs_when_disabled(runs_when_disabled))
    }

    fn with_interrupt_behavior(&self, behavior: InterruptionBehavior) -> Decorated {
        wrap(self, |w| w.interruption_behavior(behavior))
    }

    fn with_name(&self, name: impl Into<String>) -> Decorated {
        let name = name.into();
        wrap(self, |w| w.named(name))
    }

    fn finally_do(&self, f: impl FnMut(bool) + 'static) -> Decorated {
        wrap(self, |w| w.finally(f))
    }
}
