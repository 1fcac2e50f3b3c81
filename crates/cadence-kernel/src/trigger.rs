//! [`Trigger`] – declarative bindings from a polled condition to commands.
//!
//! A trigger wraps a zero-argument boolean condition.  Binding it registers
//! an action with the scheduler; in the poll phase of every cycle the
//! scheduler samples the condition, compares it with the previous sample and
//! hands the resulting [`Edge`] to the action.
//!
//! | Binding | Rising | Falling |
//! |---------|--------|---------|
//! | [`on_true`][Trigger::on_true] | schedule | – |
//! | [`on_false`][Trigger::on_false] | – | schedule |
//! | [`on_change`][Trigger::on_change] | schedule | schedule |
//! | [`while_true`][Trigger::while_true] | schedule | cancel |
//! | [`while_false`][Trigger::while_false] | cancel | schedule |
//! | [`toggle_on_true`][Trigger::toggle_on_true] | toggle | – |
//! | [`toggle_on_false`][Trigger::toggle_on_false] | – | toggle |
//!
//! Actions run inside the poll phase, so every schedule or cancel they issue
//! is buffered until the end of the cycle.  The first sample of a binding is
//! taken when it is bound, so a condition that is already true does not
//! produce a rising edge on the first cycle.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use cadence_kernel::{Command, CommandHandle, CommandScheduler, Trigger};
//!
//! struct Shoot;
//! impl Command for Shoot {}
//!
//! let scheduler = CommandScheduler::new();
//! let pressed = Rc::new(Cell::new(false));
//! let button = pressed.clone();
//!
//! let shoot = CommandHandle::new(Shoot);
//! Trigger::new(&scheduler, move || button.get()).while_true(&shoot);
//!
//! pressed.set(true);
//! scheduler.run();
//! assert!(scheduler.is_scheduled(&shoot));
//!
//! pressed.set(false);
//! scheduler.run();
//! assert!(!scheduler.is_scheduled(&shoot));
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cadence_types::{CommandError, CommandPhase, SchedulerError};

use crate::command::CommandHandle;
use crate::guard::guarded;
use crate::scheduler::{CommandScheduler, WeakScheduler};

static NEXT_BINDING: AtomicU64 = AtomicU64::new(1);

type Condition = Rc<dyn Fn() -> bool>;

// ─────────────────────────────────────────────────────────────────────────────
// Edge
// ─────────────────────────────────────────────────────────────────────────────

/// What a binding observed between two consecutive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
    HeldTrue,
    HeldFalse,
}

impl Edge {
    pub fn between(previous: bool, current: bool) -> Self {
        match (previous, current) {
            (false, true) => Edge::Rising,
            (true, false) => Edge::Falling,
            (true, true) => Edge::HeldTrue,
            (false, false) => Edge::HeldFalse,
        }
    }

    /// `true` for [`Rising`][Edge::Rising] and [`Falling`][Edge::Falling].
    pub fn is_change(self) -> bool {
        matches!(self, Edge::Rising | Edge::Falling)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TriggerBinding
// ─────────────────────────────────────────────────────────────────────────────

/// One registered condition/action pair with its last observed value.
pub(crate) struct TriggerBinding {
    label: String,
    condition: Condition,
    last: bool,
    action: Box<dyn FnMut(Edge)>,
}

impl TriggerBinding {
    fn new(condition: Condition, action: Box<dyn FnMut(Edge)>) -> Self {
        let label = format!("trigger#{}", NEXT_BINDING.fetch_add(1, Ordering::Relaxed));
        let sample = condition.clone();
        let last = guarded(|| Ok(sample())).unwrap_or(false);
        Self {
            label,
            condition,
            last,
            action,
        }
    }

    /// Sample the condition and run the action with the detected edge.
    ///
    /// A failing condition leaves the last sample untouched and skips the
    /// action.
    pub(crate) fn poll(&mut self) -> Result<(), SchedulerError> {
        let condition = self.condition.clone();
        let current = match guarded(|| Ok(condition())) {
            Ok(current) => current,
            Err(source) => return Err(self.failure(source)),
        };
        let edge = Edge::between(self.last, current);
        self.last = current;

        let action = &mut self.action;
        let result = guarded(|| {
            action(edge);
            Ok(())
        });
        result.map_err(|source| self.failure(source))
    }

    fn failure(&self, source: CommandError) -> SchedulerError {
        SchedulerError::CallbackFailure {
            command: self.label.clone(),
            phase: CommandPhase::Trigger,
            source,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trigger
// ─────────────────────────────────────────────────────────────────────────────

/// A boolean condition that can be bound to commands on a scheduler.
///
/// Cloning is cheap; clones share the condition.  Binding methods return
/// `&Self` so several bindings can be chained on one trigger.
#[derive(Clone)]
pub struct Trigger {
    scheduler: WeakScheduler,
    condition: Condition,
}

impl Trigger {
    pub fn new(scheduler: &CommandScheduler, condition: impl Fn() -> bool + 'static) -> Self {
        Self {
            scheduler: scheduler.downgrade(),
            condition: Rc::new(condition),
        }
    }

    /// Sample the condition now.
    pub fn get(&self) -> bool {
        (self.condition)()
    }

    /// Bind a raw action that receives the edge every cycle.
    pub fn on_edge(&self, action: impl FnMut(Edge) + 'static) -> &Self {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.add_binding(TriggerBinding::new(self.condition.clone(), Box::new(action)));
        }
        self
    }

    /// Schedule `command` when the condition becomes true.
    pub fn on_true(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| {
            if edge == Edge::Rising {
                scheduler.schedule(command);
            }
        })
    }

    /// Schedule `command` when the condition becomes false.
    pub fn on_false(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| {
            if edge == Edge::Falling {
                scheduler.schedule(command);
            }
        })
    }

    /// Schedule `command` whenever the condition changes.
    pub fn on_change(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| {
            if edge.is_change() {
                scheduler.schedule(command);
            }
        })
    }

    /// Schedule `command` when the condition becomes true and cancel it when
    /// the condition becomes false.
    pub fn while_true(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| match edge {
            Edge::Rising => scheduler.schedule(command),
            Edge::Falling => scheduler.cancel(command),
            _ => {}
        })
    }

    pub fn while_false(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| match edge {
            Edge::Falling => scheduler.schedule(command),
            Edge::Rising => scheduler.cancel(command),
            _ => {}
        })
    }

    /// On every rising edge, cancel `command` if it is scheduled, otherwise
    /// schedule it.
    pub fn toggle_on_true(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| {
            if edge == Edge::Rising {
                toggle(scheduler, command);
            }
        })
    }

    pub fn toggle_on_false(&self, command: &CommandHandle) -> &Self {
        self.bind(command, |edge, scheduler, command| {
            if edge == Edge::Falling {
                toggle(scheduler, command);
            }
        })
    }

    // ── Combinators ─────────────────────────────────────────────────────────

    pub fn and(&self, other: &Trigger) -> Trigger {
        let (a, b) = (self.condition.clone(), other.condition.clone());
        self.derive(move || a() && b())
    }

    pub fn or(&self, other: &Trigger) -> Trigger {
        let (a, b) = (self.condition.clone(), other.condition.clone());
        self.derive(move || a() || b())
    }

    pub fn negate(&self) -> Trigger {
        let a = self.condition.clone();
        self.derive(move || !a())
    }

    /// A trigger that only turns true once this one has been true for at
    /// least `hold`.  It turns false as soon as this one does.
    pub fn debounce(&self, hold: Duration) -> Trigger {
        let a = self.condition.clone();
        let since: Cell<Option<Instant>> = Cell::new(None);
        self.derive(move || {
            if !a() {
                since.set(None);
                return false;
            }
            let started = match since.get() {
                Some(started) => started,
                None => {
                    let now = Instant::now();
                    since.set(Some(now));
                    now
                }
            };
            started.elapsed() >= hold
        })
    }

    fn derive(&self, condition: impl Fn() -> bool + 'static) -> Trigger {
        Trigger {
            scheduler: self.scheduler.clone(),
            condition: Rc::new(condition),
        }
    }

    fn bind(
        &self,
        command: &CommandHandle,
        react: impl Fn(Edge, &CommandScheduler, &CommandHandle) + 'static,
    ) -> &Self {
        let scheduler = self.scheduler.clone();
        let command = command.clone();
        self.on_edge(move |edge| {
            if let Some(scheduler) = scheduler.upgrade() {
                react(edge, &scheduler, &command);
            }
        })
    }
}

fn toggle(scheduler: &CommandScheduler, command: &CommandHandle) {
    if scheduler.is_scheduled(command) {
        scheduler.cancel(command);
    } else {
        scheduler.schedule(command);
    }
}
