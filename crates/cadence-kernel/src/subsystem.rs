//! [`Subsystem`] – an exclusive-access group of robot hardware.
//!
//! A subsystem owns actuators and sensors (a drivetrain, an intake, an arm).
//! Commands declare the subsystems they drive as *requirements*; the
//! scheduler guarantees that at most one scheduled command holds any given
//! subsystem.
//!
//! Concrete subsystems are ordinary structs.  Keep an `Rc<RefCell<S>>` for
//! typed access from your commands, and hand a [`SubsystemHandle`] built from
//! it to the scheduler and to requirement sets:
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use cadence_kernel::{Subsystem, SubsystemHandle};
//!
//! struct Intake { roller: f32 }
//!
//! impl Subsystem for Intake {
//!     fn name(&self) -> &str { "intake" }
//! }
//!
//! let intake = Rc::new(RefCell::new(Intake { roller: 0.0 }));
//! let handle = SubsystemHandle::new(intake.clone());
//!
//! assert_eq!(handle.name(), "intake");
//! intake.borrow_mut().roller = 1.0;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use cadence_types::{CommandError, SubsystemId};

use crate::guard::guarded;

/// Behavior of a subsystem that is independent of which command owns it.
pub trait Subsystem {
    /// Stable, human-readable name used in logs and error reports.
    fn name(&self) -> &str;

    /// Called once per scheduler cycle, whether or not a command holds the
    /// subsystem.  Typical uses: refreshing sensor caches, safety clamps.
    fn periodic(&mut self) -> Result<(), CommandError> {
        Ok(())
    }
}

/// Cloneable, identity-comparable handle to a registered subsystem.
///
/// Two handles are equal when they were cloned from the same
/// [`SubsystemHandle::new`] call.
#[derive(Clone)]
pub struct SubsystemHandle {
    id: SubsystemId,
    name: Rc<str>,
    inner: Rc<RefCell<dyn Subsystem>>,
}

impl SubsystemHandle {
    /// Wrap a shared subsystem.  The name is captured once, here.
    pub fn new<S: Subsystem + 'static>(subsystem: Rc<RefCell<S>>) -> Self {
        let name: Rc<str> = Rc::from(subsystem.borrow().name());
        Self {
            id: SubsystemId::next(),
            name,
            inner: subsystem,
        }
    }

    /// A subsystem with no hardware and an empty periodic hook.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(Rc::new(RefCell::new(Marker { name: name.into() })))
    }

    pub fn id(&self) -> SubsystemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the periodic hook, containing panics and re-entrant borrows.
    pub(crate) fn periodic(&self) -> Result<(), CommandError> {
        let mut subsystem = self
            .inner
            .try_borrow_mut()
            .map_err(|_| CommandError::Reentrant(self.name.to_string()))?;
        guarded(|| subsystem.periodic())
    }
}

impl PartialEq for SubsystemHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubsystemHandle {}

impl Hash for SubsystemHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SubsystemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemHandle")
            .field("id", &self.id)
            .field("name", &&*self.name)
            .finish()
    }
}

struct Marker {
    name: String,
}

impl Subsystem for Marker {
    fn name(&self) -> &str {
        &self.name
    }
}
