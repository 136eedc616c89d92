//! Process-wide lifecycle of a handle table manager.
//!
//! `Uninitialized -> Active -> TearingDown -> TornDown`
//!
//! Operations hold a read guard on the state for their whole duration and
//! transitions take the write guard, so nothing can start before a
//! transition and complete after it. The lock is fair: a waiting teardown
//! blocks new readers, so no code that may re-enter the gate (object
//! destructors, callbacks) is ever run while a guard is held.

use parking_lot::{RwLock, RwLockReadGuard};

use crate::error::{HandleError, HandleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Active,
    /// Termination callbacks are running. The store is still valid but no
    /// new handles, tables or callbacks can be created.
    TearingDown,
    TornDown,
}

/// What an operation is about to do, checked against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// Lookups and releases.
    Read,
    /// Anything that creates a handle, a table or a callback registration.
    Create,
}

impl LifecycleState {
    pub(crate) fn allows(self, access: Access) -> bool {
        match self {
            Self::Uninitialized | Self::Active => true,
            Self::TearingDown => access == Access::Read,
            Self::TornDown => false,
        }
    }

    #[must_use]
    pub fn is_torn_down(self) -> bool {
        self == Self::TornDown
    }
}

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Lazy `Uninitialized -> Active` transition on first use.
    pub(crate) fn activate(&self) {
        if *self.state.read() != LifecycleState::Uninitialized {
            return;
        }
        let mut state = self.state.write();
        if *state == LifecycleState::Uninitialized {
            *state = LifecycleState::Active;
            tracing::debug!("handle table manager activated");
        }
    }

    /// Enters an operation. The returned guard keeps teardown from
    /// progressing until it is dropped.
    pub(crate) fn enter(
        &self,
        access: Access,
        operation: &'static str,
    ) -> HandleResult<RwLockReadGuard<'_, LifecycleState>> {
        let guard = self.state.read();
        if guard.allows(access) {
            Ok(guard)
        } else {
            Err(HandleError::invalid_state(*guard, operation))
        }
    }

    pub(crate) fn begin_teardown(&self) -> HandleResult<()> {
        let mut state = self.state.write();
        match *state {
            LifecycleState::Uninitialized | LifecycleState::Active => {
                *state = LifecycleState::TearingDown;
                Ok(())
            }
            other => Err(HandleError::invalid_state(other, "run_teardown")),
        }
    }

    pub(crate) fn finish_teardown(&self) {
        *self.state.write() = LifecycleState::TornDown;
    }
}
