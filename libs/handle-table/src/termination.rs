//! Ordered termination callbacks.
//!
//! Components that hold state tied to handle tables register a callback once,
//! at first use. Teardown runs them in registration order, before any table
//! is discarded.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};

use crate::error::{HandleError, HandleResult};
use crate::lifecycle::LifecycleState;

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Registration {
    name: String,
    callback: Callback,
}

/// Append-only list of termination callbacks, drained exactly once.
pub struct TerminationRegistry {
    /// `None` once drained.
    callbacks: Mutex<Option<Vec<Registration>>>,
    catch_panics: bool,
}

impl TerminationRegistry {
    #[must_use]
    pub fn new(catch_panics: bool) -> Self {
        Self {
            callbacks: Mutex::new(Some(Vec::new())),
            catch_panics,
        }
    }

    /// Appends `callback` to run at teardown.
    ///
    /// # Errors
    /// `InvalidState` once the registry has been drained.
    pub fn register<F>(&self, name: impl Into<String>, callback: F) -> HandleResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut guard = self.callbacks.lock();
        let Some(callbacks) = guard.as_mut() else {
            return Err(HandleError::invalid_state(
                LifecycleState::TearingDown,
                "register_termination",
            ));
        };
        let name = name.into();
        tracing::debug!(name = %name, position = callbacks.len(), "registered termination callback");
        callbacks.push(Registration {
            name,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Closes the registry and runs every callback in registration order.
    /// Returns how many ran. A second call runs nothing.
    ///
    /// # Panics
    /// Re-raises a callback's panic when panic catching is disabled.
    #[must_use = "the count reports how many callbacks ran"]
    pub fn drain(&self) -> usize {
        // Callbacks run without the lock held so they may use the registry.
        let Some(callbacks) = self.callbacks.lock().take() else {
            return 0;
        };

        let total = callbacks.len();
        for (position, Registration { name, callback }) in callbacks.into_iter().enumerate() {
            tracing::debug!(name = %name, position, "running termination callback");
            if !self.catch_panics {
                callback();
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                tracing::error!(
                    name = %name,
                    position,
                    panic = panic_message(payload.as_ref()),
                    "termination callback panicked"
                );
            }
        }
        total
    }

    /// Callbacks waiting to run.
    #[must_use]
    pub fn len(&self) -> usize {
        self.callbacks.lock().as_ref().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.callbacks.lock().is_none()
    }
}

impl Default for TerminationRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
