//! Error taxonomy for handle operations.
//!
//! Every failure is returned to the immediate caller as a value. The
//! boundary layer turns a [`HandleError`] into a stable numeric
//! [`ErrorCode`] with [`HandleError::code`].

use crate::handle::Handle;
use crate::lifecycle::LifecycleState;
use crate::type_key::TypeKey;

/// Result alias used by every fallible operation in this crate.
pub type HandleResult<T> = Result<T, HandleError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandleError {
    #[error("invalid handle {handle} for type={type_key}")]
    InvalidHandle { handle: Handle, type_key: TypeKey },

    #[error("handle {handle} was issued by table {found}, expected table {expected}")]
    WrongType {
        handle: Handle,
        expected: u16,
        found: u16,
    },

    #[error("operation '{operation}' is not allowed in state {state:?}")]
    InvalidState {
        state: LifecycleState,
        operation: &'static str,
    },

    #[error("{what} exhausted")]
    Exhausted { what: &'static str },

    #[error("type mismatch in table store for type={type_key}")]
    TypeMismatch { type_key: TypeKey },
}

impl HandleError {
    /// Numeric code reported across the API boundary.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHandle { .. } | Self::WrongType { .. } => ErrorCode::InvalidHandle,
            Self::InvalidState { .. } => ErrorCode::InvalidState,
            Self::Exhausted { .. } => ErrorCode::OutOfMemory,
            Self::TypeMismatch { .. } => ErrorCode::UnhandledException,
        }
    }

    pub(crate) fn invalid_state(state: LifecycleState, operation: &'static str) -> Self {
        Self::InvalidState { state, operation }
    }
}

/// Stable error codes exposed to C-style callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x000,
    UnhandledException = 0x003,
    InvalidState = 0x00f,
    OutOfMemory = 0x01a,
    InvalidHandle = 0x021,
}

impl ErrorCode {
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::NoError
    }
}

impl<T> From<&HandleResult<T>> for ErrorCode {
    fn from(result: &HandleResult<T>) -> Self {
        match result {
            Ok(_) => Self::NoError,
            Err(e) => e.code(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    struct Recognizer;

    #[test]
    fn invalid_and_wrong_type_share_the_invalid_handle_code() {
        let invalid = HandleError::InvalidHandle {
            handle: Handle::INVALID,
            type_key: TypeKey::of::<Recognizer>(),
        };
        let wrong = HandleError::WrongType {
            handle: Handle::from_raw(0x0002_0000_0000_0001),
            expected: 1,
            found: 2,
        };

        assert_eq!(invalid.code(), ErrorCode::InvalidHandle);
        assert_eq!(wrong.code(), ErrorCode::InvalidHandle);
        assert_eq!(ErrorCode::InvalidHandle.as_raw(), 0x021);
    }

    #[test]
    fn state_and_exhaustion_codes() {
        let state = HandleError::invalid_state(LifecycleState::TornDown, "find");
        assert_eq!(state.code(), ErrorCode::InvalidState);
        assert_eq!(
            HandleError::Exhausted { what: "table ids" }.code(),
            ErrorCode::OutOfMemory
        );
    }

    #[test]
    fn result_converts_to_code() {
        let ok: HandleResult<u8> = Ok(1);
        let err: HandleResult<u8> = Err(HandleError::Exhausted { what: "serials" });

        assert!(ErrorCode::from(&ok).is_success());
        assert_eq!(ErrorCode::from(&err), ErrorCode::OutOfMemory);
    }

    #[test]
    fn messages_name_the_type_and_state() {
        let err = HandleError::InvalidHandle {
            handle: Handle::from_raw(0x0001_0000_0000_0007),
            type_key: TypeKey::of::<Recognizer>(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Recognizer"), "got: {msg}");
        assert!(msg.contains("0x0001000000000007"), "got: {msg}");

        let msg = HandleError::invalid_state(LifecycleState::TornDown, "insert").to_string();
        assert!(msg.contains("insert") && msg.contains("TornDown"), "got: {msg}");
    }
}
