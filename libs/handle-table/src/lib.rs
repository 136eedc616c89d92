#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Handle tables for a native API boundary.
//!
//! Objects handed to callers outside the library are stored in per-type
//! [`HandleTable`]s and referred to by opaque [`Handle`] values. A single
//! [`HandleTableManager`] owns every table and the ordered list of
//! termination callbacks, and tears both down explicitly from the library's
//! shutdown path instead of relying on static destructor order.
//!
//! ```
//! use handle_table::{HandleTableManager, LifecycleState};
//!
//! struct Recognizer {
//!     language: &'static str,
//! }
//!
//! let manager = HandleTableManager::default();
//! let recognizers = manager.table_for::<Recognizer>()?;
//! let h = recognizers.insert(Recognizer { language: "en-US" })?;
//! assert_eq!(recognizers.get(h)?.language, "en-US");
//!
//! manager.register_termination("audio-pump", || { /* stop worker threads */ })?;
//! let report = manager.run_teardown()?;
//! assert_eq!(report.objects, 1);
//! assert_eq!(manager.state(), LifecycleState::TornDown);
//! assert!(recognizers.find(h).is_err());
//! # Ok::<(), handle_table::HandleError>(())
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod lifecycle;
pub mod manager;
pub mod store;
pub mod table;
pub mod termination;
pub mod type_key;

pub use config::{ConfigError, HandleTableConfig};
pub use error::{ErrorCode, HandleError, HandleResult};
pub use handle::Handle;
pub use lifecycle::LifecycleState;
pub use manager::{
    HandleTableManager, TeardownReport, register_termination, run_teardown, table_for,
};
pub use store::{TableStats, TypeTableStore};
pub use table::HandleTable;
pub use termination::TerminationRegistry;
pub use type_key::TypeKey;
