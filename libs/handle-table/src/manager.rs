//! Handle table manager: the single access point to per-type tables and to
//! library teardown.
//!
//! Typical flows:
//! - The API layer asks `table_for::<Recognizer>()` and routes every
//!   recognizer handle through that table.
//! - A component that owns resources tied to handles (thread pools, open
//!   files) calls `register_termination` once, at its first use.
//! - The library's unload path calls `run_teardown()` exactly once. Callbacks
//!   run first, in registration order, while every table is still valid;
//!   only then are the tables and their objects discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use crate::config::HandleTableConfig;
use crate::error::HandleResult;
use crate::lifecycle::{Access, Lifecycle, LifecycleState};
use crate::store::{TableStats, TypeTableStore};
use crate::table::HandleTable;
use crate::termination::TerminationRegistry;

/// What a teardown released.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// Termination callbacks that ran.
    pub callbacks: usize,
    /// Tables discarded.
    pub tables: usize,
    /// Objects still tracked when their table was discarded.
    pub objects: usize,
    /// Tables that still held objects, with their counts.
    pub leftovers: Vec<TableStats>,
}

impl TeardownReport {
    fn new(callbacks: usize, released: Vec<TableStats>) -> Self {
        let tables = released.len();
        let leftovers: Vec<TableStats> = released.into_iter().filter(|t| t.live > 0).collect();
        Self {
            callbacks,
            tables,
            objects: leftovers.iter().map(|t| t.live).sum(),
            leftovers,
        }
    }
}

pub struct HandleTableManager {
    lifecycle: Arc<Lifecycle>,
    store: TypeTableStore,
    terminations: TerminationRegistry,
    warn_on_live_objects: bool,
}

static GLOBAL: OnceLock<HandleTableManager> = OnceLock::new();

impl HandleTableManager {
    #[must_use]
    pub fn new(config: &HandleTableConfig) -> Self {
        let lifecycle = Arc::new(Lifecycle::new());
        Self {
            store: TypeTableStore::new(
                Arc::clone(&lifecycle),
                config.max_tables,
                config.max_entries_per_table,
            ),
            terminations: TerminationRegistry::new(config.catch_callback_panics),
            warn_on_live_objects: config.warn_on_live_objects,
            lifecycle,
        }
    }

    /// Process-wide manager, built on first use from
    /// [`HandleTableConfig::load`].
    #[must_use]
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            let config = HandleTableConfig::load().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "using default handle table config");
                HandleTableConfig::default()
            });
            Self::new(&config)
        })
    }

    /// Table for `T`, created on first request.
    ///
    /// # Errors
    /// `InvalidState` after teardown, or during teardown for a type whose
    /// table does not exist yet. `Exhausted` past `max_tables`.
    pub fn table_for<T>(&self) -> HandleResult<Arc<HandleTable<T>>>
    where
        T: Send + Sync + 'static,
    {
        self.lifecycle.activate();
        let gate = self.lifecycle.enter(Access::Read, "table_for")?;
        self.store.get_or_create_table::<T>(*gate)
    }

    /// Registers `callback` to run during teardown, after every callback
    /// registered before it.
    ///
    /// # Errors
    /// `InvalidState` once teardown has begun.
    pub fn register_termination<F>(&self, name: impl Into<String>, callback: F) -> HandleResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.lifecycle.activate();
        let _gate = self
            .lifecycle
            .enter(Access::Create, "register_termination")?;
        self.terminations.register(name, callback)
    }

    /// Runs termination callbacks in registration order, then discards every
    /// table.
    ///
    /// # Errors
    /// `InvalidState` if teardown already ran or is running.
    ///
    /// # Panics
    /// Re-raises a callback's panic when `catch_callback_panics` is off. The
    /// manager is torn down and every table released before the panic
    /// propagates.
    pub fn run_teardown(&self) -> HandleResult<TeardownReport> {
        self.lifecycle.begin_teardown()?;
        tracing::info!(
            callbacks = self.terminations.len(),
            tables = self.store.len(),
            "handle table teardown started"
        );

        let drained = panic::catch_unwind(AssertUnwindSafe(|| self.terminations.drain()));

        self.lifecycle.finish_teardown();
        let released = self.store.teardown();
        let report = TeardownReport::new(drained.as_ref().map_or(0, |n| *n), released);

        if self.warn_on_live_objects {
            for table in &report.leftovers {
                tracing::warn!(
                    type_name = table.type_name,
                    table_id = table.table_id,
                    live = table.live,
                    "releasing objects still tracked at teardown"
                );
            }
        }
        tracing::info!(
            callbacks = report.callbacks,
            tables = report.tables,
            objects = report.objects,
            "handle table teardown finished"
        );

        match drained {
            Ok(_) => Ok(report),
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    #[must_use]
    pub fn stats(&self) -> Vec<TableStats> {
        self.store.stats()
    }
}

impl Default for HandleTableManager {
    fn default() -> Self {
        Self::new(&HandleTableConfig::default())
    }
}

/// [`HandleTableManager::table_for`] on the global manager.
///
/// # Errors
/// See [`HandleTableManager::table_for`].
pub fn table_for<T>() -> HandleResult<Arc<HandleTable<T>>>
where
    T: Send + Sync + 'static,
{
    HandleTableManager::global().table_for::<T>()
}

/// [`HandleTableManager::register_termination`] on the global manager.
///
/// # Errors
/// See [`HandleTableManager::register_termination`].
pub fn register_termination<F>(name: impl Into<String>, callback: F) -> HandleResult<()>
where
    F: FnOnce() + Send + 'static,
{
    HandleTableManager::global().register_termination(name, callback)
}

/// [`HandleTableManager::run_teardown`] on the global manager. Call once,
/// from the library's shutdown path.
///
/// # Errors
/// See [`HandleTableManager::run_teardown`].
pub fn run_teardown() -> HandleResult<TeardownReport> {
    HandleTableManager::global().run_teardown()
}
