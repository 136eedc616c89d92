//! Type table store: `TypeKey -> HandleTable<T>`.
//!
//! Implementation details:
//! - Key = `TypeKey` (from `TypeId`), so two requests for the same type always
//!   resolve to the same table.
//! - Value = the table as `Arc<dyn ErasedTable>` for teardown and stats, and
//!   as `Arc<dyn Any>` for the typed downcast on lookup.
//! - Tables are created lazily under the write lock after a read-locked miss;
//!   racing first uses converge on a single table.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HandleError, HandleResult};
use crate::lifecycle::{Access, Lifecycle, LifecycleState};
use crate::table::{ErasedTable, HandleTable};
use crate::type_key::TypeKey;

struct Slot {
    erased: Arc<dyn ErasedTable>,
    any: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Tables {
    by_type: HashMap<TypeKey, Slot>,
    last_table_id: u16,
}

/// Live-object count of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub type_name: &'static str,
    pub table_id: u16,
    pub live: usize,
}

pub struct TypeTableStore {
    lifecycle: Arc<Lifecycle>,
    max_tables: u16,
    max_entries_per_table: Option<usize>,
    tables: RwLock<Tables>,
}

impl TypeTableStore {
    pub(crate) fn new(
        lifecycle: Arc<Lifecycle>,
        max_tables: u16,
        max_entries_per_table: Option<usize>,
    ) -> Self {
        Self {
            lifecycle,
            max_tables,
            max_entries_per_table,
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Returns the table for `T`, creating it on first use if `state` allows
    /// creation. The caller holds the lifecycle gate for `state`.
    pub(crate) fn get_or_create_table<T>(
        &self,
        state: LifecycleState,
    ) -> HandleResult<Arc<HandleTable<T>>>
    where
        T: Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();

        if let Some(slot) = self.tables.read().by_type.get(&type_key) {
            return Self::downcast(type_key, slot);
        }

        let mut tables = self.tables.write();
        if let Some(slot) = tables.by_type.get(&type_key) {
            return Self::downcast(type_key, slot);
        }
        if !state.allows(Access::Create) {
            return Err(HandleError::invalid_state(state, "table_for"));
        }
        if tables.last_table_id >= self.max_tables {
            return Err(HandleError::Exhausted { what: "table ids" });
        }
        tables.last_table_id += 1;
        let table_id = tables.last_table_id;

        let table = Arc::new(HandleTable::<T>::new(
            table_id,
            self.max_entries_per_table,
            Arc::clone(&self.lifecycle),
        ));
        let erased: Arc<dyn ErasedTable> = table.clone();
        let any = Arc::clone(&erased).into_any();
        tables.by_type.insert(type_key, Slot { erased, any });

        tracing::debug!(type_name = type_key.type_name(), table_id, "created handle table");
        Ok(table)
    }

    fn downcast<T>(type_key: TypeKey, slot: &Slot) -> HandleResult<Arc<HandleTable<T>>>
    where
        T: Send + Sync + 'static,
    {
        Arc::clone(&slot.any)
            .downcast::<HandleTable<T>>()
            .map_err(|_| HandleError::TypeMismatch { type_key })
    }

    /// Discards every table, releasing the objects they hold. Returns one
    /// entry per discarded table, ordered by table id, with `live` set to the
    /// number of objects it released. A second call returns nothing.
    pub(crate) fn teardown(&self) -> Vec<TableStats> {
        let taken: Vec<Slot> = {
            let mut tables = self.tables.write();
            tables.by_type.drain().map(|(_, slot)| slot).collect()
        };

        let mut released: Vec<TableStats> = taken
            .into_iter()
            .map(|slot| TableStats {
                type_name: slot.erased.type_key().type_name(),
                table_id: slot.erased.table_id(),
                live: slot.erased.release_all(),
            })
            .collect();
        released.sort_by_key(|s| s.table_id);
        released
    }

    /// Per-table diagnostics, ordered by table id.
    #[must_use]
    pub fn stats(&self) -> Vec<TableStats> {
        let mut stats: Vec<TableStats> = self
            .tables
            .read()
            .by_type
            .values()
            .map(|slot| TableStats {
                type_name: slot.erased.type_key().type_name(),
                table_id: slot.erased.table_id(),
                live: slot.erased.live(),
            })
            .collect();
        stats.sort_by_key(|s| s.table_id);
        stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().by_type.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
