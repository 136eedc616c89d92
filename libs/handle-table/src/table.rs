//! Per-type handle table.
//!
//! Implementation details:
//! - Value = `Arc<T>`; the table owns one strong reference per tracked object.
//! - Lookups hand out clones of that `Arc`, so an object found before a
//!   concurrent `erase` stays alive until the caller drops it.
//! - Released objects are dropped after every lock is let go, so a
//!   destructor may call back into the table.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{HandleError, HandleResult};
use crate::handle::{Handle, MAX_SERIAL};
use crate::lifecycle::{Access, Lifecycle};
use crate::type_key::TypeKey;

struct Entries<T> {
    by_handle: HashMap<Handle, Arc<T>>,
    /// Reverse index keyed by the object's address. Addresses are stable and
    /// unique while the table holds its strong reference.
    by_object: HashMap<usize, Handle>,
    next_serial: u64,
}

impl<T> Entries<T> {
    fn new() -> Self {
        Self {
            by_handle: HashMap::new(),
            by_object: HashMap::new(),
            next_serial: 1,
        }
    }

    /// Takes every entry out, leaving the serial counter in place so that
    /// handles issued before stay retired.
    fn take_all(&mut self) -> Vec<Arc<T>> {
        self.by_object.clear();
        self.by_handle.drain().map(|(_, obj)| obj).collect()
    }
}

fn address_of<T>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).addr()
}

/// Mapping from handle to the object of one fixed type.
///
/// Tables are obtained from [`crate::HandleTableManager::table_for`]; they are
/// never constructed directly by callers.
pub struct HandleTable<T> {
    type_key: TypeKey,
    table_id: u16,
    max_entries: Option<usize>,
    lifecycle: Arc<Lifecycle>,
    entries: RwLock<Entries<T>>,
}

impl<T> HandleTable<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        table_id: u16,
        max_entries: Option<usize>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            type_key: TypeKey::of::<T>(),
            table_id,
            max_entries,
            lifecycle,
            entries: RwLock::new(Entries::new()),
        }
    }

    #[inline]
    #[must_use]
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    #[inline]
    #[must_use]
    pub fn table_id(&self) -> u16 {
        self.table_id
    }

    /// Takes ownership of `value` and returns a fresh handle for it.
    ///
    /// # Errors
    /// `InvalidState` once teardown has begun, `Exhausted` when the table is
    /// full or ran out of serials.
    pub fn insert(&self, value: T) -> HandleResult<Handle> {
        self.track(Arc::new(value))
    }

    /// Tracks a shared object. Tracking the same allocation twice returns the
    /// handle it already has.
    ///
    /// # Errors
    /// Same as [`HandleTable::insert`].
    pub fn track(&self, object: Arc<T>) -> HandleResult<Handle> {
        let (result, rejected) = self.track_gated(object);
        // A rejected object may be the last reference; drop it outside the gate.
        drop(rejected);
        let handle = result?;
        tracing::debug!(
            type_name = self.type_key.type_name(),
            table_id = self.table_id,
            %handle,
            "tracking handle"
        );
        Ok(handle)
    }

    fn track_gated(&self, object: Arc<T>) -> (HandleResult<Handle>, Option<Arc<T>>) {
        let _gate = match self.lifecycle.enter(Access::Create, "track") {
            Ok(gate) => gate,
            Err(e) => return (Err(e), Some(object)),
        };
        let address = address_of(&object);
        let mut entries = self.entries.write();

        if let Some(existing) = entries.by_object.get(&address) {
            return (Ok(*existing), Some(object));
        }

        if self
            .max_entries
            .is_some_and(|max| entries.by_handle.len() >= max)
        {
            let err = HandleError::Exhausted {
                what: "table capacity",
            };
            return (Err(err), Some(object));
        }

        let serial = entries.next_serial;
        if serial > MAX_SERIAL {
            let err = HandleError::Exhausted {
                what: "handle serials",
            };
            return (Err(err), Some(object));
        }
        entries.next_serial = serial + 1;

        let handle = Handle::compose(self.table_id, serial);
        entries.by_handle.insert(handle, object);
        entries.by_object.insert(address, handle);
        (Ok(handle), None)
    }

    /// Looks up a live object.
    ///
    /// Unknown, erased and foreign handles all report `Ok(None)`.
    ///
    /// # Errors
    /// `InvalidState` after teardown.
    pub fn find(&self, handle: Handle) -> HandleResult<Option<Arc<T>>> {
        let _gate = self.lifecycle.enter(Access::Read, "find")?;
        if handle.is_valid() && handle.table_id() != self.table_id {
            tracing::debug!(
                type_name = self.type_key.type_name(),
                table_id = self.table_id,
                %handle,
                "handle belongs to another table"
            );
            return Ok(None);
        }
        Ok(self.entries.read().by_handle.get(&handle).cloned())
    }

    /// Boundary-facing lookup: absence is an error.
    ///
    /// # Errors
    /// `WrongType` if another table issued `handle`, `InvalidHandle` if it is
    /// not live here, `InvalidState` after teardown.
    pub fn get(&self, handle: Handle) -> HandleResult<Arc<T>> {
        if handle.is_valid() && handle.table_id() != self.table_id {
            // Still report post-teardown use as a state problem.
            let _gate = self.lifecycle.enter(Access::Read, "get")?;
            return Err(HandleError::WrongType {
                handle,
                expected: self.table_id,
                found: handle.table_id(),
            });
        }
        self.find(handle)?.ok_or(HandleError::InvalidHandle {
            handle,
            type_key: self.type_key,
        })
    }

    /// # Errors
    /// `InvalidState` after teardown.
    pub fn contains(&self, handle: Handle) -> HandleResult<bool> {
        let _gate = self.lifecycle.enter(Access::Read, "contains")?;
        Ok(self.entries.read().by_handle.contains_key(&handle))
    }

    /// Reverse lookup by object identity.
    ///
    /// # Errors
    /// `InvalidState` after teardown.
    pub fn handle_of(&self, object: &Arc<T>) -> HandleResult<Option<Handle>> {
        let _gate = self.lifecycle.enter(Access::Read, "handle_of")?;
        Ok(self
            .entries
            .read()
            .by_object
            .get(&address_of(object))
            .copied())
    }

    /// Removes `handle`, releasing the table's reference to its object.
    /// Returns whether anything was removed.
    ///
    /// # Errors
    /// `InvalidState` after teardown.
    pub fn erase(&self, handle: Handle) -> HandleResult<bool> {
        let removed = {
            let _gate = self.lifecycle.enter(Access::Read, "erase")?;
            let mut entries = self.entries.write();
            let removed = entries.by_handle.remove(&handle);
            if let Some(object) = &removed {
                entries.by_object.remove(&address_of(object));
            }
            removed
        };

        let Some(object) = removed else {
            return Ok(false);
        };
        tracing::debug!(
            type_name = self.type_key.type_name(),
            table_id = self.table_id,
            %handle,
            "stopped tracking handle"
        );
        drop(object);
        Ok(true)
    }

    /// Stops tracking `object`, whatever handle it was given.
    ///
    /// # Errors
    /// `InvalidState` after teardown.
    pub fn erase_object(&self, object: &Arc<T>) -> HandleResult<bool> {
        match self.handle_of(object)? {
            Some(handle) => self.erase(handle),
            None => Ok(false),
        }
    }

    /// Releases every object in this table. Returns how many were released.
    ///
    /// # Errors
    /// `InvalidState` after teardown.
    pub fn clear(&self) -> HandleResult<usize> {
        let released = {
            let _gate = self.lifecycle.enter(Access::Read, "clear")?;
            self.entries.write().take_all()
        };
        Ok(released.len())
    }

    /// Number of live handles. Diagnostics only; 0 once teardown finished.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.lifecycle.enter(Access::Read, "len") {
            Ok(_gate) => self.entries.read().by_handle.len(),
            Err(_) => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("type_key", &self.type_key)
            .field("table_id", &self.table_id)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

/// Type-erased view of a table, used by the store for teardown and stats.
pub(crate) trait ErasedTable: Send + Sync {
    fn type_key(&self) -> TypeKey;
    fn table_id(&self) -> u16;
    fn live(&self) -> usize;
    /// Drops every entry without consulting the lifecycle gate.
    fn release_all(&self) -> usize;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> ErasedTable for HandleTable<T>
where
    T: Send + Sync + 'static,
{
    fn type_key(&self) -> TypeKey {
        self.type_key
    }

    fn table_id(&self) -> u16 {
        self.table_id
    }

    fn live(&self) -> usize {
        self.entries.read().by_handle.len()
    }

    fn release_all(&self) -> usize {
        let released = self.entries.write().take_all();
        released.len()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[derive(Debug, PartialEq)]
    struct Stream(u32);

    fn table<T: Send + Sync + 'static>(id: u16) -> HandleTable<T> {
        HandleTable::new(id, None, Arc::new(Lifecycle::new()))
    }

    #[test]
    fn insert_and_find_return_the_same_object() {
        let t = table::<Stream>(1);
        let h = t.insert(Stream(7)).unwrap();

        assert_eq!(h.table_id(), 1);
        assert_eq!(*t.find(h).unwrap().unwrap(), Stream(7));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn handles_are_distinct_while_live() {
        let t = table::<Stream>(1);
        let handles: HashSet<Handle> = (0..100).map(|i| t.insert(Stream(i)).unwrap()).collect();
        assert_eq!(handles.len(), 100);
    }

    #[test]
    fn erase_is_idempotent_absence() {
        let t = table::<Stream>(1);
        let h = t.insert(Stream(1)).unwrap();

        assert!(t.erase(h).unwrap());
        assert!(t.find(h).unwrap().is_none());
        assert!(!t.erase(h).unwrap());
        assert!(!t.contains(h).unwrap());
    }

    #[test]
    fn erased_handles_are_never_reissued() {
        let t = table::<Stream>(1);
        let h1 = t.insert(Stream(1)).unwrap();
        t.erase(h1).unwrap();
        let h2 = t.insert(Stream(2)).unwrap();

        assert_ne!(h1, h2);
        assert!(t.find(h1).unwrap().is_none());
    }

    #[test]
    fn tracking_the_same_object_twice_reuses_its_handle() {
        let t = table::<Stream>(1);
        let obj = Arc::new(Stream(3));
        let h1 = t.track(obj.clone()).unwrap();
        let h2 = t.track(obj.clone()).unwrap();

        assert_eq!(h1, h2);
        assert_eq!(t.len(), 1);
        assert_eq!(t.handle_of(&obj).unwrap(), Some(h1));
    }

    #[test]
    fn erase_object_stops_tracking_by_identity() {
        let t = table::<Stream>(1);
        let obj = Arc::new(Stream(4));
        let h = t.track(obj.clone()).unwrap();

        assert!(t.erase_object(&obj).unwrap());
        assert!(!t.erase_object(&obj).unwrap());
        assert!(t.find(h).unwrap().is_none());
        assert_eq!(t.handle_of(&obj).unwrap(), None);
    }

    #[test]
    fn len_reports_zero_once_torn_down() {
        let lifecycle = Arc::new(Lifecycle::new());
        let t = HandleTable::<Stream>::new(1, None, Arc::clone(&lifecycle));
        t.insert(Stream(5)).unwrap();

        lifecycle.begin_teardown().unwrap();
        assert_eq!(t.len(), 1, "still visible while callbacks run");

        lifecycle.finish_teardown();
        assert_eq!(t.len(), 0);
        assert!(t.is_empty());
        assert_eq!(ErasedTable::live(&t), 1, "released by the store, not by len");
        assert_eq!(t.release_all(), 1);
    }

    #[test]
    fn get_reports_invalid_and_foreign_handles() {
        let t = table::<Stream>(1);
        let other = table::<Stream>(2);
        let foreign = other.insert(Stream(9)).unwrap();

        assert!(matches!(
            t.get(Handle::INVALID),
            Err(HandleError::InvalidHandle { .. })
        ));
        assert_eq!(
            t.get(foreign).unwrap_err(),
            HandleError::WrongType {
                handle: foreign,
                expected: 1,
                found: 2,
            }
        );
        assert!(t.find(foreign).unwrap().is_none());
    }

    #[test]
    fn found_reference_outlives_erase() {
        let t = table::<Stream>(1);
        let h = t.insert(Stream(5)).unwrap();
        let held = t.find(h).unwrap().unwrap();

        assert!(t.erase(h).unwrap());
        assert_eq!(*held, Stream(5));
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn capacity_limit_reports_exhaustion() {
        let t = HandleTable::new(1, Some(2), Arc::new(Lifecycle::new()));
        t.insert(Stream(1)).unwrap();
        let h = t.insert(Stream(2)).unwrap();

        assert_eq!(
            t.insert(Stream(3)).unwrap_err(),
            HandleError::Exhausted {
                what: "table capacity"
            }
        );
        t.erase(h).unwrap();
        assert!(t.insert(Stream(3)).is_ok());
    }

    #[test]
    fn clear_releases_every_object_once() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let t = table::<Counted>(1);
        for _ in 0..3 {
            t.insert(Counted(drops.clone())).unwrap();
        }

        assert_eq!(t.clear().unwrap(), 3);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
        assert!(t.is_empty());
        assert_eq!(t.clear().unwrap(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn destructor_may_call_back_into_its_table() {
        struct Reentrant {
            table: Arc<HandleTable<Stream>>,
            probe: Handle,
        }
        impl Drop for Reentrant {
            fn drop(&mut self) {
                let _ = self.table.find(self.probe);
            }
        }

        let lifecycle = Arc::new(Lifecycle::new());
        let streams = Arc::new(HandleTable::new(1, None, lifecycle.clone()));
        let probe = streams.insert(Stream(1)).unwrap();
        let owners = HandleTable::new(2, None, lifecycle);
        let h = owners
            .insert(Reentrant {
                table: streams.clone(),
                probe,
            })
            .unwrap();

        assert!(owners.erase(h).unwrap());
    }

    #[test]
    fn concurrent_inserts_never_share_a_handle() {
        const THREADS: usize = 8;
        const PER_THREAD: u32 = 200;

        let t = table::<Stream>(1);
        let barrier = Barrier::new(THREADS);

        let all: Vec<Handle> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        (0..PER_THREAD)
                            .map(|i| t.insert(Stream(i)).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|w| w.join().unwrap())
                .collect()
        });

        let unique: HashSet<Handle> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len());
        assert_eq!(t.len(), all.len());
    }

    #[test]
    fn concurrent_find_and_erase_keep_objects_alive() {
        let t = table::<Stream>(1);
        let handles: Vec<Handle> = (0..500).map(|i| t.insert(Stream(i)).unwrap()).collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for h in &handles {
                    t.erase(*h).unwrap();
                }
            });
            s.spawn(|| {
                for (i, h) in handles.iter().enumerate() {
                    if let Some(obj) = t.find(*h).unwrap() {
                        assert_eq!(obj.0, u32::try_from(i).unwrap());
                    }
                }
            });
        });

        assert!(t.is_empty());
    }
}
