use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::session::handle::InstanceHandle;

/// Outcome of an atomic get-or-insert on the registry.
pub enum Slot<T> {
    Existing(InstanceHandle),
    Inserted(InstanceHandle, T),
}

/// Concurrent map of live instance handles keyed by instance id.
///
/// Each id also owns a lifecycle gate serializing creation with logout.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    slots: Arc<DashMap<String, InstanceHandle>>,
    gates: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a handle and records the access.
    pub fn get(&self, instance_id: &str) -> Option<InstanceHandle> {
        let handle = self.peek(instance_id)?;
        handle.touch();
        Some(handle)
    }

    /// Looks up a handle without side effects.
    pub fn peek(&self, instance_id: &str) -> Option<InstanceHandle> {
        self.slots
            .get(instance_id)
            .map(|entry| entry.value().clone())
    }

    /// Returns the existing handle, or inserts the one built by `make`.
    ///
    /// `make` runs under the shard lock and must not touch the registry.
    pub fn get_or_insert_with<T>(
        &self,
        instance_id: &str,
        make: impl FnOnce() -> (InstanceHandle, T),
    ) -> Slot<T> {
        match self.slots.entry(instance_id.to_owned()) {
            Entry::Occupied(entry) => {
                let handle = entry.get().clone();
                handle.touch();
                Slot::Existing(handle)
            }
            Entry::Vacant(entry) => {
                let (handle, extra) = make();
                entry.insert(handle.clone());
                Slot::Inserted(handle, extra)
            }
        }
    }

    pub fn remove(&self, instance_id: &str) -> Option<InstanceHandle> {
        self.slots.remove(instance_id).map(|(_, handle)| handle)
    }

    /// Removes the slot only if it still holds the given generation.
    pub fn retract(&self, instance_id: &str, generation: Uuid) -> bool {
        self.slots
            .remove_if(instance_id, |_, handle| handle.generation() == generation)
            .is_some()
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub(crate) fn gate(&self, instance_id: &str) -> Arc<Mutex<()>> {
        self.gates
            .entry(instance_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn gate_count(&self) -> usize {
        self.gates.len()
    }

    /// Drops the gate for an id once nobody else holds it.
    pub(crate) fn release_gate(&self, instance_id: &str) {
        self.gates
            .remove_if(instance_id, |_, gate| Arc::strong_count(gate) == 1);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::session::handle::SessionState;

    fn detached(instance_id: &str) -> InstanceHandle {
        let (commands, _) = mpsc::channel(1);
        let (_, state) = watch::channel(SessionState::starting());
        InstanceHandle::new(instance_id.to_owned(), commands, state)
    }

    #[test]
    fn second_insert_returns_existing_handle() {
        let registry = InstanceRegistry::new();

        let first = match registry.get_or_insert_with("I1", || (detached("I1"), ())) {
            Slot::Inserted(handle, ()) => handle,
            Slot::Existing(_) => panic!("registry should start empty"),
        };
        let second = match registry.get_or_insert_with("I1", || (detached("I1"), ())) {
            Slot::Existing(handle) => handle,
            Slot::Inserted(..) => panic!("second insert must reuse the slot"),
        };

        assert!(first.same_session(&second));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn retract_ignores_newer_generation() {
        let registry = InstanceRegistry::new();
        let stale = detached("I1");
        let fresh = detached("I1");
        registry.get_or_insert_with("I1", || (fresh.clone(), ()));

        assert!(!registry.retract("I1", stale.generation()));
        assert!(registry.peek("I1").is_some());

        assert!(registry.retract("I1", fresh.generation()));
        assert!(registry.peek("I1").is_none());
    }

    #[test]
    fn ids_are_isolated_and_sorted() {
        let registry = InstanceRegistry::new();
        registry.get_or_insert_with("b", || (detached("b"), ()));
        registry.get_or_insert_with("a", || (detached("a"), ()));

        assert!(registry.remove("b").is_some());
        assert!(registry.remove("b").is_none());
        assert_eq!(registry.ids(), vec!["a".to_owned()]);
    }

    #[test]
    fn gate_is_shared_until_released() {
        let registry = InstanceRegistry::new();
        let first = registry.gate("I1");
        let second = registry.gate("I1");
        assert!(Arc::ptr_eq(&first, &second));

        registry.release_gate("I1");
        assert!(Arc::ptr_eq(&first, &registry.gate("I1")));

        drop(first);
        drop(second);
        registry.release_gate("I1");
        assert_eq!(registry.gates.len(), 0);
    }
}
