//! Handle-to-owner map used to route driver callbacks.
//!
//! Entries are weak: the registry never keeps an owner alive. Owners must
//! register before the driver can call back and unregister before they are
//! released. The lock is held only for the map operation itself; callers
//! resolve an owner with [`Registry::lookup`] and run their work after the
//! lock is released, so owners of different handles never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, trace, warn};

use crate::types::SessionHandle;

pub struct Registry<T> {
    entries: Mutex<HashMap<SessionHandle, Weak<T>>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionHandle, Weak<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes `handle` to `owner`, replacing any previous owner.
    pub fn register(&self, handle: SessionHandle, owner: &Arc<T>) {
        if self.entries().insert(handle, Arc::downgrade(owner)).is_some() {
            warn!("Handle {:?} re-registered, previous owner replaced", handle);
        } else {
            debug!("Registered handle {:?}", handle);
        }
    }

    /// Removes `handle`. Returns whether it was registered.
    pub fn unregister(&self, handle: SessionHandle) -> bool {
        let removed = self.entries().remove(&handle).is_some();
        if removed {
            debug!("Unregistered handle {:?}", handle);
        }
        removed
    }

    /// The live owner of `handle`, if any.
    ///
    /// Unknown or released handles yield `None`.
    pub fn lookup(&self, handle: SessionHandle) -> Option<Arc<T>> {
        let owner = self.entries().get(&handle).and_then(Weak::upgrade);
        if owner.is_none() {
            trace!("No owner for handle {:?}", handle);
        }
        owner
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.entries().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn register_lookup_unregister() {
        let registry = Registry::new();
        let owner = Arc::new(7u32);
        let handle = SessionHandle::allocate();

        assert!(registry.lookup(handle).is_none());
        registry.register(handle, &owner);
        assert_eq!(registry.lookup(handle).as_deref(), Some(&7));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
        assert!(registry.lookup(handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn released_owner_is_not_returned() {
        let registry = Registry::new();
        let handle = SessionHandle::allocate();
        {
            let owner = Arc::new(String::from("gone"));
            registry.register(handle, &owner);
        }
        assert!(registry.contains(handle));
        assert!(registry.lookup(handle).is_none());
    }

    #[test]
    fn resolved_owner_can_use_the_registry() {
        let registry = Arc::new(Registry::new());
        let first = SessionHandle::allocate();
        let second = SessionHandle::allocate();
        let owner = Arc::new(1u8);
        registry.register(first, &owner);
        registry.register(second, &owner);

        let (done_tx, done_rx) = mpsc::channel();
        let worker = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                // Work on a resolved owner may register and unregister freely
                if let Some(resolved) = registry.lookup(first) {
                    registry.unregister(second);
                    registry.register(second, &resolved);
                    registry.unregister(first);
                }
                let _ = done_tx.send(());
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        worker.join().unwrap();
        assert!(registry.lookup(first).is_none());
        assert_eq!(registry.lookup(second).as_deref(), Some(&1));
    }
}
