//! Handle Table
//!
//! The only shared mutable state of the native core. Every lookup, insert
//! and remove happens under one mutex, so it is atomic with respect to
//! concurrent calls. Ids come from a counter starting at 1 and are never
//! reused, so a released id stays invalid forever.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A live native object. Calls on one instance are serialized by its mutex.
pub type Instance = Arc<Mutex<Box<dyn Any + Send>>>;

#[derive(Clone)]
pub struct HandleEntry {
    /// Object index in the registry.
    pub object: u32,
    pub instance: Instance,
}

impl std::fmt::Debug for HandleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleEntry")
            .field("object", &self.object)
            .finish_non_exhaustive()
    }
}

struct Slots {
    next: u64,
    entries: HashMap<u64, HandleEntry>,
}

pub struct HandleTable {
    slots: Mutex<Slots>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                next: 1,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // entries stay consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mint a fresh handle for `instance`.
    pub fn insert(&self, object: u32, instance: Box<dyn Any + Send>) -> u64 {
        let mut slots = self.lock();
        let id = slots.next;
        slots.next += 1;
        slots.entries.insert(
            id,
            HandleEntry {
                object,
                instance: Arc::new(Mutex::new(instance)),
            },
        );
        id
    }

    pub fn get(&self, handle: u64) -> Option<HandleEntry> {
        self.lock().entries.get(&handle).cloned()
    }

    /// Object index behind `handle`, if it is live.
    pub fn object_of(&self, handle: u64) -> Option<u32> {
        self.lock().entries.get(&handle).map(|entry| entry.object)
    }

    /// Remove `handle`. The instance drops once in-flight calls finish with it.
    pub fn remove(&self, handle: u64) -> Option<HandleEntry> {
        self.lock().entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.lock();
        f.debug_struct("HandleTable")
            .field("live", &slots.entries.len())
            .field("next", &slots.next)
            .finish()
    }
}
