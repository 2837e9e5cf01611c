use std::sync::RwLock;

use rustc_hash::FxHashMap;
use tracing::trace;

/// String keyed storage shared between the router and the presence workers that feed it.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
    fn delete(&self, key: &str);

    /// Changes staged in the returned transaction become visible together on commit. Dropping it
    ///  uncommitted discards them.
    fn begin(&self) -> Box<dyn KvTransaction + '_>;
}

pub trait KvTransaction {
    fn put(&mut self, key: &str, value: &str);
    fn delete(&mut self, key: &str);
    fn commit(self: Box<Self>);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<FxHashMap<String, String>>,
}
impl MemoryStore {
    pub fn new() -> MemoryStore {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // a panic while holding the lock cannot leave the map half-updated, so poisoning is ignored
    fn read(&self) -> std::sync::RwLockReadGuard<'_, FxHashMap<String, String>> {
        self.entries.read()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, FxHashMap<String, String>> {
        self.entries.write()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    fn put(&self, key: &str, value: &str) {
        trace!("put {:?} -> {:?}", key, value);
        self.write().insert(key.to_string(), value.to_string());
    }

    fn delete(&self, key: &str) {
        trace!("delete {:?}", key);
        self.write().remove(key);
    }

    fn begin(&self) -> Box<dyn KvTransaction + '_> {
        Box::new(MemoryTransaction {
            store: self,
            staged: Vec::new(),
        })
    }
}

enum StagedChange {
    Put(String, String),
    Delete(String),
}

struct MemoryTransaction<'a> {
    store: &'a MemoryStore,
    staged: Vec<StagedChange>,
}

impl KvTransaction for MemoryTransaction<'_> {
    fn put(&mut self, key: &str, value: &str) {
        self.staged.push(StagedChange::Put(key.to_string(), value.to_string()));
    }

    fn delete(&mut self, key: &str) {
        self.staged.push(StagedChange::Delete(key.to_string()));
    }

    fn commit(self: Box<Self>) {
        let mut entries = self.store.write();
        trace!("committing {} changes", self.staged.len());
        for change in self.staged {
            match change {
                StagedChange::Put(key, value) => {
                    entries.insert(key, value);
                }
                StagedChange::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
    }
}
