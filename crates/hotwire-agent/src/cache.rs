use std::collections::HashMap;

use hotwire_proto::{InvocationResult, Offset};
use parking_lot::RwLock;

/// Invocation results by offset, kept until cleared.
///
/// Nothing expires: a controller may page through results long after the
/// call returned.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<Offset, InvocationResult>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `result`, replacing whatever was under `offset`.
    pub fn put(&self, offset: Offset, result: InvocationResult) {
        self.entries.write().insert(offset, result);
    }

    pub fn get(&self, offset: &str) -> Option<InvocationResult> {
        self.entries.read().get(offset).cloned()
    }

    /// Whether an entry was present. Removing an absent offset is fine.
    pub fn remove(&self, offset: &str) -> bool {
        self.entries.write().remove(offset).is_some()
    }

    /// Remove every listed offset under one lock; returns the ones that were
    /// present, in the order given.
    pub fn remove_all<'a>(&self, offsets: impl IntoIterator<Item = &'a str>) -> Vec<Offset> {
        let mut entries = self.entries.write();
        offsets
            .into_iter()
            .filter_map(|offset| entries.remove_entry(offset).map(|(key, _)| key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
