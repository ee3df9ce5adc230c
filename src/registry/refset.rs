//! Counted set
//!
//! Insertion-ordered key/value set used for reference counting at both
//! registry layers: the channels held open on a connection, and the
//! consumers attached to a subscription. A key is present at most once;
//! the owner is released when the set drains.

/// Outcome of [`RefSet::attach`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attached {
    /// The key was not present before
    New,
    /// The key was present; its value was replaced
    Replaced,
}

/// Insertion-ordered set of unique keys with an associated value
#[derive(Debug)]
pub struct RefSet<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: PartialEq, V> RefSet<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add `key`, or replace its value if already present
    ///
    /// Replacing keeps the key's original position.
    pub fn attach(&mut self, key: K, value: V) -> Attached {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => {
                entry.1 = value;
                Attached::Replaced
            }
            None => {
                self.entries.push((key, value));
                Attached::New
            }
        }
    }

    /// Remove `key`, returning its value if it was present
    pub fn detach(&mut self, key: &K) -> Option<V> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Remove every entry whose key fails `keep`, in order
    pub fn drain_unless<F>(&mut self, mut keep: F) -> Vec<(K, V)>
    where
        F: FnMut(&K) -> bool,
    {
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(self.entries.len());
        for (k, v) in self.entries.drain(..) {
            if keep(&k) {
                kept.push((k, v));
            } else {
                drained.push((k, v));
            }
        }
        self.entries = kept;
        drained
    }
}

impl<K: PartialEq, V> Default for RefSet<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
