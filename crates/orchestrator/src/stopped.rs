//! Names of units the caller has manually stopped.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Stopped-set shared between one orchestrator and the multiplexer of its
/// current session.
///
/// Only `execute` (clear), `stop` (insert) and `restart` (remove) write to
/// it; the multiplexer only reads.
#[derive(Debug, Clone, Default)]
pub struct StoppedSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl StoppedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the name was not already present.
    pub fn insert(&self, name: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    /// Returns true if the name was present.
    pub fn remove(&self, name: &str) -> bool {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let set = StoppedSet::new();
        assert!(set.insert("alpha"));
        assert!(!set.insert("alpha"));
        assert!(set.contains("alpha"));

        assert!(set.remove("alpha"));
        assert!(!set.remove("alpha"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_clone_shares_state() {
        let set = StoppedSet::new();
        let view = set.clone();

        set.insert("beta");
        assert!(view.contains("beta"));

        view.clear();
        assert_eq!(set.len(), 0);
    }
}
