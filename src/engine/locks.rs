use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Per-key advisory locking.
///
/// Risk, rebalance and order loops run unserialized against shared state;
/// holding a key here while mutating one position makes two overlapping
/// triggers on the same position skip instead of double-executing. Skipped
/// work is picked up by the next timer tick.
#[derive(Clone, Default)]
pub struct KeyLocks {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard if the key was free; None means another task is
    /// already mutating this key
    pub fn try_acquire(&self, key: &str) -> Option<KeyGuard> {
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.insert(key.to_string()) {
            Some(KeyGuard {
                key: key.to_string(),
                in_flight: self.in_flight.clone(),
            })
        } else {
            None
        }
    }
}

/// Releases the key on drop, including on panic and early return
pub struct KeyGuard {
    key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap().remove(&self.key);
    }
}
