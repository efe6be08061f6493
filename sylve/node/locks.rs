use std::{collections::HashSet, sync::Mutex};

/// Keyed try-locks serializing replication per (source, destination) pair.
///
/// The coarse mutex guards only set mutation and is never held across a
/// transfer, so unrelated pairs proceed concurrently.
#[derive(Default)]
pub struct PairLocks {
    held: Mutex<HashSet<(String, String)>>,
}

/// Exclusive hold on one dataset pair, released on drop
pub struct PairGuard<'l> {
    locks: &'l PairLocks,
    key: (String, String),
}

impl PairLocks {
    /// Acquire the pair lock, or `None` if a replication for the pair is
    /// already running
    pub fn try_acquire(&self, source: &str, destination: &str) -> Option<PairGuard<'_>> {
        let key = (source.to_string(), destination.to_string());
        let mut held = self.held.lock().expect("Pair lock table poisoned");

        if held.insert(key.clone()) {
            Some(PairGuard { locks: self, key })
        } else {
            None
        }
    }
}

impl Drop for PairGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .expect("Pair lock table poisoned")
            .remove(&self.key);
    }
}
