//! A minimal stand-in for the source's `AsyncBundler`: a set of pending ids
//! plus a wakeup signal, just enough machinery for the generic batching
//! limiter's "accumulate, then drain on demand" behavior.

use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Default)]
pub struct Bundler {
    pending: Mutex<HashSet<String>>,
    notify: Notify,
}

impl Bundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions `ids` into the pending set and wakes any waiter if the set is
    /// now non-empty.
    pub fn add(&self, ids: impl IntoIterator<Item = String>) {
        let mut pending = self.pending.lock().expect("bundler poisoned");
        pending.extend(ids);
        if !pending.is_empty() {
            self.notify.notify_one();
        }
    }

    /// Resolves immediately if the pending set is already non-empty,
    /// otherwise waits for the next `add`.
    pub async fn wait_non_empty(&self) {
        loop {
            if !self.pending.lock().expect("bundler poisoned").is_empty() {
                return;
            }
            self.notify.notified().await;
        }
    }

    /// Atomically takes and clears the pending set.
    pub fn drain(&self) -> HashSet<String> {
        std::mem::take(&mut *self.pending.lock().expect("bundler poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_non_empty_resolves_immediately_when_already_populated() {
        let bundler = Bundler::new();
        bundler.add(["u1".to_owned()]);
        bundler.wait_non_empty().await;
        let drained = bundler.drain();
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test]
    async fn drain_clears_the_pending_set() {
        let bundler = Bundler::new();
        bundler.add(["u1".to_owned(), "u2".to_owned()]);
        let first = bundler.drain();
        assert_eq!(first.len(), 2);
        let second = bundler.drain();
        assert!(second.is_empty());
    }
}
