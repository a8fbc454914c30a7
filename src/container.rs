//! Snapshot holder shared by all four containers.
//!
//! State lives behind a `watch` channel as an `Arc<S>`. A transition computes
//! the next snapshot from the current one while holding the channel's write
//! lock, then publishes it; readers only ever see whole snapshots.

use std::sync::Arc;

use tokio::sync::watch;

pub struct Container<S> {
    tx: watch::Sender<Arc<S>>,
}

impl<S> Container<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<S> {
        self.tx.borrow().clone()
    }

    /// Receiver notified after every transition.
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.tx.subscribe()
    }

    /// Apply one transition. Returns the previous and the new snapshot.
    ///
    /// Subscribers are notified even when `next` returns an equal state;
    /// callers that care compare the returned pair.
    pub fn transition(&self, next: impl FnOnce(&S) -> S) -> (Arc<S>, Arc<S>) {
        let mut before = None;
        self.tx.send_modify(|current| {
            let prev = current.clone();
            *current = Arc::new(next(&prev));
            before = Some(prev);
        });
        let after = self.snapshot();
        // send_modify always runs the closure
        let before = before.unwrap_or_else(|| after.clone());
        (before, after)
    }

    /// Replace the snapshot wholesale.
    pub fn replace(&self, state: S) -> Arc<S> {
        let next = Arc::new(state);
        self.tx.send_replace(next.clone());
        next
    }
}

impl<S: Default> Default for Container<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_publishes_whole_snapshot() {
        let container = Container::new(vec![1, 2]);
        let rx = container.subscribe();

        let (before, after) = container.transition(|v| {
            let mut next = v.clone();
            next.push(3);
            next
        });

        assert_eq!(*before, vec![1, 2]);
        assert_eq!(*after, vec![1, 2, 3]);
        assert!(rx.has_changed().unwrap());
        assert_eq!(**rx.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_old_snapshots_are_immutable() {
        let container = Container::new(String::from("a"));
        let held = container.snapshot();
        container.replace(String::from("b"));
        assert_eq!(*held, "a");
        assert_eq!(*container.snapshot(), "b");
    }
}
