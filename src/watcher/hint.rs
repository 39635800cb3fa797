use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Shared expectation counter for one watched file.
///
/// The counter starts at 1, meaning "one pending event burst is ours". A
/// backend about to rewrite its file pre-charges the counter before the
/// atomic rename; the watcher then consumes the resulting kernel events
/// without reloading. Only when the counter drops to zero or below did
/// something outside the process touch the file.
#[derive(Debug, Clone)]
pub struct WatchHint {
    counter: Arc<AtomicI32>,
}

impl WatchHint {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicI32::new(1)),
        }
    }

    /// Called by a backend just before it renames its rewritten file into
    /// place: the next event burst is a self-write.
    pub fn precharge(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Consume one event without deciding anything.
    pub fn consume(&self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }

    /// Consume one event, then decide.
    pub fn consume_and_check(&self) -> bool {
        self.counter.fetch_sub(1, Ordering::SeqCst) - 1 <= 0 && self.reset_if_spent()
    }

    /// Decide without consuming.
    pub fn check(&self) -> bool {
        self.counter.load(Ordering::SeqCst) <= 0 && self.reset_if_spent()
    }

    /// Reset to the baseline of 1 when spent. Returns whether a reload
    /// should fire. Compare-and-swap so concurrent deciders fire once.
    fn reset_if_spent(&self) -> bool {
        let current = self.counter.load(Ordering::SeqCst);
        if current > 0 {
            return false;
        }
        self.counter
            .compare_exchange(current, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[cfg(test)]
    pub(crate) fn value(&self) -> i32 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Default for WatchHint {
    fn default() -> Self {
        Self::new()
    }
}
