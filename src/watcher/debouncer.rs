//! Per-path debouncing of file change events.
//!
//! Editors often write a file several times in quick succession (auto-save,
//! formatting, atomic rename). Each notification restarts a cancellable timer
//! for its path; only the last timer of a burst fires.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A timer expiry, delivered on the fire channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    pub path: PathBuf,
    generation: u64,
}

/// Debounces file change events by path.
///
/// Must be used from within a Tokio runtime. Expiries are sent on the channel
/// given to [`Debouncer::new`] and must be passed back to
/// [`Debouncer::accept`], which drops expiries superseded by a later
/// notification.
#[derive(Debug)]
pub struct Debouncer {
    /// Pending timers: path -> (generation, timer task).
    pending: HashMap<PathBuf, (u64, AbortHandle)>,
    delay: Duration,
    next_generation: u64,
    fire_tx: mpsc::UnboundedSender<Fired>,
}

impl Debouncer {
    pub fn new(delay: Duration, fire_tx: mpsc::UnboundedSender<Fired>) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
            next_generation: 0,
            fire_tx,
        }
    }

    /// Record a change, restarting the timer for this path.
    pub fn record(&mut self, path: PathBuf) {
        if let Some((_, timer)) = self.pending.remove(&path) {
            timer.abort();
        }

        self.next_generation += 1;
        let fired = Fired {
            path: path.clone(),
            generation: self.next_generation,
        };
        let delay = self.delay;
        let tx = self.fire_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        })
        .abort_handle();

        self.pending.insert(path, (self.next_generation, timer));
    }

    /// Claim an expiry. Returns the path if it is still the latest timer.
    pub fn accept(&mut self, fired: Fired) -> Option<PathBuf> {
        match self.pending.get(&fired.path) {
            Some((generation, _)) if *generation == fired.generation => {
                self.pending.remove(&fired.path);
                Some(fired.path)
            }
            _ => None,
        }
    }

    /// Cancel the pending timer for a path.
    pub fn cancel(&mut self, path: &Path) {
        if let Some((_, timer)) = self.pending.remove(path) {
            timer.abort();
        }
    }

    /// Cancel every pending timer.
    pub fn cancel_all(&mut self) {
        for (_, (_, timer)) in self.pending.drain() {
            timer.abort();
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(50);

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_basic() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        let path = PathBuf::from("/specs/E01/spec.md");
        debouncer.record(path.clone());
        assert!(debouncer.has_pending());
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(debouncer.accept(fired), Some(path));
        assert!(!debouncer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_resets_on_new_change() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);
        let path = PathBuf::from("/specs/E01/spec.md");

        for _ in 0..5 {
            debouncer.record(path.clone());
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(debouncer.accept(fired), Some(path));

        tokio::time::sleep(DELAY * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_expiry_rejected() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);
        let path = PathBuf::from("/specs/E01/spec.md");

        debouncer.record(path.clone());
        let stale = rx.recv().await.unwrap();
        // A new change lands before the expiry is claimed
        debouncer.record(path.clone());

        assert_eq!(debouncer.accept(stale), None);
        let fresh = rx.recv().await.unwrap();
        assert_eq!(debouncer.accept(fresh), Some(path));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_multiple_files() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        let first = PathBuf::from("/specs/E01/spec.md");
        let second = PathBuf::from("/specs/E02/spec.md");
        debouncer.record(first.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        debouncer.record(second.clone());

        let fired = rx.recv().await.unwrap();
        assert_eq!(debouncer.accept(fired), Some(first));
        assert_eq!(debouncer.pending_count(), 1);

        let fired = rx.recv().await.unwrap();
        assert_eq!(debouncer.accept(fired), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = Debouncer::new(DELAY, tx);

        let path = PathBuf::from("/specs/E01/spec.md");
        debouncer.record(path.clone());
        debouncer.cancel(&path);
        assert!(!debouncer.has_pending());

        debouncer.record(PathBuf::from("/specs/E02/spec.md"));
        debouncer.cancel_all();

        tokio::time::sleep(DELAY * 2).await;
        assert!(rx.try_recv().is_err());
    }
}
