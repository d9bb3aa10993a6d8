//! Single-snapshot publish slot shared by a sampler and its consumer.
//!
//! The writer swaps in a whole new snapshot and never edits one a reader
//! holds. While any reader is inside a `get`/release pair the writer waits;
//! while no snapshot exists a reader waits at most the grace period and
//! then gets `None`.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use super::safe_lock::SafeLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing published yet.
    Idle,
    /// The writer holds the slot and is swapping the snapshot.
    Publishing,
    /// A snapshot is available and no reader holds it.
    Ready,
    /// This many readers hold the current snapshot.
    Reading(usize),
}

impl SlotState {
    fn can_become(self, next: SlotState) -> bool {
        use SlotState::*;
        match (self, next) {
            (Idle | Ready, Publishing) => true,
            (Publishing, Ready) => true,
            (Ready, Reading(1)) => true,
            (Reading(n), Reading(m)) => m == n + 1 || (n > 1 && m == n - 1),
            (Reading(1), Ready) => true,
            // A reset dropped the snapshot while it was held or ready.
            (Reading(1) | Ready, Idle) => true,
            _ => false,
        }
    }
}

struct SlotInner<S> {
    state: SlotState,
    snapshot: Option<Arc<S>>,
    open: bool,
    published: u64,
}

impl<S> SlotInner<S> {
    fn transition(&mut self, next: SlotState) {
        debug_assert!(
            self.state.can_become(next),
            "invalid slot transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }
}

pub struct PublishSlot<S> {
    inner: SafeLock<SlotInner<S>>,
    grace: Duration,
}

impl<S> PublishSlot<S> {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: SafeLock::new(SlotInner {
                state: SlotState::Idle,
                snapshot: None,
                open: false,
                published: 0,
            }),
            grace,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    /// Accept publishes again. The last snapshot, if any, stays readable.
    pub fn open(&self) {
        self.inner.update(|inner| inner.open = true);
    }

    /// Forget the stored snapshot so the next `get` waits for a fresh publish.
    ///
    /// Readers still holding the old snapshot keep their copy; the slot goes
    /// back to `Idle` once the last of them releases.
    pub fn reset(&self) {
        let previous = self.inner.update(|inner| {
            if inner.state == SlotState::Ready {
                inner.transition(SlotState::Idle);
            }
            inner.snapshot.take()
        });
        drop(previous);
    }

    /// Reject further publishes and wake anyone blocked on the slot.
    pub fn close(&self) {
        self.inner.update(|inner| inner.open = false);
    }

    /// Swap in a new snapshot, waiting for active readers to release first.
    ///
    /// Returns `false` without publishing if the slot is closed, including
    /// when it closes while the writer is waiting.
    pub fn publish(&self, snapshot: S) -> bool {
        let previous = {
            let mut inner = self.inner.lock();
            self.inner.wait_while(&mut inner, |inner| {
                inner.open && matches!(inner.state, SlotState::Reading(_))
            });
            if !inner.open {
                return false;
            }
            inner.transition(SlotState::Publishing);
            let previous = inner.snapshot.replace(Arc::new(snapshot));
            inner.published += 1;
            inner.transition(SlotState::Ready);
            previous
        };
        self.inner.notify_all();
        // The old snapshot is dropped outside the lock.
        drop(previous);
        true
    }

    /// Take a read hold on the current snapshot.
    ///
    /// Waits up to the grace period for a first snapshot, then gives up.
    pub fn get(&self) -> Option<SnapshotRef<'_, S>> {
        let snapshot = {
            let mut inner = self.inner.lock();
            self.inner.wait_for_while(&mut inner, self.grace, |inner| {
                inner.open && inner.snapshot.is_none()
            });
            let snapshot = inner.snapshot.clone()?;
            let next = match inner.state {
                SlotState::Reading(n) => SlotState::Reading(n + 1),
                _ => SlotState::Reading(1),
            };
            inner.transition(next);
            snapshot
        };
        Some(SnapshotRef {
            slot: self,
            snapshot,
        })
    }

    fn release(&self) {
        self.inner.update(|inner| match inner.state {
            SlotState::Reading(1) if inner.snapshot.is_none() => inner.transition(SlotState::Idle),
            SlotState::Reading(1) => inner.transition(SlotState::Ready),
            SlotState::Reading(n) => inner.transition(SlotState::Reading(n - 1)),
            other => debug_assert!(false, "release without a matching get (slot {other:?})"),
        });
    }

    pub fn state(&self) -> SlotState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().snapshot.is_some()
    }

    /// Number of snapshots published since creation.
    pub fn published(&self) -> u64 {
        self.inner.lock().published
    }
}

impl<S> fmt::Debug for PublishSlot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PublishSlot")
            .field("state", &inner.state)
            .field("open", &inner.open)
            .field("published", &inner.published)
            .field("grace", &self.grace)
            .finish()
    }
}

/// A read hold on a published snapshot. Dropping it releases the hold.
pub struct SnapshotRef<'a, S> {
    slot: &'a PublishSlot<S>,
    snapshot: Arc<S>,
}

impl<S> SnapshotRef<'_, S> {
    /// Release the hold explicitly. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl<S> Deref for SnapshotRef<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.snapshot
    }
}

impl<S> Drop for SnapshotRef<'_, S> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

impl<S: fmt::Debug> fmt::Debug for SnapshotRef<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    fn open_slot(grace_ms: u64) -> Arc<PublishSlot<Vec<u32>>> {
        let slot = Arc::new(PublishSlot::new(Duration::from_millis(grace_ms)));
        slot.open();
        slot
    }

    #[test]
    fn get_before_first_publish_returns_none_after_grace() {
        let slot = open_slot(10);
        let start = Instant::now();
        assert!(slot.get().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(slot.state(), SlotState::Idle);
    }

    #[test]
    fn publish_then_get_and_release_cycles_state() {
        let slot = open_slot(10);
        assert!(slot.publish(vec![1, 2, 3]));
        assert_eq!(slot.state(), SlotState::Ready);

        let first = slot.get().unwrap();
        let second = slot.get().unwrap();
        assert_eq!(slot.state(), SlotState::Reading(2));
        assert_eq!(*first, vec![1, 2, 3]);
        first.release();
        assert_eq!(slot.state(), SlotState::Reading(1));
        drop(second);
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(slot.published(), 1);
    }

    #[test]
    fn waiting_reader_wakes_on_publish_within_grace() {
        let slot = open_slot(2_000);
        let reader = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.get().map(|data| data.clone()))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(slot.publish(vec![7]));
        assert_eq!(reader.join().unwrap(), Some(vec![7]));
    }

    #[test]
    fn writer_waits_for_reader_and_reader_never_sees_change() {
        let slot = open_slot(10);
        assert!(slot.publish(vec![1]));
        let hold = slot.get().unwrap();

        let published = Arc::new(AtomicBool::new(false));
        let writer = {
            let slot = Arc::clone(&slot);
            let published = Arc::clone(&published);
            thread::spawn(move || {
                let ok = slot.publish(vec![2]);
                published.store(true, Ordering::SeqCst);
                ok
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!published.load(Ordering::SeqCst));
        assert_eq!(*hold, vec![1]);
        drop(hold);

        assert!(writer.join().unwrap());
        assert_eq!(*slot.get().unwrap(), vec![2]);
    }

    #[test]
    fn close_unblocks_waiting_writer_without_publishing() {
        let slot = open_slot(10);
        assert!(slot.publish(vec![1]));
        let hold = slot.get().unwrap();
        let writer = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.publish(vec![2]))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(!writer.join().unwrap());
        assert_eq!(*hold, vec![1]);
        drop(hold);
        assert_eq!(slot.published(), 1);
    }

    #[test]
    fn closed_slot_rejects_publish() {
        let slot: PublishSlot<u8> = PublishSlot::new(Duration::from_millis(1));
        assert!(!slot.publish(1));
        assert!(!slot.is_ready());
    }

    #[test]
    fn reset_drops_snapshot_but_not_an_active_hold() {
        let slot = open_slot(10);
        assert!(slot.publish(vec![4]));
        let hold = slot.get().unwrap();

        slot.reset();
        assert!(!slot.is_ready());
        assert_eq!(*hold, vec![4]);
        assert_eq!(slot.state(), SlotState::Reading(1));
        drop(hold);
        assert_eq!(slot.state(), SlotState::Idle);
        assert!(slot.get().is_none());

        assert!(slot.publish(vec![5]));
        slot.reset();
        assert_eq!(slot.state(), SlotState::Idle);
        assert!(slot.get().is_none());
    }

    #[test]
    fn transitions_are_validated() {
        assert!(SlotState::Idle.can_become(SlotState::Publishing));
        assert!(SlotState::Ready.can_become(SlotState::Reading(1)));
        assert!(SlotState::Reading(2).can_become(SlotState::Reading(1)));
        assert!(!SlotState::Reading(1).can_become(SlotState::Publishing));
        assert!(!SlotState::Idle.can_become(SlotState::Reading(1)));
        assert!(!SlotState::Reading(1).can_become(SlotState::Reading(0)));
    }
}
