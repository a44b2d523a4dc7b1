/// Debug-build tracking of synchronous lock acquisitions.
///
/// Only `parking_lot` locks are tracked. The per-service lifecycle guard is a
/// `tokio::sync::Mutex` held across `.await` points, and a task may resume on
/// another worker thread, so a thread-local stack cannot follow it.
///
/// # Lock Ordering Hierarchy
///
/// 1. `epochs` - dispatcher epoch table
/// 2. `installed_set` - installed-services file store
/// 3. `substates` - per-service substate store (acquire last)
///
/// In release builds every function here compiles to nothing.
#[cfg(debug_assertions)]
use std::cell::RefCell;

/// Identifiers for tracked locks. Lower discriminants are acquired first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockId {
    Epochs = 1,
    InstalledSet = 2,
    Substates = 3,
}

impl LockId {
    pub fn name(&self) -> &'static str {
        match self {
            LockId::Epochs => "epochs",
            LockId::InstalledSet => "installed_set",
            LockId::Substates => "substates",
        }
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static LOCK_STACK: RefCell<Vec<LockId>> = const { RefCell::new(Vec::new()) };
}

/// Record that `lock` is about to be acquired.
///
/// # Panics
///
/// Panics (debug builds only) if a lock later in the hierarchy is already held
/// by this thread, or if the same lock is taken twice.
#[cfg(debug_assertions)]
pub fn track_lock_acquisition(lock: LockId) {
    LOCK_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(held) = stack.iter().find(|held| **held >= lock) {
            panic!(
                "Lock ordering violation: attempted to acquire '{}' while holding '{}'. \
                 Locks must be acquired in order: epochs < installed_set < substates",
                lock.name(),
                held.name()
            );
        }
        stack.push(lock);
    });
}

/// Record that `lock` was released. Releases must be LIFO.
#[cfg(debug_assertions)]
pub fn track_lock_release(lock: LockId) {
    LOCK_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.pop() {
            Some(top) if top == lock => {}
            Some(top) => panic!(
                "Lock release order violation: attempted to release '{}' \
                 but most recently acquired lock was '{}'",
                lock.name(),
                top.name()
            ),
            None => panic!(
                "Lock release without acquisition: attempted to release '{}'",
                lock.name()
            ),
        }
    });
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn track_lock_acquisition(_lock: LockId) {}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn track_lock_release(_lock: LockId) {}

/// Scope guard pairing an acquisition record with its release.
///
/// Declare it before the lock guard it covers so that it drops after it.
#[must_use]
pub struct Tracked(LockId);

impl Tracked {
    pub fn acquire(lock: LockId) -> Self {
        track_lock_acquisition(lock);
        Tracked(lock)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        track_lock_release(self.0);
    }
}
