use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Serializes lifecycle transitions of one service.
///
/// Held for the whole transition, across every `.await`. Status reads never
/// take it.
pub struct ConcurrencyGuard {
    service: String,
    lock: Mutex<()>,
}

/// Proof that the holder is the only transition running for its service.
pub struct TransitionPermit<'a> {
    _guard: MutexGuard<'a, ()>,
    operation: &'static str,
}

impl TransitionPermit<'_> {
    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl ConcurrencyGuard {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            lock: Mutex::new(()),
        }
    }

    /// Wait until no other transition runs, then take the permit. Waiters are
    /// served in FIFO order.
    pub async fn acquire(&self, operation: &'static str) -> TransitionPermit<'_> {
        let guard = match self.lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(
                    service = %self.service,
                    operation,
                    "Waiting for in-flight transition to finish"
                );
                self.lock.lock().await
            }
        };
        TransitionPermit {
            _guard: guard,
            operation,
        }
    }

    /// True while a transition holds the permit.
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}
