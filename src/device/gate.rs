// Gate - single-shot start signal shared by one play/record pair
//
// Ownership: the playback worker is the only producer (it opens the gate once
// the settle delay has elapsed); the acquisition worker is the consumer (it
// arms, then blocks in `wait` until the gate opens). Once open the gate stays
// open, so a late waiter never blocks. Every gate carries a process-unique id
// so devices can tell one step's traffic from another's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct Gate {
    id: u64,
    open: Mutex<bool>,
    signal: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            open: Mutex::new(false),
            signal: Condvar::new(),
        }
    }
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the step this gate starts
    pub fn id(&self) -> u64 {
        self.id
    }

    // A poisoned flag is still a valid bool
    fn flag(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Release every current and future waiter
    pub fn open(&self) {
        let mut open = self.flag();
        *open = true;
        self.signal.notify_all();
    }

    pub fn is_open(&self) -> bool {
        *self.flag()
    }

    /// Block until the gate is open
    pub fn wait(&self) {
        let mut open = self.flag();
        while !*open {
            open = self
                .signal
                .wait(open)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Block until the gate is open or `timeout` elapses; true if it opened
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut open = self.flag();
        while !*open {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .signal
                .wait_timeout(open, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            open = guard;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_gate_starts_closed() {
        let gate = Gate::new();
        assert!(!gate.is_open());
        assert!(!gate.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn test_open_releases_waiter() {
        let gate = Arc::new(Gate::new());
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.wait();
                Instant::now()
            })
        };
        thread::sleep(Duration::from_millis(20));
        let opened_at = Instant::now();
        gate.open();
        let released_at = waiter.join().unwrap();
        assert!(released_at >= opened_at);
    }

    #[test]
    fn test_gates_have_distinct_ids() {
        let first = Gate::new();
        let second = Gate::new();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_open_is_sticky() {
        let gate = Gate::new();
        gate.open();
        gate.open();
        assert!(gate.is_open());
        gate.wait();
        assert!(gate.wait_timeout(Duration::ZERO));
    }
}
