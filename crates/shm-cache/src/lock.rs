//! The segment's single gate: a reentrant lock with bounded-timeout
//! acquisition. Every public cache operation holds it for the full
//! call, and the guard releases it on every exit path.

use crate::{Error, Result};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    owner: Option<ThreadId>,
    depth: u32,
}

#[derive(Debug, Default)]
pub struct SegmentLock {
    state: Mutex<State>,
    released: Condvar,
}

impl SegmentLock {
    pub fn new() -> SegmentLock {
        SegmentLock::default()
    }

    /// Acquire the lock, waiting up to `timeout`. Re-acquisition by the
    /// owning thread nests; each guard must be dropped to release.
    pub fn acquire(&self, timeout: Duration) -> Result<LockGuard<'_>> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("segment lock poisoned");

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    return Ok(LockGuard { lock: self });
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(LockGuard { lock: self });
                }
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::LockTimeout(timeout));
                    }
                    let (next, _) = self
                        .released
                        .wait_timeout(state, deadline - now)
                        .expect("segment lock poisoned");
                    state = next;
                }
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock().expect("segment lock poisoned");
        debug_assert_eq!(state.owner, Some(thread::current().id()));
        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }
}

pub struct LockGuard<'l> {
    lock: &'l SegmentLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reentrant_acquisition() {
        let lock = SegmentLock::new();
        let outer = lock.acquire(Duration::from_millis(100)).unwrap();
        let inner = lock.acquire(Duration::from_millis(100)).unwrap();
        drop(inner);
        drop(outer);
        // Fully released: another thread can take it immediately.
        let again = lock.acquire(Duration::from_millis(100)).unwrap();
        drop(again);
    }

    #[test]
    fn test_contended_timeout() {
        let lock = Arc::new(SegmentLock::new());
        let guard = lock.acquire(Duration::from_secs(1)).unwrap();

        let contender = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            contender.acquire(Duration::from_millis(50)).map(|_| ())
        });
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::LockTimeout(_))));
        drop(guard);
    }

    #[test]
    fn test_handoff_under_contention() {
        let lock = Arc::new(SegmentLock::new());
        let guard = lock.acquire(Duration::from_secs(1)).unwrap();

        let contender = Arc::clone(&lock);
        let handle = std::thread::spawn(move || {
            contender
                .acquire(Duration::from_secs(5))
                .map(|guard| drop(guard))
                .is_ok()
        });
        std::thread::sleep(Duration::from_millis(20));
        drop(guard);
        assert!(handle.join().unwrap());
    }
}
