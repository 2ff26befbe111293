//! Bounded worker queue and retry helpers.
//!
//! N workers pull units of work from a shared queue and push results to a
//! channel; a unit may enqueue further units (directory traversal does).
//! Workers shut down once the queue is drained and no unit is in flight.
//! Equivalent to a semaphore-gated task set, without an async runtime.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

/// Work queue shared between the submitter and the workers.
struct Queue<T> {
    items: Mutex<VecDeque<T>>,
    signal: Condvar,
    /// Units queued or currently being processed.
    outstanding: AtomicUsize,
}

impl<T> Queue<T> {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            signal: Condvar::new(),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn push(&self, item: T) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        items.push_back(item);
        self.signal.notify_one();
    }

    /// Blocks until an item is available or all work has drained.
    fn pop(&self) -> Option<T> {
        let mut items = self.items.lock().unwrap_or_else(|p| p.into_inner());
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            if self.outstanding.load(Ordering::SeqCst) == 0 {
                return None;
            }
            items = self
                .signal
                .wait(items)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Mark one unit finished; wakes idle workers so they can observe drain.
    fn done(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.signal.notify_all();
        }
    }
}

/// Run `work` over `seeds` with `workers` threads. The closure receives the
/// unit, a handle for enqueueing follow-up units, and the results sender.
///
/// Returns once every unit (seeded or enqueued) has been processed.
pub fn run_pool<T, R, F>(workers: usize, seeds: Vec<T>, results: Sender<R>, work: F)
where
    T: Send,
    R: Send,
    F: Fn(T, &dyn Fn(T), &Sender<R>) + Sync,
{
    let queue = Queue::new();
    for seed in seeds {
        queue.push(seed);
    }

    let workers = workers.max(1);
    thread::scope(|scope| {
        for _ in 0..workers {
            let queue = &queue;
            let work = &work;
            let results = results.clone();
            scope.spawn(move || {
                while let Some(item) = queue.pop() {
                    let enqueue = |unit: T| queue.push(unit);
                    work(item, &enqueue, &results);
                    queue.done();
                }
            });
        }
    });
}

/// Retry policy for transient sub-operation failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles per retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Call `op` with exponential backoff. `transient` decides whether a failure
/// is worth retrying; exhaustion returns the last error (a hard failure for
/// this sub-operation; the caller decides run policy).
pub fn retry_with_backoff<T, E, F>(
    policy: RetryPolicy,
    transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts && transient(&err) => {
                tracing::debug!(attempt, "transient failure, backing off");
                thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn pool_processes_seeded_and_enqueued_units() {
        // Each unit n < 10 enqueues n+1; results collect every visited n.
        let (tx, rx) = unbounded();
        run_pool(4, vec![0_u32], tx, |n, enqueue, results| {
            results.send(n).unwrap();
            if n < 10 {
                enqueue(n + 1);
            }
        });

        let mut seen: Vec<u32> = rx.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..=10).collect::<Vec<_>>());
    }

    #[test]
    fn pool_with_single_worker_drains() {
        let (tx, rx) = unbounded();
        run_pool(1, vec![1_u32, 2, 3], tx, |n, _enqueue, results| {
            results.send(n * 10).unwrap();
        });
        let mut seen: Vec<u32> = rx.try_iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![10, 20, 30]);
    }

    #[test]
    fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 4,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<u32, &str> = retry_with_backoff(policy, |_| true, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("again")
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_on_permanent_failure() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), &str> = retry_with_backoff(policy, |_| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("fatal")
        });
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
