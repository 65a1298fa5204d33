//! Bounded-parallel dynamic worklist.
//!
//! [`Work`] processes each distinct item at most once on a fixed pool of
//! scoped worker threads. Items may be added before [`Work::run`] and from
//! inside the processing of other items; the run returns once every worker
//! is idle and the queue is empty.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Default pool size: one worker per logical CPU.
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<T>,
    seen: HashSet<T>,
    active: usize,
}

/// A worklist of items processed at most once, in parallel.
///
/// ```
/// use cpm_core::scheduler::Work;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let work = Work::new();
/// let sum = AtomicUsize::new(0);
/// work.add(1usize);
/// work.run(4, |n| {
///     sum.fetch_add(n, Ordering::Relaxed);
///     if n < 10 {
///         work.add(n + 1);
///         work.add(n); // already seen, ignored
///     }
/// });
/// assert_eq!(sum.load(Ordering::Relaxed), 55);
/// ```
#[derive(Debug)]
pub struct Work<T> {
    state: Mutex<State<T>>,
    changed: Condvar,
}

impl<T> Default for Work<T>
where
    T: Clone + Eq + Hash + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Work<T>
where
    T: Clone + Eq + Hash + Send,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                active: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Queue `item` unless it has been added before. Returns whether it was new.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.lock();
        if !state.seen.insert(item.clone()) {
            return false;
        }
        state.queue.push_back(item);
        drop(state);
        self.changed.notify_one();
        true
    }

    /// Number of distinct items ever added.
    pub fn seen(&self) -> usize {
        self.lock().seen.len()
    }

    /// Process queued items with `workers` threads until none remain.
    ///
    /// `f` may call [`Work::add`] on this same worklist.
    pub fn run<F>(&self, workers: usize, f: F)
    where
        F: Fn(T) + Sync,
    {
        let workers = workers.max(1);
        std::thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| self.worker(&f));
            }
        });
    }

    fn worker<F>(&self, f: &F)
    where
        F: Fn(T),
    {
        while let Some(item) = self.next() {
            let _active = ActiveGuard(self);
            f(item);
        }
    }

    /// Block until an item is available, or return `None` once the queue is
    /// drained and nobody is running.
    fn next(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                state.active += 1;
                return Some(item);
            }
            if state.active == 0 {
                drop(state);
                self.changed.notify_all();
                return None;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks one worker as busy; releases it even if processing panics.
struct ActiveGuard<'a, T: Clone + Eq + Hash + Send>(&'a Work<T>);

impl<T: Clone + Eq + Hash + Send> Drop for ActiveGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.0.lock();
        state.active -= 1;
        drop(state);
        self.0.changed.notify_all();
    }
}
