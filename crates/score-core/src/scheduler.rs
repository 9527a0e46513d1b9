//! Single-threaded timer queue.
//!
//! Every timer the engine needs (beat polling, note advance, fade completion)
//! is an entry here instead of a platform timer. The host pumps the queue;
//! cancelling a timer is removing its entry.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct Entry<T> {
    at: f64,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // Reversed so the max-heap yields the earliest entry; ties fire in insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of `(fire_time, task)` ordered by time, then insertion.
pub struct Scheduler<T> {
    heap: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, at: f64, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { at, seq, task });
    }

    /// Pop the earliest task whose time has come.
    pub fn pop_due(&mut self, now: f64) -> Option<(f64, T)> {
        if self.heap.peek()?.at > now {
            return None;
        }
        self.heap.pop().map(|e| (e.at, e.task))
    }

    /// Remove every pending task matching `pred`; returns how many were removed.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&T) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|e| !pred(&e.task));
        before - self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn next_due(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.heap.iter().any(|e| pred(&e.task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_then_insertion_order() {
        let mut s = Scheduler::new();
        s.schedule(0.5, "late");
        s.schedule(0.1, "first");
        s.schedule(0.1, "second");
        assert_eq!(s.pop_due(0.05), None);
        assert_eq!(s.pop_due(1.0), Some((0.1, "first")));
        assert_eq!(s.pop_due(1.0), Some((0.1, "second")));
        assert_eq!(s.pop_due(1.0), Some((0.5, "late")));
        assert!(s.is_empty());
    }

    #[test]
    fn cancel_removes_only_matching() {
        let mut s = Scheduler::new();
        for i in 0..6 {
            s.schedule(i as f64, i);
        }
        assert_eq!(s.cancel_where(|t| t % 2 == 0), 3);
        assert_eq!(s.len(), 3);
        assert!(!s.contains(|t| *t == 2));
        assert_eq!(s.next_due(), Some(1.0));
    }
}
