// src/core/replication/holdback.rs

//! A FIFO-by-sequence-number hold-back buffer: items may be pushed in any
//! order, but `drain_ready` only ever yields them in strictly increasing,
//! contiguous sequence order, matching the `holdback_operations` buffer in
//! `original_source/backend_server/src/kvs_group_server.cc`'s
//! `send_prepare`, reshaped here as a min-heap instead of that source's
//! linear scan-and-sort.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::Seq;

/// Buffers `(seq, item)` pairs and releases them once `seq` is the next
/// one expected, in order. `next_expected` starts at the seq following
/// whatever the owner already applied (usually `1` for a fresh tablet).
pub struct HoldbackQueue<T> {
    next_expected: Seq,
    heap: BinaryHeap<Reverse<(Seq, Entry<T>)>>,
}

/// Wraps `T` so the heap can order purely on `Seq` without requiring `T:
/// Ord`; ties never happen in practice since sequence numbers are unique,
/// but this keeps the heap's ordering total regardless.
struct Entry<T>(T);

impl<T> PartialEq for Entry<T> {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, _other: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}

impl<T> HoldbackQueue<T> {
    pub fn new(next_expected: Seq) -> Self {
        HoldbackQueue { next_expected, heap: BinaryHeap::new() }
    }

    pub fn next_expected(&self) -> Seq {
        self.next_expected
    }

    /// Buffers `item` at `seq`. A `seq` older than `next_expected` is a
    /// duplicate (the primary retransmitted something already applied)
    /// and is dropped silently.
    pub fn push(&mut self, seq: Seq, item: T) {
        if seq < self.next_expected {
            return;
        }
        self.heap.push(Reverse((seq, Entry(item))));
    }

    /// Pops every contiguously-ready item starting at `next_expected`, in
    /// order, advancing `next_expected` past each one returned.
    pub fn drain_ready(&mut self) -> Vec<(Seq, T)> {
        let mut out = Vec::new();
        while let Some(&Reverse((seq, _))) = self.heap.peek() {
            if seq != self.next_expected {
                break;
            }
            let Reverse((seq, Entry(item))) = self.heap.pop().expect("peeked above");
            out.push((seq, item));
            self.next_expected += 1;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_order_despite_out_of_order_pushes() {
        let mut q = HoldbackQueue::new(1);
        q.push(3, "c");
        q.push(1, "a");
        assert_eq!(q.drain_ready(), vec![(1, "a")]);
        q.push(2, "b");
        assert_eq!(q.drain_ready(), vec![(2, "b"), (3, "c")]);
        assert!(q.is_empty());
    }

    #[test]
    fn stalls_on_a_gap() {
        let mut q = HoldbackQueue::new(1);
        q.push(2, "b");
        assert!(q.drain_ready().is_empty());
        q.push(1, "a");
        assert_eq!(q.drain_ready(), vec![(1, "a"), (2, "b")]);
    }

    #[test]
    fn drops_duplicates_older_than_next_expected() {
        let mut q = HoldbackQueue::new(5);
        q.push(3, "stale");
        assert!(q.is_empty());
    }
}
