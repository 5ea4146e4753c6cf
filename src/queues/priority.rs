use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::tasks::Priority;

use super::Backlog;

/// Items ordered by `(priority desc, arrival_seq asc)`.
pub trait Schedulable {
    fn priority(&self) -> Priority;
    fn arrival_seq(&self) -> u64;
}

struct Ranked<T> {
    key: (Priority, Reverse<u64>),
    item: T,
}

impl<T> PartialEq for Ranked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Ranked<T> {}

impl<T> PartialOrd for Ranked<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Ranked<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Max-heap backlog: `take` yields the highest priority, and among equal
/// priorities the lowest arrival sequence.
pub struct PriorityBacklog<T> {
    heap: BinaryHeap<Ranked<T>>,
}

impl<T> Default for PriorityBacklog<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }
}

impl<T: Schedulable + Send> Backlog for PriorityBacklog<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        let key = (item.priority(), Reverse(item.arrival_seq()));
        self.heap.push(Ranked { key, item });
    }

    fn take(&mut self) -> Option<T> {
        self.heap.pop().map(|ranked| ranked.item)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
