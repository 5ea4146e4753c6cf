use std::collections::VecDeque;

use super::Backlog;

/// Strict arrival-order backlog used by the client queue.
#[derive(Debug)]
pub struct FifoBacklog<T> {
    items: VecDeque<T>,
}

impl<T> Default for FifoBacklog<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T: Send> Backlog for FifoBacklog<T> {
    type Item = T;

    fn insert(&mut self, item: T) {
        self.items.push_back(item);
    }

    fn take(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}
