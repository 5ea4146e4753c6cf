//! Blocking multi-producer/multi-consumer queues that connect the pools.
//!
//! [`BlockingQueue`] owns the locking and wake-up discipline; the ordering of
//! queued items is delegated to a [`Backlog`]. The client queue uses a FIFO
//! backlog, the task queue a priority heap.

pub mod fifo;
pub mod priority;

use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};

pub use fifo::FifoBacklog;
pub use priority::{PriorityBacklog, Schedulable};

use crate::tasks::{ClientTask, Task};

/// Raw lines read by acceptors, in arrival order.
pub type ClientQueue = BlockingQueue<FifoBacklog<ClientTask>>;
/// Parsed tasks, highest priority first and oldest first within a priority.
pub type TaskQueue = BlockingQueue<PriorityBacklog<Task>>;

/// Ordering policy for the items held by a [`BlockingQueue`].
pub trait Backlog: Default + Send {
    type Item: Send;

    fn insert(&mut self, item: Self::Item);
    fn take(&mut self) -> Option<Self::Item>;
    fn len(&self) -> usize;
}

/// Outcome of a blocking [`BlockingQueue::pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    Item(T),
    /// The queue was closed and fully drained.
    Closed,
}

/// Returned by [`BlockingQueue::push`] once the queue is closed; hands the
/// rejected item back so the caller can still answer its client.
pub struct QueueClosed<T> {
    pub queue: &'static str,
    pub item: T,
}

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClosed")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue '{}' is closed", self.queue)
    }
}

impl<T> std::error::Error for QueueClosed<T> {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    pub high_water_mark: usize,
}

struct QueueState<B> {
    backlog: B,
    closed: bool,
    stats: QueueStats,
}

pub struct BlockingQueue<B: Backlog> {
    name: &'static str,
    capacity: Option<usize>,
    state: Mutex<QueueState<B>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<B: Backlog> BlockingQueue<B> {
    /// `capacity == 0` makes the queue unbounded.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: (capacity > 0).then_some(capacity),
            state: Mutex::new(QueueState {
                backlog: B::default(),
                closed: false,
                stats: QueueStats::default(),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Inserts `item`, blocking while a bounded queue is full.
    pub fn push(&self, item: B::Item) -> Result<(), QueueClosed<B::Item>> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(QueueClosed {
                    queue: self.name,
                    item,
                });
            }
            let has_room = self
                .capacity
                .is_none_or(|capacity| state.backlog.len() < capacity);
            if has_room {
                break;
            }
            state = self
                .not_full
                .wait(state)
                .expect("queue state lock poisoned");
        }

        state.backlog.insert(item);
        state.stats.pushed += 1;
        state.stats.high_water_mark = state.stats.high_water_mark.max(state.backlog.len());
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available. After [`close`](Self::close) the
    /// remaining items are still handed out before [`Dequeued::Closed`].
    pub fn pop(&self) -> Dequeued<B::Item> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.backlog.take() {
                state.stats.popped += 1;
                drop(state);
                self.not_full.notify_one();
                return Dequeued::Item(item);
            }
            if state.closed {
                return Dequeued::Closed;
            }
            state = self
                .not_empty
                .wait(state)
                .expect("queue state lock poisoned");
        }
    }

    /// Rejects further pushes and wakes every blocked producer and consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<B>> {
        self.state.lock().expect("queue state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{BlockingQueue, Dequeued, FifoBacklog};

    type Fifo = BlockingQueue<FifoBacklog<u32>>;

    #[test]
    fn pop_returns_items_in_insertion_order() {
        let queue = Fifo::new("test", 0);
        for value in 1..=3 {
            queue.push(value).expect("open queue accepts pushes");
        }

        assert_eq!(queue.pop(), Dequeued::Item(1));
        assert_eq!(queue.pop(), Dequeued::Item(2));
        assert_eq!(queue.pop(), Dequeued::Item(3));
        assert_eq!(queue.stats().pushed, 3);
        assert_eq!(queue.stats().popped, 3);
        assert_eq!(queue.stats().high_water_mark, 3);
    }

    #[test]
    fn close_drains_remaining_items_then_signals_closed() {
        let queue = Fifo::new("test", 0);
        queue.push(10).expect("push should succeed");
        queue.push(11).expect("push should succeed");
        queue.close();

        let rejected = queue.push(12).expect_err("closed queue rejects pushes");
        assert_eq!(rejected.item, 12);
        assert_eq!(rejected.to_string(), "queue 'test' is closed");

        assert_eq!(queue.pop(), Dequeued::Item(10));
        assert_eq!(queue.pop(), Dequeued::Item(11));
        assert_eq!(queue.pop(), Dequeued::Closed);
        assert_eq!(queue.pop(), Dequeued::Closed);
    }

    #[test]
    fn close_wakes_every_blocked_consumer() {
        let queue = Arc::new(Fifo::new("test", 0));
        let handles = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(50));
        queue.close();

        for handle in handles {
            assert_eq!(handle.join().expect("consumer should not panic"), Dequeued::Closed);
        }
    }

    #[test]
    fn bounded_push_blocks_until_space_frees() {
        let queue = Arc::new(Fifo::new("bounded", 1));
        queue.push(1).expect("first push fits");

        let pushed = Arc::new(AtomicBool::new(false));
        let producer = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push(2).expect("push should succeed once space frees");
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        assert_eq!(queue.pop(), Dequeued::Item(1));
        producer.join().expect("producer should not panic");
        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.pop(), Dequeued::Item(2));
    }

    #[test]
    fn close_releases_producer_blocked_on_full_queue() {
        let queue = Arc::new(Fifo::new("bounded", 1));
        queue.push(1).expect("first push fits");

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(2).map_err(|rejected| rejected.item))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(producer.join().expect("producer should not panic"), Err(2));
    }

    #[test]
    fn concurrent_consumers_never_share_or_lose_items() {
        let queue = Arc::new(Fifo::new("mpmc", 0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let consumers = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    while let Dequeued::Item(value) = queue.pop() {
                        seen.lock().expect("seen lock poisoned").push(value);
                    }
                })
            })
            .collect::<Vec<_>>();

        let producers = (0..4_u32)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for offset in 0..250 {
                        queue
                            .push(producer * 1_000 + offset)
                            .expect("queue is open while producing");
                    }
                })
            })
            .collect::<Vec<_>>();

        for producer in producers {
            producer.join().expect("producer should not panic");
        }
        queue.close();
        for consumer in consumers {
            consumer.join().expect("consumer should not panic");
        }

        let seen = seen.lock().expect("seen lock poisoned");
        let unique = seen.iter().copied().collect::<HashSet<_>>();
        assert_eq!(seen.len(), 1_000);
        assert_eq!(unique.len(), 1_000);
    }
}
