//! Bounded single-producer single-consumer transfer queue
//!
//! A thin split-handle layer over `crossbeam::queue::ArrayQueue`. Each end
//! is move-only and its operations take `&mut self`, so at most one thread
//! can push and at most one thread can pop at any time.
//!
//! Pushing into a full queue never blocks: the item is handed back to the
//! caller, which decides what to do with it (the producer drops the newest
//! buffer, the consumer parks it).

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// Create a connected sender/receiver pair with a fixed capacity
pub fn transfer_queue<T>(capacity: usize) -> (TransferSender<T>, TransferReceiver<T>) {
    let queue = Arc::new(ArrayQueue::new(capacity));
    (
        TransferSender {
            queue: queue.clone(),
        },
        TransferReceiver { queue, head: None },
    )
}

/// Producing end
pub struct TransferSender<T> {
    queue: Arc<ArrayQueue<T>>,
}

impl<T> TransferSender<T> {
    /// Push an item; returns it back if the queue is full
    pub fn push(&mut self, item: T) -> Result<(), T> {
        self.queue.push(item)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Consuming end
pub struct TransferReceiver<T> {
    queue: Arc<ArrayQueue<T>>,
    /// Item taken off the queue by `front` but not yet popped
    head: Option<T>,
}

impl<T> TransferReceiver<T> {
    /// Oldest item, or `None` if empty
    pub fn pop(&mut self) -> Option<T> {
        self.head.take().or_else(|| self.queue.pop())
    }

    /// Look at the oldest item without removing it
    pub fn front(&mut self) -> Option<&T> {
        if self.head.is_none() {
            self.head = self.queue.pop();
        }
        self.head.as_ref()
    }

    /// Pop everything currently queued
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop())
    }

    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.head.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none() && self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_fifo_order() {
        let (mut tx, mut rx) = transfer_queue(4);

        assert!(tx.push(1).is_ok());
        assert!(tx.push(2).is_ok());
        assert!(tx.push(3).is_ok());
        assert_eq!(rx.len(), 3);

        assert_eq!(rx.pop(), Some(1));
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_full_queue_returns_item() {
        let (mut tx, mut rx) = transfer_queue(2);

        assert!(tx.push("a").is_ok());
        assert!(tx.push("b").is_ok());
        assert!(tx.is_full());

        let start = Instant::now();
        assert_eq!(tx.push("c"), Err("c"));
        assert!(start.elapsed() < Duration::from_millis(50));

        assert_eq!(rx.drain().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_front_does_not_remove() {
        let (mut tx, mut rx) = transfer_queue(4);
        assert_eq!(rx.front(), None);

        tx.push(7).unwrap();
        tx.push(8).unwrap();
        assert_eq!(rx.front(), Some(&7));
        assert_eq!(rx.front(), Some(&7));
        assert_eq!(rx.len(), 2);

        assert_eq!(rx.pop(), Some(7));
        assert_eq!(rx.front(), Some(&8));
        assert_eq!(rx.drain().collect::<Vec<_>>(), vec![8]);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_cross_thread_transfer() {
        let (mut tx, mut rx) = transfer_queue::<Vec<u8>>(8);

        let consumer = std::thread::spawn(move || {
            let mut received = Vec::new();
            while received.len() < 100 {
                if let Some(item) = rx.pop() {
                    received.push(item);
                } else {
                    std::thread::yield_now();
                }
            }
            received
        });

        for i in 0..100u8 {
            let mut item = vec![i; 16];
            loop {
                match tx.push(item) {
                    Ok(()) => break,
                    Err(back) => {
                        item = back;
                        std::thread::yield_now();
                    }
                }
            }
        }

        let received = consumer.join().unwrap();
        for (i, item) in received.iter().enumerate() {
            assert_eq!(item, &vec![i as u8; 16]);
        }
    }

    proptest! {
        #[test]
        fn prop_fifo_up_to_capacity(items in proptest::collection::vec(any::<Vec<u8>>(), 0..32)) {
            let (mut tx, mut rx) = transfer_queue(32);
            for item in &items {
                prop_assert!(tx.push(item.clone()).is_ok());
            }
            let popped: Vec<_> = rx.drain().collect();
            prop_assert_eq!(popped, items);
        }

        #[test]
        fn prop_drop_newest_when_full(capacity in 1usize..16, extra in 1usize..8) {
            let (mut tx, mut rx) = transfer_queue(capacity);
            let mut rejected = Vec::new();
            for i in 0..capacity + extra {
                if let Err(item) = tx.push(i) {
                    rejected.push(item);
                }
            }
            prop_assert_eq!(rx.len(), capacity);
            prop_assert_eq!(rejected, (capacity..capacity + extra).collect::<Vec<_>>());
            prop_assert_eq!(rx.drain().collect::<Vec<_>>(), (0..capacity).collect::<Vec<_>>());
        }
    }
}
