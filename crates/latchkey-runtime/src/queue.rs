//! Bounded hand-off queues between stages.
//!
//! Thin named wrappers over `crossbeam-channel` so that every blocking point
//! has a timeout and every drop can be logged with the queue's name.
//!
//! | Call | Blocks | On full / empty |
//! |---|---|---|
//! | [`QueueSender::offer`] | up to `timeout` | returns the item in [`OfferError::Full`] |
//! | [`QueueSender::try_offer`] | never | returns the item in [`OfferError::Full`] |
//! | [`QueueReceiver::poll`] | up to `timeout` | `Ok(None)` |

use std::time::Duration;

use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError, bounded, unbounded,
};
use latchkey_types::LatchError;
use tracing::debug;

/// Why an item could not be enqueued.  The item is handed back.
#[derive(Debug, PartialEq, Eq)]
pub enum OfferError<T> {
    /// The queue stayed full for the whole wait.
    Full(T),
    /// The consumer is gone.
    Disconnected(T),
}

impl<T> OfferError<T> {
    pub fn into_inner(self) -> T {
        match self {
            OfferError::Full(item) | OfferError::Disconnected(item) => item,
        }
    }
}

/// Producer half.  Cloneable for multiple producers.
#[derive(Debug)]
pub struct QueueSender<T> {
    name: &'static str,
    tx: Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
        }
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    name: &'static str,
    rx: Receiver<T>,
}

/// Create a named FIFO queue holding at most `capacity` items.
///
/// `capacity == 0` creates an unbounded queue.
pub fn queue<T>(name: &'static str, capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = if capacity == 0 {
        unbounded()
    } else {
        bounded(capacity)
    };
    (QueueSender { name, tx }, QueueReceiver { name, rx })
}

impl<T> QueueSender<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue `item`, waiting at most `timeout` for space.
    pub fn offer(&self, item: T, timeout: Duration) -> Result<(), OfferError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(item) => OfferError::Full(item),
            SendTimeoutError::Disconnected(item) => OfferError::Disconnected(item),
        })
    }

    /// Enqueue `item` without waiting.
    pub fn try_offer(&self, item: T) -> Result<(), OfferError<T>> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) => OfferError::Full(item),
            TrySendError::Disconnected(item) => OfferError::Disconnected(item),
        })
    }
}

impl<T> QueueReceiver<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Dequeue one item, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LatchError::Channel`] once every producer has been dropped
    /// and the queue is empty.
    pub fn poll(&self, timeout: Duration) -> Result<Option<T>, LatchError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Timeout) => {
                debug!(queue = self.name, ?timeout, "queue poll timed out");
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(LatchError::Channel(format!(
                "{} queue has no producers left",
                self.name
            ))),
        }
    }

    /// Number of items waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Recorder;
    use std::time::Instant;

    #[test]
    fn fifo_order() {
        let (tx, rx) = queue("frames", 3);
        for i in 0..3 {
            tx.offer(i, Duration::from_millis(10)).unwrap();
        }
        assert_eq!(rx.len(), 3);
        for i in 0..3 {
            assert_eq!(rx.poll(Duration::from_millis(10)).unwrap(), Some(i));
        }
        assert!(rx.is_empty());
    }

    #[test]
    fn full_queue_times_out_and_returns_item() {
        let (tx, _rx) = queue("frames", 1);
        tx.offer(1u32, Duration::from_millis(10)).unwrap();

        let start = Instant::now();
        let result = tx.offer(2u32, Duration::from_secs(1));
        let waited = start.elapsed();

        assert_eq!(result, Err(OfferError::Full(2)));
        assert!(waited >= Duration::from_millis(900), "returned after {waited:?}");
        assert!(waited < Duration::from_millis(1500), "blocked for {waited:?}");
    }

    #[test]
    fn try_offer_never_blocks() {
        let (tx, _rx) = queue("commands", 1);
        tx.try_offer("a").unwrap();
        let start = Instant::now();
        assert_eq!(tx.try_offer("b"), Err(OfferError::Full("b")));
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn empty_poll_times_out_without_error() {
        let (_tx, rx) = queue::<u8>("commands", 4);
        let start = Instant::now();
        assert_eq!(rx.poll(Duration::from_millis(50)).unwrap(), None);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn empty_poll_logs_timeout() {
        let recorder = Recorder::default();
        let (_tx, rx) = queue::<u8>("frames", 1);
        let polled = recorder.record(|| rx.poll(Duration::from_millis(5)));
        assert_eq!(polled.unwrap(), None);
        assert!(
            recorder
                .events()
                .iter()
                .any(|e| e.contains("queue poll timed out") && e.contains("frames")),
            "events: {:?}",
            recorder.events()
        );
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let (tx, rx) = queue("commands", 0);
        for i in 0..1000 {
            tx.try_offer(i).unwrap();
        }
        assert_eq!(rx.len(), 1000);
    }

    #[test]
    fn disconnected_producers_surface_as_channel_error() {
        let (tx, rx) = queue::<u8>("frames", 1);
        drop(tx);
        assert!(matches!(
            rx.poll(Duration::from_millis(10)),
            Err(LatchError::Channel(_))
        ));
    }

    #[test]
    fn disconnected_consumer_hands_item_back() {
        let (tx, rx) = queue("frames", 1);
        drop(rx);
        let err = tx.offer(7u8, Duration::from_millis(10)).unwrap_err();
        assert_eq!(err, OfferError::Disconnected(7));
        assert_eq!(err.into_inner(), 7);
    }
}
