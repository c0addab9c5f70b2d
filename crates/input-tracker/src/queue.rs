//! Unbounded multi-producer, single-consumer event queue.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use ducktrack_event_model::EventRecord;

/// Create a connected sender/receiver pair.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer side. Cheap to clone; one clone per listener.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<EventRecord>,
}

impl EventSender {
    /// Enqueue without blocking. Returns `false` if the consumer is gone.
    pub fn enqueue(&self, record: EventRecord) -> bool {
        self.tx.send(record).is_ok()
    }
}

/// Result of a dequeue attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Record(EventRecord),
    /// Nothing arrived in time; producers are still connected.
    Empty,
    /// Every producer has hung up and the queue is drained.
    Closed,
}

/// Consumer side. Owned by the log writer thread.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<EventRecord>,
}

impl EventReceiver {
    /// Wait up to `timeout` for the next record.
    pub fn dequeue(&self, timeout: Duration) -> Dequeued {
        match self.rx.recv_timeout(timeout) {
            Ok(record) => Dequeued::Record(record),
            Err(RecvTimeoutError::Timeout) => Dequeued::Empty,
            Err(RecvTimeoutError::Disconnected) => Dequeued::Closed,
        }
    }

    /// Take the next record if one is already queued.
    pub fn try_dequeue(&self) -> Dequeued {
        match self.rx.try_recv() {
            Ok(record) => Dequeued::Record(record),
            Err(TryRecvError::Empty) => Dequeued::Empty,
            Err(TryRecvError::Disconnected) => Dequeued::Closed,
        }
    }
}
