use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::Message;

/// Outcome of pushing into a [`Mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// The mailbox was full; its oldest message was discarded.
    DroppedOldest,
    Closed,
}

#[derive(Debug, Default)]
struct Slots {
    queue: VecDeque<Message>,
    closed: bool,
}

/// Bounded single-consumer queue feeding one client's delivery loop.
///
/// Pushing never waits: a full mailbox drops its oldest message so one
/// stalled reader cannot hold up the rest of the room.
#[derive(Debug)]
pub struct Mailbox {
    slots: Mutex<Slots>,
    notify: Notify,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, message: Message) -> Delivery {
        let delivery = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return Delivery::Closed;
            }

            let delivery = if slots.queue.len() >= self.capacity {
                slots.queue.pop_front();
                Delivery::DroppedOldest
            } else {
                Delivery::Queued
            };
            slots.queue.push_back(message);
            delivery
        };

        self.notify.notify_one();
        delivery
    }

    /// Waits for the next message. Returns `None` once the mailbox is closed.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            let notified = self.notify.notified();
            {
                let mut slots = self.slots.lock();
                if slots.closed {
                    return None;
                }
                if let Some(message) = slots.queue.pop_front() {
                    return Some(message);
                }
            }
            notified.await;
        }
    }

    /// Closes the mailbox and discards anything still queued.
    pub fn close(&self) {
        {
            let mut slots = self.slots.lock();
            slots.closed = true;
            slots.queue.clear();
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.slots.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
