//! FIFO message queue shared between the control thread and the IO thread.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A thread-safe queue of protocol messages.
///
/// Producers `push` one message at a time; the consumer takes everything at
/// once with `drain_all`, which swaps the buffer out under the lock so the
/// messages are processed without holding it.
#[derive(Debug, Default)]
pub struct Mailbox {
    queue: Mutex<Vec<String>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Mailbox {
            queue: Mutex::new(Vec::new()),
        }
    }

    /// Append a message
    pub fn push(&self, message: impl Into<String>) {
        self.lock().push(message.into());
    }

    /// Take every queued message, oldest first
    pub fn drain_all(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the lock cannot leave the Vec half-updated, so the
    // queued messages are still delivered instead of being skipped.
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
