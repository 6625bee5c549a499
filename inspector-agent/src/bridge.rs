//! Wake-up primitives between the IO thread and the control thread.
//!
//! The control thread runs the host program cooperatively; the IO thread can
//! only ask it to do work by posting a `ControlTask`. Posting also raises an
//! interrupt flag that long-running host code may poll cheaply.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

/// Work the IO thread hands to the control thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTask {
    /// Inbound messages are waiting in the mailbox
    DispatchMessages,
    /// A frontend attached or went away
    SetConnected(bool),
}

/// Sending half, usable from any thread
#[derive(Debug, Clone)]
pub struct ControlWaker {
    tx: Sender<ControlTask>,
    interrupt: Arc<AtomicBool>,
}

impl ControlWaker {
    /// Queue a task and raise the interrupt flag.
    /// Returns false once the control side is gone.
    pub fn post(&self, task: ControlTask) -> bool {
        if self.tx.send(task).is_err() {
            return false;
        }
        self.interrupt.store(true, Ordering::Release);
        true
    }
}

/// Receiving half, owned by the control thread
#[derive(Debug)]
pub struct ControlQueue {
    rx: Receiver<ControlTask>,
    interrupt: Arc<AtomicBool>,
}

impl ControlQueue {
    pub fn new() -> (ControlWaker, ControlQueue) {
        let (tx, rx) = mpsc::channel();
        let interrupt = Arc::new(AtomicBool::new(false));
        (
            ControlWaker {
                tx,
                interrupt: interrupt.clone(),
            },
            ControlQueue { rx, interrupt },
        )
    }

    /// Whether tasks were posted since the queue was last found empty
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    /// Next queued task without blocking
    pub fn try_next(&self) -> Option<ControlTask> {
        // Clear before looking so a post racing with an empty read re-raises it
        self.interrupt.store(false, Ordering::Release);
        match self.rx.try_recv() {
            Ok(task) => {
                self.interrupt.store(true, Ordering::Release);
                Some(task)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a task arrives. None if every waker has been dropped.
    pub fn wait(&self) -> Option<ControlTask> {
        self.rx.recv().ok()
    }
}

/// Outbound wake-up for the IO thread
#[derive(Debug, Clone, Default)]
pub struct IoWaker {
    pending: Arc<AtomicBool>,
}

impl IoWaker {
    /// Signal that outbound messages are queued
    pub fn wake(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Consume a pending signal
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}
