//! Waker for host futures driven by the event loop
//!
//! Waking posts the task id back to the loop's channel, so a task woken from
//! any thread is polled again on the runtime's turn.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::task::Waker;

use futures::task::{waker, ArcWake};

use super::event_loop::Message;
use crate::operation::lock;

/// Wakes one task of one event loop
pub(crate) struct TaskWaker {
    /// Task ID that this waker is associated with
    task_id: u64,
    /// The owning loop's message channel
    sender: Mutex<Sender<Message>>,
}

impl TaskWaker {
    pub(crate) fn new(task_id: u64, sender: Sender<Message>) -> Waker {
        waker(Arc::new(TaskWaker {
            task_id,
            sender: Mutex::new(sender),
        }))
    }
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // a closed channel means the loop is gone; nothing left to wake
        let _ = lock(&arc_self.sender).send(Message::Wake(arc_self.task_id));
    }
}
