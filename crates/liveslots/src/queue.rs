//! The vat's single task queue.
//!
//! Each vat runs on exactly one logical execution stream. User-visible work
//! (delivered messages, promise watcher callbacks) is pushed onto this queue
//! and drained at microtask boundaries; quiescence is the state where the
//! queue is empty and nothing is mid-task. The queue never spawns threads.

use futures::future::poll_fn;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Poll;

type Task = Box<dyn FnOnce()>;

/// A cloneable handle to the vat's microtask queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `task` to run on a later turn.
    pub fn push(&self, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Runs the next queued task, if any. Returns whether one ran.
    pub(crate) fn run_next(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Drains the queue, yielding to the surrounding executor between tasks,
    /// and completes once the queue is empty. Tasks may push further tasks;
    /// those run before quiescence is reported.
    pub async fn wait_until_quiescent(&self) {
        loop {
            if !self.run_next() {
                return;
            }
            yield_now().await;
        }
    }
}

/// Yields once to the surrounding executor; a bare microtask boundary.
async fn yield_now() {
    let mut yielded = false;
    poll_fn(|cx| {
        if yielded {
            Poll::Ready(())
        } else {
            yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    })
    .await;
}
