//! Notification scheduling strategies
//!
//! A scheduler decides *when* a pending notification flush runs. The store
//! keeps a single "flush scheduled" flag, so a strategy is handed at most
//! one outstanding flush at a time.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// Deferred notification flush
pub type Flush = Box<dyn FnOnce()>;

/// When to run a notification flush
#[derive(Clone)]
pub enum Scheduler {
    /// Flush on the committing call stack
    Immediate,
    /// Flush when the host drains the task queue (end of the current turn)
    Microtask(TaskQueue),
    /// Flush on the next frame of the frame queue
    Frame(FrameQueue),
    /// Host-provided strategy
    Custom(Rc<dyn Fn(Flush)>),
}

impl Scheduler {
    /// Deferred-once-per-turn strategy with a fresh queue
    pub fn microtask() -> Self {
        Scheduler::Microtask(TaskQueue::new())
    }

    /// Frame-deferred strategy with a fresh queue
    pub fn frame() -> Self {
        Scheduler::Frame(FrameQueue::new())
    }

    /// Fully custom strategy
    pub fn custom(strategy: impl Fn(Flush) + 'static) -> Self {
        Scheduler::Custom(Rc::new(strategy))
    }

    /// Hand a flush to the strategy
    pub fn schedule(&self, flush: Flush) {
        match self {
            Scheduler::Immediate => flush(),
            Scheduler::Microtask(queue) => queue.push(flush),
            Scheduler::Frame(frames) => frames.request(flush),
            Scheduler::Custom(strategy) => strategy(flush),
        }
    }

    /// Task queue behind a microtask strategy
    pub fn task_queue(&self) -> Option<&TaskQueue> {
        match self {
            Scheduler::Microtask(queue) => Some(queue),
            _ => None,
        }
    }

    /// Frame queue behind a frame strategy
    pub fn frame_queue(&self) -> Option<&FrameQueue> {
        match self {
            Scheduler::Frame(frames) => Some(frames),
            _ => None,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::microtask()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::Immediate => f.write_str("Immediate"),
            Scheduler::Microtask(queue) => f.debug_tuple("Microtask").field(queue).finish(),
            Scheduler::Frame(frames) => f.debug_tuple("Frame").field(frames).finish(),
            Scheduler::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Microtask-equivalent queue, drained by the host at the end of a turn
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Flush>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        TaskQueue::default()
    }

    pub fn push(&self, task: Flush) {
        self.tasks.borrow_mut().push_back(task);
    }

    /// Run tasks until the queue is empty, including tasks queued by the
    /// tasks themselves. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue").field("pending", &self.len()).finish()
    }
}

/// Animation-frame-equivalent queue
#[derive(Clone, Default)]
pub struct FrameQueue {
    requested: Rc<RefCell<Vec<Flush>>>,
    frames: Rc<Cell<u64>>,
}

impl FrameQueue {
    pub fn new() -> Self {
        FrameQueue::default()
    }

    /// Queue a task for the next frame
    pub fn request(&self, task: Flush) {
        self.requested.borrow_mut().push(task);
    }

    /// Run one frame. Only tasks requested before the frame began run;
    /// tasks requested during the frame wait for the next one.
    pub fn run_frame(&self) -> usize {
        let batch = std::mem::take(&mut *self.requested.borrow_mut());
        self.frames.set(self.frames.get() + 1);
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Frames run so far
    pub fn frame_count(&self) -> u64 {
        self.frames.get()
    }

    pub fn pending(&self) -> usize {
        self.requested.borrow().len()
    }
}

impl fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameQueue")
            .field("pending", &self.pending())
            .field("frames", &self.frame_count())
            .finish()
    }
}
