//! The tick scheduler: defers work until the host's current dispatch has finished.
//!
//! Tasks queued with [`next_tick`] run together in the next [`flush`], in the order they were
//! first queued. Queuing a task which is already waiting does nothing, so any number of writes
//! in one tick cost one re-run. When the first task enters an empty queue the installed
//! [`TickDriver`] is armed; it decides when the flush actually happens.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "task {}", self.0) }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Why a queued task did not complete
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task was cancelled before it ran")]
    Cancelled,
}

pub type Outcome = Result<(), TaskError>;

/// A unit of deferred work. Clones are the same task for deduplication purposes.
#[derive(Clone)]
pub struct Task(Rc<TaskInner>);

struct TaskInner {
    id: TaskId,
    run: Box<dyn Fn() -> Outcome>,
}

impl Task {
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self::build(Box::new(move || {
            f();
            Ok(())
        }))
    }

    /// A task whose errors are reported through its [`Ticket`]
    pub fn fallible<E: fmt::Display>(f: impl Fn() -> Result<(), E> + 'static) -> Self {
        Self::build(Box::new(move || f().map_err(|e| TaskError::Failed(e.to_string()))))
    }

    fn build(run: Box<dyn Fn() -> Outcome>) -> Self { Self(Rc::new(TaskInner { id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)), run })) }

    pub fn id(&self) -> TaskId { self.0.id }

    /// Runs the task now. A panic is caught and returned as [`TaskError::Panicked`].
    pub fn invoke(&self) -> Outcome {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.0.run)())) {
            Ok(outcome) => outcome,
            Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_tuple("Task").field(&self.0.id).finish() }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Settles once the queued task has run, failed, or been cancelled
#[derive(Debug, Clone)]
pub struct Ticket(watch::Receiver<Option<Outcome>>);

impl Ticket {
    /// The outcome, if the task has settled already
    pub fn outcome(&self) -> Option<Outcome> { self.0.borrow().clone() }

    pub fn is_settled(&self) -> bool { self.0.borrow().is_some() }

    /// Waits until the task settles. A task dropped from the queue without running settles as cancelled.
    pub async fn settled(&self) -> Outcome {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }
        let mut receiver = self.0.clone();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(TaskError::Cancelled))
    }
}

/// Decides when a flush happens once work is queued
pub trait TickDriver {
    /// Called once each time the queue goes from empty to non-empty
    fn arm(&self);
}

/// Leaves flushing to explicit [`flush`] calls. This is the default driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualDriver;

impl TickDriver for ManualDriver {
    fn arm(&self) {}
}

/// Flushes from a task spawned on the current [`tokio::task::LocalSet`], which runs after the
/// synchronous call stack that queued the work has returned to the executor.
///
/// Arming this driver outside of a `LocalSet` panics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSetDriver;

impl TickDriver for LocalSetDriver {
    fn arm(&self) {
        tokio::task::spawn_local(async {
            flush();
        });
    }
}

/// What a flush did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of tasks invoked
    pub ran: usize,
    pub failures: Vec<(TaskId, TaskError)>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool { self.failures.is_empty() }
}

type Batch = Rc<dyn Fn(&mut dyn FnMut())>;

struct Waiting {
    seq: u64,
    notify: watch::Sender<Option<Outcome>>,
}

struct Scheduler {
    /// Every enqueue in order. Entries whose sequence number no longer matches `waiting` were
    /// cancelled and are skipped by the flush.
    queue: VecDeque<(u64, Task)>,
    waiting: HashMap<TaskId, Waiting>,
    seq: u64,
    armed: bool,
    driver: Rc<dyn TickDriver>,
    batch: Option<Batch>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { queue: VecDeque::new(), waiting: HashMap::new(), seq: 0, armed: false, driver: Rc::new(ManualDriver), batch: None }
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Queues `task` for the next flush, or joins its pending run if it is already queued.
///
/// Once this thread's scheduler is gone the task is dropped and the ticket is settled as cancelled.
pub fn next_tick(task: &Task) -> Ticket {
    let queued = SCHEDULER.try_with(|scheduler| {
        let mut scheduler = scheduler.borrow_mut();
        if let Some(waiting) = scheduler.waiting.get(&task.id()) {
            return (Ticket(waiting.notify.subscribe()), None);
        }
        scheduler.seq += 1;
        let seq = scheduler.seq;
        let (notify, receiver) = watch::channel(None);
        scheduler.waiting.insert(task.id(), Waiting { seq, notify });
        scheduler.queue.push_back((seq, task.clone()));
        let arm = match scheduler.armed {
            true => None,
            false => {
                scheduler.armed = true;
                Some(scheduler.driver.clone())
            }
        };
        (Ticket(receiver), arm)
    });
    let Ok((ticket, arm)) = queued else {
        tracing::trace!(task = %task.id(), "scheduler gone, task dropped");
        let (_, receiver) = watch::channel(Some(Err(TaskError::Cancelled)));
        return Ticket(receiver);
    };
    tracing::trace!(task = %task.id(), "queued for next tick");
    if let Some(driver) = arm {
        driver.arm();
    }
    ticket
}

/// Removes `task` from the queue, settling its ticket as cancelled. Returns false if it was not queued.
pub fn cancel(task: &Task) -> bool {
    let waiting = SCHEDULER.try_with(|scheduler| scheduler.borrow_mut().waiting.remove(&task.id())).ok().flatten();
    match waiting {
        Some(waiting) => {
            waiting.notify.send_replace(Some(Err(TaskError::Cancelled)));
            true
        }
        None => false,
    }
}

/// Runs every task queued so far.
///
/// Tasks queued while the flush is running wait for the next one. A failing task is logged and
/// recorded in the report; the remaining tasks still run.
pub fn flush() -> FlushReport {
    let (mut queue, mut waiting, batch) = SCHEDULER.with(|scheduler| {
        let mut scheduler = scheduler.borrow_mut();
        scheduler.armed = false;
        (std::mem::take(&mut scheduler.queue), std::mem::take(&mut scheduler.waiting), scheduler.batch.clone())
    });
    let mut report = FlushReport::default();
    if waiting.is_empty() {
        return report;
    }
    tracing::debug!(tasks = waiting.len(), "flush");

    let mut run = || {
        for (seq, task) in queue.drain(..) {
            let notify = match waiting.remove(&task.id()) {
                Some(entry) if entry.seq == seq => entry.notify,
                Some(entry) => {
                    // queued again after a cancel; the later entry owns the run
                    waiting.insert(task.id(), entry);
                    continue;
                }
                None => continue,
            };
            let outcome = task.invoke();
            report.ran += 1;
            if let Err(error) = &outcome {
                tracing::error!(task = %task.id(), %error, "tick task failed");
                report.failures.push((task.id(), error.clone()));
            }
            notify.send_replace(Some(outcome));
        }
    };
    match batch {
        Some(batch) => batch(&mut run),
        None => run(),
    }
    report
}

/// The number of tasks waiting for the next flush
pub fn pending() -> usize { SCHEDULER.with(|scheduler| scheduler.borrow().waiting.len()) }

/// Installs the driver armed when work is queued on this thread
pub fn set_driver(driver: impl TickDriver + 'static) { SCHEDULER.with(|scheduler| scheduler.borrow_mut().driver = Rc::new(driver)); }

/// Wraps every flush in `batch`, which must call the closure it is given exactly once.
/// Hosts use this to group the re-runs of one flush into a single update of their own.
pub fn set_batch(batch: impl Fn(&mut dyn FnMut()) + 'static) { SCHEDULER.with(|scheduler| scheduler.borrow_mut().batch = Some(Rc::new(batch))); }

/// Goes back to running flushed tasks directly
pub fn reset_batch() { SCHEDULER.with(|scheduler| scheduler.borrow_mut().batch = None); }

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting() -> (Rc<Cell<usize>>, Task) {
        let count = Rc::new(Cell::new(0));
        let task = {
            let count = count.clone();
            Task::new(move || count.set(count.get() + 1))
        };
        (count, task)
    }

    #[test]
    fn test_runs_on_flush_not_before() {
        let (count, task) = counting();
        let ticket = next_tick(&task);
        assert_eq!(count.get(), 0);
        assert_eq!(ticket.outcome(), None);

        let report = flush();
        assert_eq!(report.ran, 1);
        assert_eq!(count.get(), 1);
        assert_eq!(ticket.outcome(), Some(Ok(())));
    }

    #[test]
    fn test_duplicates_coalesce() {
        let (count, task) = counting();
        let first = next_tick(&task);
        let second = next_tick(&task.clone());
        assert_eq!(pending(), 1);
        flush();
        assert_eq!(count.get(), 1);
        assert_eq!(first.outcome(), Some(Ok(())));
        assert_eq!(second.outcome(), Some(Ok(())));
    }

    #[test]
    fn test_fifo_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let tasks: Vec<Task> = (0..3)
            .map(|n| {
                let order = order.clone();
                Task::new(move || order.borrow_mut().push(n))
            })
            .collect();
        next_tick(&tasks[2]);
        next_tick(&tasks[0]);
        next_tick(&tasks[1]);
        next_tick(&tasks[2]);
        flush();
        assert_eq!(*order.borrow(), vec![2, 0, 1]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let (count, ok) = counting();
        let fails = Task::fallible(|| Err("nope"));
        let panics = Task::new(|| panic!("kaboom"));
        let failed = next_tick(&fails);
        let panicked = next_tick(&panics);
        next_tick(&ok);

        let report = flush();
        assert_eq!(report.ran, 3);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(count.get(), 1);
        assert_eq!(failed.outcome(), Some(Err(TaskError::Failed("nope".into()))));
        assert_eq!(panicked.outcome(), Some(Err(TaskError::Panicked("kaboom".into()))));
    }

    #[test]
    fn test_work_queued_during_flush_waits() {
        let (count, inner) = counting();
        let outer = Task::new(move || {
            next_tick(&inner);
        });
        next_tick(&outer);
        assert_eq!(flush().ran, 1);
        assert_eq!(count.get(), 0);
        assert_eq!(flush().ran, 1);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_cancel() {
        let (count, task) = counting();
        let ticket = next_tick(&task);
        assert!(cancel(&task));
        assert!(!cancel(&task));
        assert_eq!(ticket.outcome(), Some(Err(TaskError::Cancelled)));
        assert_eq!(flush().ran, 0);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_driver_armed_once_per_tick() {
        struct Counting(Rc<Cell<usize>>);
        impl TickDriver for Counting {
            fn arm(&self) { self.0.set(self.0.get() + 1) }
        }
        let arms = Rc::new(Cell::new(0));
        set_driver(Counting(arms.clone()));

        let (_, a) = counting();
        let (_, b) = counting();
        next_tick(&a);
        next_tick(&b);
        assert_eq!(arms.get(), 1);
        flush();
        next_tick(&a);
        assert_eq!(arms.get(), 2);
        flush();
        set_driver(ManualDriver);
    }

    #[test]
    fn test_batch_wraps_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let log = log.clone();
            set_batch(move |run| {
                log.borrow_mut().push("begin");
                run();
                log.borrow_mut().push("end");
            });
        }
        let task = {
            let log = log.clone();
            Task::new(move || log.borrow_mut().push("task"))
        };
        next_tick(&task);
        flush();
        reset_batch();
        assert_eq!(*log.borrow(), vec!["begin", "task", "end"]);
    }

    #[test]
    fn test_cancel_then_requeue_runs_once_in_new_position() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let tasks: Vec<Task> = (0..500)
            .map(|n| {
                let order = order.clone();
                Task::new(move || order.borrow_mut().push(n))
            })
            .collect();
        for task in tasks.iter().chain(tasks.iter()) {
            next_tick(task);
        }
        assert_eq!(pending(), 500);

        let cancelled = next_tick(&tasks[0]);
        assert!(cancel(&tasks[0]));
        let requeued = next_tick(&tasks[0]);
        assert_eq!(cancelled.outcome(), Some(Err(TaskError::Cancelled)));
        assert!(cancel(&tasks[1]));
        assert_eq!(pending(), 499);

        let report = flush();
        assert_eq!(report.ran, 499);
        assert_eq!(requeued.outcome(), Some(Ok(())));
        let expected: Vec<usize> = (2..500).chain([0]).collect();
        assert_eq!(*order.borrow(), expected);
        assert_eq!(pending(), 0);
    }

    #[test]
    fn test_queue_during_thread_teardown() {
        struct QueueOnDrop(Task);
        impl Drop for QueueOnDrop {
            fn drop(&mut self) {
                next_tick(&self.0);
                cancel(&self.0);
            }
        }
        thread_local! {
            static LATE: RefCell<Option<QueueOnDrop>> = RefCell::new(None);
        }

        let joined = std::thread::spawn(|| {
            LATE.with(|late| *late.borrow_mut() = Some(QueueOnDrop(Task::new(|| {}))));
            // touched after LATE, so the scheduler is destroyed first
            assert_eq!(pending(), 0);
        })
        .join();
        assert!(joined.is_ok());
    }
}
