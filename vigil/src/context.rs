//! Thread-local execution context.
//!
//! Every flag is a stack. Setting a flag pushes a value and returns a [`Scoped`] guard which
//! truncates the stack back to its previous depth when dropped, including while a panic unwinds
//! through the scope.

use crate::reactive::ReactiveId;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread::LocalKey;

thread_local! {
    static COLLECTING: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static DETECTING: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
    static ACTIONS: RefCell<Vec<Rc<str>>> = const { RefCell::new(Vec::new()) };
    static REACTIVES: RefCell<Vec<ReactiveId>> = const { RefCell::new(Vec::new()) };
}

/// Restores a context stack to the depth it had before the matching push
#[must_use = "the pushed value is popped as soon as the guard is dropped"]
pub struct Scoped<T: 'static> {
    stack: &'static LocalKey<RefCell<Vec<T>>>,
    depth: usize,
}

impl<T: 'static> Drop for Scoped<T> {
    fn drop(&mut self) {
        // the stack may already be gone during thread teardown
        let _ = self.stack.try_with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

pub(crate) fn push<T: 'static>(stack: &'static LocalKey<RefCell<Vec<T>>>, value: T) -> Scoped<T> {
    let depth = stack.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.push(value);
        depth
    });
    Scoped { stack, depth }
}

fn top<T: Clone + 'static>(stack: &'static LocalKey<RefCell<Vec<T>>>) -> Option<T> {
    stack.try_with(|stack| stack.borrow().last().cloned()).ok().flatten()
}

/// Whether reads of observable members are currently reported to the dependency collector
pub fn is_collecting() -> bool { top(&COLLECTING).unwrap_or(false) }

/// Enables or disables collection until the guard is dropped
pub fn collecting(enabled: bool) -> Scoped<bool> { push(&COLLECTING, enabled) }

/// Whether writes to observable members publish change events
pub fn detects_changes() -> bool { top(&DETECTING).unwrap_or(true) }

/// Enables or disables change detection until the guard is dropped
pub fn change_detection(enabled: bool) -> Scoped<bool> { push(&DETECTING, enabled) }

/// Runs `f` with change detection disabled. Writes still land in the shadow store but nobody is notified.
pub fn silently<R>(f: impl FnOnce() -> R) -> R {
    let _detecting = change_detection(false);
    f()
}

/// The innermost active action, if any
pub fn current_action() -> Option<Rc<str>> { top(&ACTIONS) }

pub fn in_action() -> bool { current_action().is_some() }

/// Runs `f` as an authorized action. Under strict mode, observable fields may only be mutated inside one.
pub fn action<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let _action = push(&ACTIONS, Rc::from(name));
    tracing::trace!("action {name} started");
    f()
}

/// The reactive function whose body is currently executing, if any
pub fn current_reactive() -> Option<ReactiveId> { top(&REACTIVES) }

pub(crate) fn enter_reactive(id: ReactiveId) -> Scoped<ReactiveId> { push(&REACTIVES, id) }
