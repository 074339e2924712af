//! Reactive functions: bodies which re-run when a field they read changes.
//!
//! Every run replaces the dependency set with exactly what that run read, so a branch that is
//! no longer taken stops triggering re-runs.

mod autorun;
mod computed;
mod watch;

pub use autorun::*;
pub use computed::*;
pub use watch::*;

use crate::{
    bus::{self, Channel, Listener},
    collect::{Dependencies, collect},
    context,
    error::{Error, Result},
    tick::{self, Task},
};
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReactiveId(u64);

impl fmt::Display for ReactiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "reactive {}", self.0) }
}

static NEXT_REACTIVE_ID: AtomicU64 = AtomicU64::new(1);

/// How a reactive function responds to a change of something it read
#[derive(Clone, Default)]
pub struct ReactiveOptions {
    /// Defer the response to the next tick, coalescing every change made before it
    pub batch: bool,
    /// Called instead of re-running the body
    pub update: Option<Rc<dyn Fn()>>,
    pub name: Option<String>,
}

impl ReactiveOptions {
    pub fn batched(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    pub fn on_update(mut self, update: impl Fn() + 'static) -> Self {
        self.update = Some(Rc::new(update));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Debug for ReactiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveOptions").field("batch", &self.batch).field("update", &self.update.is_some()).field("name", &self.name).finish()
    }
}

/// Anything that holds a bus registration which can be released
pub trait Subscription {
    fn unsubscribe(&self);
    fn is_subscribed(&self) -> bool;
}

/// A wrapped function together with the fields its last run read.
///
/// Clones share the same function. The bus only holds a weak reference, so once the last
/// handle is dropped the function stops reacting.
pub struct Reactive<R>(Rc<ReactiveInner<R>>);

impl<R> Clone for Reactive<R> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

struct ReactiveInner<R> {
    id: ReactiveId,
    name: Option<Rc<str>>,
    listener: Listener,
    /// Queued when a batched function is notified
    rerun: Task,
    batch: bool,
    update: Option<Rc<dyn Fn()>>,
    subscribed: Cell<bool>,
    running: Cell<bool>,
    body: Box<dyn Fn() -> R>,
}

/// Wraps `f` without running or subscribing it
pub fn reactivable<R: 'static>(f: impl Fn() -> R + 'static, options: ReactiveOptions) -> Reactive<R> { Reactive::new(Box::new(f), options) }

impl<R: 'static> Reactive<R> {
    fn new(body: Box<dyn Fn() -> R>, options: ReactiveOptions) -> Self {
        let inner = Rc::new_cyclic(|me: &Weak<ReactiveInner<R>>| {
            let listener = {
                let me = me.clone();
                Listener::with_dependencies(Dependencies::new(), move |_| {
                    if let Some(inner) = me.upgrade() {
                        inner.notify();
                    }
                })
            };
            let rerun = {
                let me = me.clone();
                Task::new(move || {
                    if let Some(inner) = me.upgrade() {
                        inner.react();
                    }
                })
            };
            ReactiveInner {
                id: ReactiveId(NEXT_REACTIVE_ID.fetch_add(1, Ordering::Relaxed)),
                name: options.name.map(Rc::from),
                listener,
                rerun,
                batch: options.batch,
                update: options.update,
                subscribed: Cell::new(false),
                running: Cell::new(false),
                body,
            }
        });
        Self(inner)
    }

    /// Runs the body, replacing the dependency set with the fields read during this run.
    ///
    /// Calling `run` from inside the body executes it again without touching any bookkeeping.
    pub fn run(&self) -> R { self.0.run() }

    /// Starts reacting to changes of the fields read by the most recent run
    pub fn subscribe(&self) {
        self.0.subscribed.set(true);
        bus::subscribe(Channel::Change, &self.0.listener);
    }
}

impl<R> Reactive<R> {
    pub fn id(&self) -> ReactiveId { self.0.id }

    pub fn name(&self) -> Option<&str> { self.0.name.as_deref() }

    /// The fields read by the most recent run
    pub fn dependencies(&self) -> Dependencies { self.0.listener.dependencies().unwrap_or_default() }

    /// Stops reacting. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if self.0.subscribed.replace(false) {
            bus::unsubscribe(Channel::Change, &self.0.listener);
        }
    }

    pub fn is_subscribed(&self) -> bool { self.0.subscribed.get() }
}

impl<R> Subscription for Reactive<R> {
    fn unsubscribe(&self) { Reactive::unsubscribe(self) }

    fn is_subscribed(&self) -> bool { Reactive::is_subscribed(self) }
}

impl<R> fmt::Debug for Reactive<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("subscribed", &self.0.subscribed.get())
            .field("dependencies", &self.dependencies())
            .finish()
    }
}

impl<R> ReactiveInner<R> {
    fn notify(&self) {
        if self.batch {
            tick::next_tick(&self.rerun);
        } else {
            self.react();
        }
    }

    fn react(&self) {
        match &self.update {
            Some(update) => update(),
            None => {
                self.run();
            }
        }
    }

    fn run(&self) -> R {
        if self.running.get() {
            return (self.body)();
        }
        // writes made by the body itself must not notify it
        bus::unsubscribe(Channel::Change, &self.listener);
        let (result, dependencies) = {
            let _running = Running::enter(&self.running);
            let _reactive = context::enter_reactive(self.id);
            collect(|| (self.body)()).into_parts()
        };
        tracing::debug!(reactive = %self.id, name = self.name.as_deref(), dependencies = dependencies.len(), "ran");
        self.listener.set_dependencies(Some(dependencies));
        if self.subscribed.get() {
            bus::subscribe(Channel::Change, &self.listener);
        }
        result
    }
}

impl<R> Drop for ReactiveInner<R> {
    fn drop(&mut self) {
        bus::unsubscribe(Channel::Change, &self.listener);
        tick::cancel(&self.rerun);
    }
}

/// Marks a reactive function as running for the lifetime of the guard
struct Running<'a>(&'a Cell<bool>);

impl<'a> Running<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) { self.0.set(false); }
}

/// Builds a [`Reactive`] from separately supplied parts
pub struct ReactiveBuilder<R> {
    body: Option<Box<dyn Fn() -> R>>,
    options: ReactiveOptions,
}

impl<R> Default for ReactiveBuilder<R> {
    fn default() -> Self { Self { body: None, options: ReactiveOptions::default() } }
}

impl<R: 'static> ReactiveBuilder<R> {
    pub fn new() -> Self { Self::default() }

    pub fn body(mut self, f: impl Fn() -> R + 'static) -> Self {
        self.body = Some(Box::new(f));
        self
    }

    pub fn options(mut self, options: ReactiveOptions) -> Self {
        self.options = options;
        self
    }

    pub fn batched(mut self, batch: bool) -> Self {
        self.options = self.options.batched(batch);
        self
    }

    pub fn on_update(mut self, update: impl Fn() + 'static) -> Self {
        self.options = self.options.on_update(update);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options = self.options.named(name);
        self
    }

    pub fn build(self) -> Result<Reactive<R>> {
        let Some(body) = self.body else {
            return Err(Error::InvalidParameters("a reactive function needs a body".into()));
        };
        if self.options.name.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidParameters("a reactive function name cannot be empty".into()));
        }
        Ok(Reactive::new(body, self.options))
    }
}
