use super::{Reactive, ReactiveOptions, reactivable};
use crate::{
    bus::{self, Channel, Event, Listener},
    collect::{self, Dependencies},
    context,
    key::{FieldKey, RecordId},
    tick::{self, Task},
};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A derived value.
///
/// Read outside of any reactive function, a computed simply calls its function each time.
/// The first read from inside a reactive function activates it: the value is cached, kept
/// current by an internal reactive function, and exposed through a synthetic `value` field
/// which readers depend on. Readers are only notified when the cached value actually changes.
/// Once nothing listens to that field any more the computed goes back to computing on read.
pub struct Computed<T>(Rc<ComputedInner<T>>);

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

struct ComputedInner<T> {
    me: Weak<ComputedInner<T>>,
    compute: Box<dyn Fn() -> T>,
    key: FieldKey,
    cache: RefCell<Option<T>>,
    reaction: RefCell<Option<Reactive<()>>>,
    /// Told when the backing field loses its last listener
    unref: Listener,
    /// Deactivates if the backing field is still unobserved when it runs
    settle: Task,
}

/// Wraps `f` as a [`Computed`]
pub fn computed<T: Clone + PartialEq + 'static>(f: impl Fn() -> T + 'static) -> Computed<T> { Computed::new(f) }

impl<T: Clone + PartialEq + 'static> Computed<T> {
    pub fn new(f: impl Fn() -> T + 'static) -> Self {
        let key = FieldKey::new(RecordId::next(), "value");
        let inner = Rc::new_cyclic(|me: &Weak<ComputedInner<T>>| {
            let unref = {
                let me = me.clone();
                Listener::with_dependencies([key.clone()].into_iter().collect::<Dependencies>(), move |_| {
                    if let Some(inner) = me.upgrade() {
                        tick::next_tick(&inner.settle);
                    }
                })
            };
            let settle = {
                let me = me.clone();
                Task::new(move || {
                    if let Some(inner) = me.upgrade() {
                        inner.settle();
                    }
                })
            };
            ComputedInner { me: me.clone(), compute: Box::new(f), key, cache: RefCell::new(None), reaction: RefCell::new(None), unref, settle }
        });
        Self(inner)
    }

    pub fn get(&self) -> T {
        let inner = &self.0;
        if context::current_reactive().is_none() && !inner.is_active() {
            return (inner.compute)();
        }
        inner.activate();
        collect::report(inner.key.clone());
        let cached = inner.cache.borrow().clone();
        cached.unwrap_or_else(|| (inner.compute)())
    }
}

impl<T> Computed<T> {
    /// Whether the value is currently cached and kept up to date
    pub fn is_active(&self) -> bool { self.0.is_active() }

    /// The synthetic field readers of an active computed depend on
    pub fn key(&self) -> &FieldKey { &self.0.key }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("key", &self.0.key).field("active", &self.0.is_active()).finish()
    }
}

impl<T> ComputedInner<T> {
    fn is_active(&self) -> bool { self.reaction.borrow().is_some() }
}

impl<T: Clone + PartialEq + 'static> ComputedInner<T> {
    fn activate(&self) {
        if self.is_active() {
            return;
        }
        let reaction = {
            let me = self.me.clone();
            reactivable(
                move || {
                    if let Some(inner) = me.upgrade() {
                        inner.refresh();
                    }
                },
                ReactiveOptions::default().named(format!("computed {}", self.key)),
            )
        };
        reaction.subscribe();
        // a panicking first run drops the reaction and leaves us inactive
        reaction.run();
        *self.reaction.borrow_mut() = Some(reaction);
        bus::subscribe(Channel::Unref, &self.unref);
        // a reader that never subscribes must not keep us active
        tick::next_tick(&self.settle);
        tracing::debug!(key = %self.key, "computed activated");
    }

    /// Recomputes, announcing the backing field only if the value changed
    fn refresh(&self) {
        let next = (self.compute)();
        let changed = {
            let mut cache = self.cache.borrow_mut();
            let changed = cache.as_ref().is_some_and(|current| *current != next);
            if changed || cache.is_none() {
                *cache = Some(next);
            }
            changed
        };
        if changed {
            bus::publish(Channel::Change, &Event::new(Channel::Change, self.key.clone()));
        }
    }

    fn settle(&self) {
        if !self.is_active() || bus::listener_count(Channel::Change, &self.key) > 0 {
            return;
        }
        let reaction = self.reaction.borrow_mut().take();
        if let Some(reaction) = reaction {
            reaction.unsubscribe();
        }
        self.cache.borrow_mut().take();
        bus::unsubscribe(Channel::Unref, &self.unref);
        tracing::debug!(key = %self.key, "computed deactivated");
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        bus::unsubscribe(Channel::Unref, &self.unref);
        tick::cancel(&self.settle);
    }
}
