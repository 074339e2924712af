//! Routes field-level notifications to the listeners that depend on them.
//!
//! There are three channels. `Change` carries writes. `Ref` and `Unref` are derived from
//! `Change` subscriptions: `Ref` fires when a field gains its first change listener and
//! `Unref` when it loses its last one, so expensive sources can activate lazily.

use crate::{collect::Dependencies, config::config, key::FieldKey};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Channel {
    Change,
    Ref,
    Unref,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub channel: Channel,
    pub key: FieldKey,
}

impl Event {
    pub fn new(channel: Channel, key: FieldKey) -> Self { Self { channel, key } }
}

/// Identifies a listener for deduplication and removal
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

/// A callback plus the set of fields it cares about. Clones share the same listener.
#[derive(Clone)]
pub struct Listener(Rc<ListenerInner>);

struct ListenerInner {
    id: ListenerId,
    callback: Box<dyn Fn(&Event)>,
    dependencies: RefCell<Option<Dependencies>>,
}

impl Listener {
    /// A wildcard listener, called for every event on the channels it subscribes to
    pub fn new(callback: impl Fn(&Event) + 'static) -> Self { Self::build(None, callback) }

    pub fn with_dependencies(dependencies: Dependencies, callback: impl Fn(&Event) + 'static) -> Self {
        Self::build(Some(dependencies), callback)
    }

    fn build(dependencies: Option<Dependencies>, callback: impl Fn(&Event) + 'static) -> Self {
        Self(Rc::new(ListenerInner {
            id: ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed)),
            callback: Box::new(callback),
            dependencies: RefCell::new(dependencies),
        }))
    }

    pub fn id(&self) -> ListenerId { self.0.id }

    pub fn dependencies(&self) -> Option<Dependencies> { self.0.dependencies.borrow().clone() }

    /// Replaces the dependency set. Takes effect on the next `subscribe`; an existing
    /// registration keeps the keys it was made with until then.
    pub fn set_dependencies(&self, dependencies: Option<Dependencies>) { *self.0.dependencies.borrow_mut() = dependencies; }

    /// Whether this listener is currently registered on `channel`
    pub fn is_subscribed(&self, channel: Channel) -> bool { BUS.with(|bus| bus.borrow().registry(channel).memberships.contains_key(&self.0.id)) }

    fn call(&self, event: &Event) { (self.0.callback)(event) }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.0.id).field("dependencies", &self.0.dependencies.borrow()).finish()
    }
}

#[derive(Default)]
struct Registry {
    /// Listeners per field, in subscription order
    buckets: HashMap<FieldKey, Vec<Listener>>,
    /// Listeners without a dependency set
    wildcard: Vec<Listener>,
    /// The keys each listener was registered under; `None` for wildcard registrations
    memberships: HashMap<ListenerId, Option<Dependencies>>,
}

impl Registry {
    fn listens(&self, id: ListenerId, key: &FieldKey) -> bool {
        match self.memberships.get(&id) {
            Some(None) => true,
            Some(Some(keys)) => keys.contains(key),
            None => false,
        }
    }

    /// Removes `id` from every bucket it was registered in, returning the keys left without listeners
    fn remove(&mut self, id: ListenerId) -> Vec<FieldKey> {
        let mut emptied = Vec::new();
        match self.memberships.remove(&id) {
            Some(None) => self.wildcard.retain(|listener| listener.id() != id),
            Some(Some(keys)) => {
                for key in keys.iter() {
                    if let Some(bucket) = self.buckets.get_mut(key) {
                        bucket.retain(|listener| listener.id() != id);
                        if bucket.is_empty() {
                            self.buckets.remove(key);
                            emptied.push(key.clone());
                        }
                    }
                }
            }
            None => {}
        }
        emptied
    }
}

#[derive(Default)]
struct EventBus {
    change: Registry,
    refs: Registry,
    unrefs: Registry,
}

impl EventBus {
    fn registry(&self, channel: Channel) -> &Registry {
        match channel {
            Channel::Change => &self.change,
            Channel::Ref => &self.refs,
            Channel::Unref => &self.unrefs,
        }
    }

    fn registry_mut(&mut self, channel: Channel) -> &mut Registry {
        match channel {
            Channel::Change => &mut self.change,
            Channel::Ref => &mut self.refs,
            Channel::Unref => &mut self.unrefs,
        }
    }
}

thread_local! {
    static BUS: RefCell<EventBus> = RefCell::new(EventBus::default());
}

/// Registers `listener` on `channel` under its current dependency set.
///
/// Subscribing an already registered listener moves its registration to the current
/// dependency set, so keys it no longer depends on are released.
pub fn subscribe(channel: Channel, listener: &Listener) {
    let dependencies = listener.dependencies();
    let max_listeners = config().max_listeners;
    let mut crowded = Vec::new();
    let (mut created, emptied) = BUS.with(|bus| {
        let mut bus = bus.borrow_mut();
        let registry = bus.registry_mut(channel);
        let emptied = registry.remove(listener.id());
        let mut created = Vec::new();
        match &dependencies {
            None => registry.wildcard.push(listener.clone()),
            Some(keys) => {
                for key in keys.iter() {
                    let bucket = registry.buckets.entry(key.clone()).or_default();
                    if bucket.is_empty() {
                        created.push(key.clone());
                    }
                    bucket.push(listener.clone());
                    if bucket.len() > max_listeners {
                        crowded.push((key.clone(), bucket.len()));
                    }
                }
            }
        }
        registry.memberships.insert(listener.id(), dependencies.clone());
        (created, emptied)
    });
    tracing::trace!(listener = %listener.id(), ?channel, "subscribed");

    for (key, count) in crowded {
        tracing::warn!(%key, count, max_listeners, "too many listeners for one field, possible listener leak");
    }
    if channel == Channel::Change {
        // a key that was released and immediately re-added never lost its last listener
        let mut emptied = emptied;
        created.retain(|key| match emptied.iter().position(|k| k == key) {
            Some(index) => {
                emptied.swap_remove(index);
                false
            }
            None => true,
        });
        for key in emptied {
            publish(Channel::Unref, &Event::new(Channel::Unref, key));
        }
        for key in created {
            publish(Channel::Ref, &Event::new(Channel::Ref, key));
        }
    }
}

/// Removes `listener` from `channel`. Unsubscribing a listener which is not registered does nothing.
pub fn unsubscribe(channel: Channel, listener: &Listener) {
    let emptied = BUS.try_with(|bus| bus.borrow_mut().registry_mut(channel).remove(listener.id())).unwrap_or_default();
    tracing::trace!(listener = %listener.id(), ?channel, "unsubscribed");
    if channel == Channel::Change {
        for key in emptied {
            publish(Channel::Unref, &Event::new(Channel::Unref, key));
        }
    }
}

/// Delivers `event` to the listeners of its key and to the wildcard listeners of `channel`
pub fn publish(channel: Channel, event: &Event) { dispatch(channel, event, true) }

/// Like [`publish`], but skips wildcard listeners
pub fn publish_exact(channel: Channel, event: &Event) { dispatch(channel, event, false) }

fn dispatch(channel: Channel, event: &Event, wildcards: bool) {
    if event.key.is_internal() {
        return;
    }
    // Snapshot so that listeners may subscribe, unsubscribe or publish while we iterate.
    // Nobody is listening once the bus has been torn down.
    let Ok(listeners) = BUS.try_with(|bus| {
        let bus = bus.borrow();
        let registry = bus.registry(channel);
        let mut listeners = registry.buckets.get(&event.key).cloned().unwrap_or_default();
        if wildcards {
            listeners.extend(registry.wildcard.iter().cloned());
        }
        listeners
    }) else {
        return;
    };
    tracing::trace!(key = %event.key, ?channel, listeners = listeners.len(), "publish");

    for listener in listeners {
        // skip listeners removed by an earlier callback of this same dispatch
        let listening = BUS.try_with(|bus| bus.borrow().registry(channel).listens(listener.id(), &event.key)).unwrap_or(false);
        if listening {
            listener.call(event);
        }
    }
}

/// The number of listeners registered for `key` on `channel`, wildcard listeners excluded
pub fn listener_count(channel: Channel, key: &FieldKey) -> usize {
    BUS.with(|bus| bus.borrow().registry(channel).buckets.get(key).map_or(0, Vec::len))
}

/// The number of keys with at least one listener on `channel`
pub fn key_count(channel: Channel) -> usize { BUS.with(|bus| bus.borrow().registry(channel).buckets.len()) }

pub fn wildcard_count(channel: Channel) -> usize { BUS.with(|bus| bus.borrow().registry(channel).wildcard.len()) }
