//! The observation layer: turns plain objects and arrays into sources of per-member events.
//!
//! Observing a value attaches an [`ObservableRecord`] to it and installs accessors for the
//! members it holds at that moment. From then on, reading an installed member through the
//! handle reports its [`FieldKey`] to the innermost dependency collector, and writing one
//! publishes a change on the bus.

mod array;
mod object;

pub use array::*;
pub use object::*;

use crate::{
    bus::{self, Channel, Event},
    config::config,
    context,
    error::{Error, Result},
    key::{FieldKey, Member, RecordId},
    value::{Kind, Value},
};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Bookkeeping attached to a wrapped object or array.
///
/// The record never owns the member values themselves: those live in the handle's private
/// shadow store, which only the accessor methods touch.
#[derive(Clone)]
pub struct ObservableRecord(Rc<RecordInner>);

struct RecordInner {
    id: RecordId,
    kind: Kind,
    /// Object members with an installed accessor
    members: RefCell<HashSet<Member>>,
    /// Array indices below this bound have an installed accessor
    bound: Cell<usize>,
}

impl ObservableRecord {
    fn for_object(members: impl IntoIterator<Item = Member>) -> Self {
        Self(Rc::new(RecordInner {
            id: RecordId::next(),
            kind: Kind::PlainObject,
            members: RefCell::new(members.into_iter().collect()),
            bound: Cell::new(0),
        }))
    }

    fn for_array(len: usize) -> Self {
        Self(Rc::new(RecordInner { id: RecordId::next(), kind: Kind::PlainArray, members: RefCell::new(HashSet::new()), bound: Cell::new(len) }))
    }

    pub fn id(&self) -> RecordId { self.0.id }

    pub fn kind(&self) -> Kind { self.0.kind }

    /// The key naming `member` of this record
    pub fn key(&self, member: impl Into<Member>) -> FieldKey { FieldKey::new(self.0.id, member) }

    /// Whether reads and writes of `member` go through an accessor
    pub fn is_observed(&self, member: &Member) -> bool {
        match self.0.kind {
            Kind::PlainArray => member.as_str() == Member::LENGTH || member.as_index().is_some_and(|index| index < self.0.bound.get()),
            _ => self.0.members.borrow().contains(member),
        }
    }

    pub(crate) fn install(&self, member: Member) { self.0.members.borrow_mut().insert(member); }

    pub(crate) fn bound(&self) -> usize { self.0.bound.get() }

    /// Re-establishes index accessors after the array changed shape
    pub(crate) fn rebind(&self, len: usize) { self.0.bound.set(len); }
}

impl PartialEq for ObservableRecord {
    fn eq(&self, other: &Self) -> bool { self.0.id == other.0.id }
}

impl Eq for ObservableRecord {}

impl fmt::Debug for ObservableRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableRecord").field("id", &self.0.id).field("kind", &self.0.kind).finish()
    }
}

/// Wraps a plain object or array. Calling it again on the same target returns the same record.
pub fn observe(target: &Value) -> Result<ObservableRecord> {
    match target {
        Value::Object(object) => Ok(object.observe()),
        Value::Array(array) => Ok(array.observe()),
        other => Err(Error::InvalidTarget { kind: other.kind() }),
    }
}

/// Observes `target` and hands back its externally visible handle
pub fn observable(target: impl Into<Value>) -> Result<Value> {
    let target = target.into();
    observe(&target)?;
    Ok(target)
}

/// Nested plain objects and arrays are observed the first time they are read through an accessor
pub(crate) fn wrap_nested(value: Value) -> Value {
    match &value {
        Value::Object(object) => {
            object.observe();
        }
        Value::Array(array) => {
            array.observe();
        }
        _ => {}
    }
    value
}

/// Fails with `ActionRequired` when strict mode forbids mutating `key` right now
pub(crate) fn authorize(key: &FieldKey) -> Result<()> {
    if config().strict && !context::in_action() {
        tracing::debug!(%key, "rejected mutation outside of an action");
        return Err(Error::ActionRequired { key: key.clone() });
    }
    Ok(())
}

/// Publishes a change of `key`, unless change detection is disabled
pub(crate) fn announce(key: FieldKey) {
    if !context::detects_changes() {
        tracing::trace!(%key, "change detection disabled, not announcing");
        return;
    }
    bus::publish(Channel::Change, &Event::new(Channel::Change, key));
}
