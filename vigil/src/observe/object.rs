use super::{ObservableRecord, announce, authorize, wrap_nested};
use crate::{collect, error::Result, key::Member, value::Value};
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A handle to a plain object. Clones alias the same object.
#[derive(Clone, Default)]
pub struct Object(Rc<ObjectCell>);

#[derive(Default)]
struct ObjectCell {
    /// Shadow store, in insertion order
    store: RefCell<Vec<(Member, Value)>>,
    record: OnceCell<ObservableRecord>,
}

impl Object {
    pub fn new() -> Self { Self::default() }

    /// The record attached by [`observe`](crate::observe), if this object has been observed
    pub fn record(&self) -> Option<ObservableRecord> { self.0.record.get().cloned() }

    pub(crate) fn observe(&self) -> ObservableRecord {
        self.0
            .record
            .get_or_init(|| {
                let record = ObservableRecord::for_object(self.0.store.borrow().iter().map(|(member, _)| member.clone()));
                tracing::trace!(record = %record.id(), "observed object");
                record
            })
            .clone()
    }

    fn observed(&self, member: &Member) -> Option<&ObservableRecord> { self.0.record.get().filter(|record| record.is_observed(member)) }

    /// Reads `member`. Missing members read as `Null`.
    ///
    /// On an observed member this reports the field key to the active collector, and a nested
    /// plain object or array is observed before it is handed out.
    pub fn get(&self, member: impl Into<Member>) -> Value {
        let member = member.into();
        let value = self.lookup(&member);
        match self.observed(&member) {
            Some(record) => {
                collect::report(record.key(member));
                wrap_nested(value)
            }
            None => value,
        }
    }

    /// Reads `member` without reporting it and without observing nested values
    pub fn peek(&self, member: impl Into<Member>) -> Value { self.lookup(&member.into()) }

    /// Writes `member`.
    ///
    /// Writing the value a member already holds does nothing. Otherwise an observed member
    /// is checked against strict mode, stored, and announced on the bus. Members which were
    /// not present when the object was observed are stored without any notification; see
    /// [`Object::define`].
    pub fn set(&self, member: impl Into<Member>, value: impl Into<Value>) -> Result<()> {
        let member = member.into();
        let value = value.into();
        let Some(record) = self.observed(&member) else {
            self.store(member, value);
            return Ok(());
        };
        if self.lookup(&member).same(&value) {
            return Ok(());
        }
        let key = record.key(member.clone());
        authorize(&key)?;
        self.store(member, value);
        announce(key);
        Ok(())
    }

    /// Adds `member` and installs an accessor for it if this object is already observed.
    /// Defining a member which is already observed behaves like [`Object::set`].
    pub fn define(&self, member: impl Into<Member>, value: impl Into<Value>) -> Result<()> {
        let member = member.into();
        match self.0.record.get() {
            Some(record) if !record.is_observed(&member) => {
                authorize(&record.key(member.clone()))?;
                self.store(member.clone(), value.into());
                record.install(member);
                Ok(())
            }
            _ => self.set(member, value),
        }
    }

    /// Member names in insertion order. Untracked.
    pub fn keys(&self) -> Vec<Member> { self.0.store.borrow().iter().map(|(member, _)| member.clone()).collect() }

    pub fn contains(&self, member: impl Into<Member>) -> bool {
        let member = member.into();
        self.0.store.borrow().iter().any(|(m, _)| *m == member)
    }

    pub fn len(&self) -> usize { self.0.store.borrow().len() }

    pub fn is_empty(&self) -> bool { self.0.store.borrow().is_empty() }

    /// Untracked copy of every member
    pub fn peek_entries(&self) -> Vec<(Member, Value)> { self.0.store.borrow().clone() }

    pub fn ptr_eq(&self, other: &Object) -> bool { Rc::ptr_eq(&self.0, &other.0) }

    pub(crate) fn addr(&self) -> usize { Rc::as_ptr(&self.0) as usize }

    fn lookup(&self, member: &Member) -> Value {
        self.0.store.borrow().iter().find(|(m, _)| m == member).map(|(_, value)| value.clone()).unwrap_or_default()
    }

    fn store(&self, member: Member, value: Value) {
        let mut store = self.0.store.borrow_mut();
        match store.iter_mut().find(|(m, _)| *m == member) {
            Some((_, slot)) => *slot = value,
            None => store.push((member, value)),
        }
    }
}

impl<K: Into<Member>, V: Into<Value>> FromIterator<(K, V)> for Object {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        for (member, value) in iter {
            object.store(member.into(), value.into());
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object").field("record", &self.0.record.get().map(|r| r.id())).field("members", &self.keys()).finish()
    }
}
