use super::{ObservableRecord, announce, authorize, wrap_nested};
use crate::{collect, error::Result, key::Member, value::Value};
use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

/// A handle to a plain array. Clones alias the same array.
///
/// Besides one accessor per index, an observed array has a synthetic `length` field. Every
/// mutator announces exactly one change on `length` rather than one per moved index, and
/// every index read also depends on `length`, so readers learn about shape changes.
#[derive(Clone, Default)]
pub struct Array(Rc<ArrayCell>);

#[derive(Default)]
struct ArrayCell {
    store: RefCell<Vec<Value>>,
    record: OnceCell<ObservableRecord>,
}

impl Array {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self) -> Option<ObservableRecord> { self.0.record.get().cloned() }

    pub(crate) fn observe(&self) -> ObservableRecord {
        self.0
            .record
            .get_or_init(|| {
                let record = ObservableRecord::for_array(self.0.store.borrow().len());
                tracing::trace!(record = %record.id(), "observed array");
                record
            })
            .clone()
    }

    pub fn get(&self, index: usize) -> Value {
        let value = self.peek(index);
        let Some(record) = self.0.record.get() else {
            return value;
        };
        if index < record.bound() {
            collect::report(record.key(index));
            collect::report(record.key(Member::length()));
            wrap_nested(value)
        } else {
            collect::report(record.key(Member::length()));
            value
        }
    }

    pub fn peek(&self, index: usize) -> Value { self.0.store.borrow().get(index).cloned().unwrap_or_default() }

    /// The number of elements; on an observed array this reads `length`
    pub fn len(&self) -> usize {
        if let Some(record) = self.0.record.get() {
            collect::report(record.key(Member::length()));
        }
        self.0.store.borrow().len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Tracked copy of every element
    pub fn to_vec(&self) -> Vec<Value> { (0..self.len()).map(|index| self.get(index)).collect() }

    /// Untracked copy of every element
    pub fn peek_all(&self) -> Vec<Value> { self.0.store.borrow().clone() }

    /// Writes one element. Writing past the end pads with `Null` and counts as a shape change.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        match self.0.record.get() {
            Some(record) if index < record.bound() => {
                if self.peek(index).same(&value) {
                    return Ok(());
                }
                let key = record.key(index);
                authorize(&key)?;
                self.0.store.borrow_mut()[index] = value;
                announce(key);
                Ok(())
            }
            _ => self.mutate(|items| {
                if index < items.len() {
                    items[index] = value;
                } else {
                    items.resize(index, Value::Null);
                    items.push(value);
                }
                ((), true)
            }),
        }
    }

    /// Appends `value`, returning the new length
    pub fn push(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.mutate(|items| {
            items.push(value);
            (items.len(), true)
        })
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        self.mutate(|items| {
            let popped = items.pop();
            let changed = popped.is_some();
            (popped, changed)
        })
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        self.mutate(|items| if items.is_empty() { (None, false) } else { (Some(items.remove(0)), true) })
    }

    /// Prepends `value`, returning the new length
    pub fn unshift(&self, value: impl Into<Value>) -> Result<usize> {
        let value = value.into();
        self.mutate(|items| {
            items.insert(0, value);
            (items.len(), true)
        })
    }

    /// Removes `delete_count` elements starting at `start` and inserts `items` in their place,
    /// returning the removed elements. Out of range bounds are clamped.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Result<Vec<Value>> {
        self.mutate(|store| {
            let start = start.min(store.len());
            let end = start + delete_count.min(store.len() - start);
            let changed = end > start || !items.is_empty();
            let removed = store.splice(start..end, items).collect();
            (removed, changed)
        })
    }

    pub fn reverse(&self) -> Result<()> {
        self.mutate(|items| {
            items.reverse();
            ((), items.len() > 1)
        })
    }

    pub fn ptr_eq(&self, other: &Array) -> bool { Rc::ptr_eq(&self.0, &other.0) }

    pub(crate) fn addr(&self) -> usize { Rc::as_ptr(&self.0) as usize }

    /// Applies a bulk mutation to the shadow store. `f` reports whether anything changed; if so
    /// the index accessors are re-established and a single `length` change is announced.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> (R, bool)) -> Result<R> {
        let Some(record) = self.0.record.get() else {
            let (out, _) = f(&mut *self.0.store.borrow_mut());
            return Ok(out);
        };
        let key = record.key(Member::length());
        authorize(&key)?;
        let (out, changed, len) = {
            let mut store = self.0.store.borrow_mut();
            let (out, changed) = f(&mut *store);
            (out, changed, store.len())
        };
        if changed {
            record.rebind(len);
            announce(key);
        }
        Ok(out)
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self { Self(Rc::new(ArrayCell { store: RefCell::new(items), record: OnceCell::new() })) }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self { Array::from(iter.into_iter().map(Into::into).collect::<Vec<_>>()) }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array").field("record", &self.0.record.get().map(|r| r.id())).field("len", &self.0.store.borrow().len()).finish()
    }
}
