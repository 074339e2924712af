//! Dependency collection: which observable fields did one execution read?

use crate::{config::config, context, key::FieldKey};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// A deduplicated set of field keys.
///
/// Keys remember the order they were first collected in, for reporting; equality ignores it.
#[derive(Clone, Default)]
pub struct Dependencies {
    order: Vec<FieldKey>,
    index: HashSet<FieldKey>,
}

impl Dependencies {
    pub fn new() -> Self { Self::default() }

    /// Adds `key`, returning false if it was already present
    pub fn insert(&mut self, key: FieldKey) -> bool {
        if self.index.insert(key.clone()) {
            self.order.push(key);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, key: &FieldKey) -> bool { self.index.contains(key) }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Keys in first-collected order
    pub fn iter(&self) -> std::slice::Iter<'_, FieldKey> { self.order.iter() }
}

impl PartialEq for Dependencies {
    fn eq(&self, other: &Self) -> bool { self.index == other.index }
}

impl Eq for Dependencies {}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_set().entries(self.order.iter().map(|key| key.to_string())).finish() }
}

impl FromIterator<FieldKey> for Dependencies {
    fn from_iter<I: IntoIterator<Item = FieldKey>>(iter: I) -> Self {
        let mut dependencies = Dependencies::new();
        for key in iter {
            dependencies.insert(key);
        }
        dependencies
    }
}

impl<'a> IntoIterator for &'a Dependencies {
    type Item = &'a FieldKey;
    type IntoIter = std::slice::Iter<'a, FieldKey>;
    fn into_iter(self) -> Self::IntoIter { self.order.iter() }
}

/// The result of a [`collect`]ed call together with the fields it read
#[derive(Debug, Clone)]
pub struct Collected<R> {
    pub result: R,
    pub dependencies: Dependencies,
}

impl<R> Collected<R> {
    pub fn into_parts(self) -> (R, Dependencies) { (self.result, self.dependencies) }
}

type Sink = Rc<RefCell<Dependencies>>;

thread_local! {
    /// Active collectors. A read is attributed only to the innermost one.
    static COLLECTORS: RefCell<Vec<Sink>> = const { RefCell::new(Vec::new()) };
}

/// Called by the observation layer for every tracked read
pub(crate) fn report(key: FieldKey) {
    if !context::is_collecting() {
        return;
    }
    COLLECTORS.with(|collectors| {
        if let Some(sink) = collectors.borrow().last() {
            sink.borrow_mut().insert(key);
        }
    });
}

/// Runs `f` with collection enabled and returns its result along with every field it read
pub fn collect<R>(f: impl FnOnce() -> R) -> Collected<R> {
    let sink: Sink = Rc::default();
    let result = {
        let _collector = context::push(&COLLECTORS, sink.clone());
        let _collecting = context::collecting(true);
        f()
    };
    let dependencies = sink.take();

    let max_dependencies = config().max_dependencies;
    if dependencies.len() > max_dependencies {
        tracing::warn!(count = dependencies.len(), max_dependencies, "a single run read an unusually large number of fields");
    }
    Collected { result, dependencies }
}

/// Runs `f` with collection enabled
pub fn track<R>(f: impl FnOnce() -> R) -> R {
    let _collecting = context::collecting(true);
    f()
}

/// Runs `f` with collection disabled, so its reads are not attributed to any enclosing collector
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _collecting = context::collecting(false);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, configure};
    use crate::testing::logged;
    use crate::{observe::observable, value::Value};
    use serde_json::json;

    #[test]
    fn test_collects_exactly_what_was_read() {
        let value = observable(json!({ "a": 1, "b": 2 })).unwrap();
        let object = value.as_object().unwrap();
        let record = object.record().unwrap();

        let (result, dependencies) = collect(|| object.get("a")).into_parts();
        assert_eq!(result, Value::from(1));
        assert!(dependencies.contains(&record.key("a")));
        assert!(!dependencies.contains(&record.key("b")));
    }

    #[test]
    fn test_deduplicates_in_order() {
        let value = observable(json!({ "a": 1, "b": 2 })).unwrap();
        let object = value.as_object().unwrap();
        let record = object.record().unwrap();

        let collected = collect(|| {
            object.get("b");
            object.get("a");
            object.get("b");
        });
        assert_eq!(collected.dependencies.iter().cloned().collect::<Vec<_>>(), vec![record.key("b"), record.key("a")]);
        assert_eq!(collected.dependencies, [record.key("a"), record.key("b")].into_iter().collect());
    }

    #[test]
    fn test_untrack_hides_reads() {
        let value = observable(json!({ "a": 1, "b": 2 })).unwrap();
        let object = value.as_object().unwrap();
        let record = object.record().unwrap();

        let collected = collect(|| {
            untrack(|| object.get("a"));
            object.get("b")
        });
        assert_eq!(collected.dependencies, [record.key("b")].into_iter().collect());
        assert!(!context::is_collecting());
    }

    #[test]
    fn test_nested_collect_is_innermost_only() {
        let value = observable(json!({ "outer": 1, "inner": 2 })).unwrap();
        let object = value.as_object().unwrap();
        let record = object.record().unwrap();

        let outer = collect(|| {
            let inner = collect(|| object.get("inner"));
            assert_eq!(inner.dependencies, [record.key("inner")].into_iter().collect());
            object.get("outer")
        });
        assert_eq!(outer.dependencies, [record.key("outer")].into_iter().collect());
    }

    #[test]
    fn test_reads_outside_collect_are_dropped() {
        let value = observable(json!({ "a": 1 })).unwrap();
        let object = value.as_object().unwrap();
        track(|| object.get("a"));
        let collected = collect(|| ());
        assert!(collected.dependencies.is_empty());
    }

    #[test]
    fn test_collection_restored_after_panic() {
        let value = observable(json!({ "a": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            collect(|| {
                object.get("a");
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        assert!(!context::is_collecting());
        assert!(collect(|| ()).dependencies.is_empty());
    }

    #[test]
    fn test_wide_read_warns_and_keeps_every_dependency() {
        configure(Config { max_dependencies: 1, ..Config::default() }).unwrap();
        let value = observable(json!({ "a": 1, "b": 2, "c": 3 })).unwrap();
        let object = value.as_object().unwrap();
        let record = object.record().unwrap();

        let (collected, logs) = logged(|| collect(|| ["a", "b", "c"].map(|member| object.get(member))));
        configure(Config::default()).unwrap();
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("unusually large number of fields"), "{logs}");
        assert!(logs.contains("count=3"), "{logs}");
        assert_eq!(collected.result, [Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(collected.dependencies, ["a", "b", "c"].into_iter().map(|member| record.key(member)).collect());

        let (_, quiet) = logged(|| collect(|| ["a", "b", "c"].map(|member| object.get(member))));
        assert!(!quiet.contains("unusually large"), "{quiet}");
    }
}
