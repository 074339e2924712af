use super::{Disposer, autorun};
use crate::{
    collect::untrack,
    value::{Value, shallow_equal},
};
use std::cell::{Cell, RefCell};

/// Calls `handler(new, old)` whenever the value produced by `selector` changes.
///
/// The selector is re-evaluated like an [`autorun`]. Results are compared shallowly: the same
/// primitive or handle, or plain objects and arrays whose own members are the same. With
/// `immediate` the handler is also called after the first evaluation, with no old value.
/// The handler runs untracked, so what it reads does not become a dependency.
pub fn watch(selector: impl Fn() -> Value + 'static, handler: impl Fn(&Value, Option<&Value>) + 'static, immediate: bool) -> Disposer {
    let previous: RefCell<Option<Value>> = RefCell::new(None);
    let first = Cell::new(true);
    autorun(move || {
        let next = selector();
        let old = previous.borrow_mut().replace(next.clone());
        let first = first.replace(false);
        let changed = match &old {
            Some(old) => !shallow_equal(old, &next),
            None => false,
        };
        if changed || (first && immediate) {
            untrack(|| handler(&next, old.as_ref()));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observe::observable, tick};
    use serde_json::json;
    use std::rc::Rc;

    type Calls = Rc<RefCell<Vec<(Value, Option<Value>)>>>;

    fn recorder() -> (Calls, impl Fn(&Value, Option<&Value>) + 'static) {
        let calls: Calls = Rc::default();
        let handler = {
            let calls = calls.clone();
            move |new: &Value, old: Option<&Value>| calls.borrow_mut().push((new.clone(), old.cloned()))
        };
        (calls, handler)
    }

    #[test]
    fn test_not_immediate() {
        let value = observable(json!({ "n": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let (calls, handler) = recorder();

        let _disposer = {
            let object = object.clone();
            watch(move || object.get("n"), handler, false)
        };
        assert!(calls.borrow().is_empty());

        object.set("n", 2).unwrap();
        tick::flush();
        assert_eq!(*calls.borrow(), vec![(Value::from(2), Some(Value::from(1)))]);
    }

    #[test]
    fn test_immediate() {
        let value = observable(json!({ "n": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let (calls, handler) = recorder();

        let _disposer = {
            let object = object.clone();
            watch(move || object.get("n"), handler, true)
        };
        assert_eq!(*calls.borrow(), vec![(Value::from(1), None)]);
    }

    #[test]
    fn test_shallow_equal_results_are_ignored() {
        let value = observable(json!({ "n": 1, "other": 0 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let (calls, handler) = recorder();

        // a fresh array every run, with the same elements
        let _disposer = {
            let object = object.clone();
            watch(
                move || {
                    object.get("other");
                    Value::from(vec![object.get("n")])
                },
                handler,
                false,
            )
        };
        object.set("other", 1).unwrap();
        tick::flush();
        assert!(calls.borrow().is_empty());

        object.set("n", 5).unwrap();
        tick::flush();
        assert_eq!(calls.borrow().len(), 1);
    }
}
