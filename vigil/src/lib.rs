/*!
Observable objects, automatic dependency tracking and reactive functions.

Observing a plain object or array turns every read and write of its members into an
addressable event. A reactive function records which members it read while it ran, and
re-runs when one of them is written. The dependency set is replaced on every run, so only
what the last run actually read can trigger the next one.

# Basic usage

```rust
use vigil::*;
use std::cell::RefCell;
use std::rc::Rc;

let state = observable(serde_json::json!({ "name": "Buffy", "age": 29 })).unwrap();
let person = state.as_object().unwrap().clone();

let seen = Rc::new(RefCell::new(Vec::new()));
let _disposer = {
    let person = person.clone();
    let seen = seen.clone();
    autorun(move || seen.borrow_mut().push(person.get("age")))
};

person.set("age", 70).unwrap();
// re-runs are batched until the end of the tick
assert_eq!(seen.borrow().len(), 1);
tick::flush();
assert_eq!(*seen.borrow(), vec![Value::from(29), Value::from(70)]);

// name was never read, so writing it does not re-run anything
person.set("name", "Faith").unwrap();
assert_eq!(tick::flush().ran, 0);
```

# Strict mode

```rust
use vigil::*;

configure(Config::strict()).unwrap();
let counter = observable(serde_json::json!({ "count": 0 })).unwrap();
let counter = counter.as_object().unwrap();

assert!(matches!(counter.set("count", 1), Err(Error::ActionRequired { .. })));
action("increment", || counter.set("count", 1)).unwrap();
assert_eq!(counter.peek("count"), Value::from(1));
```
*/

pub mod bus;
mod collect;
mod config;
mod context;
mod error;
mod key;
mod observe;
mod reactive;
pub mod tick;
mod value;

#[cfg(test)]
mod testing;

pub use collect::{Collected, Dependencies, collect, track, untrack};
pub use config::{Config, config, configure};
pub use context::{Scoped, action, change_detection, collecting, current_action, current_reactive, detects_changes, in_action, is_collecting, silently};
pub use error::{Error, Result};
pub use key::{FieldKey, Member, RecordId};
pub use observe::{Array, Object, ObservableRecord, observable, observe};
pub use reactive::{
    Computed, Disposer, Reactive, ReactiveBuilder, ReactiveId, ReactiveOptions, Subscription, autorun, computed, reactivable, watch,
};
pub use tick::{flush, next_tick};
pub use value::{Kind, Opaque, Value, shallow_equal};
