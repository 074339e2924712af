use std::cell::RefCell;
use std::rc::Rc;
use tracing::Level;
use vigil::{Object, Value, observable};

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() { let _ = tracing_subscriber::fmt().with_max_level(Level::DEBUG).with_test_writer().try_init(); }

#[allow(unused)]
pub fn watcher<T: 'static>() -> (Box<dyn Fn(T)>, Box<dyn Fn() -> Vec<T>>) {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let watcher = {
        let changes = changes.clone();
        Box::new(move |value: T| changes.borrow_mut().push(value))
    };

    let check = Box::new(move || {
        let changes: Vec<T> = changes.borrow_mut().drain(..).collect();
        changes
    });

    (watcher, check)
}

/// Observes a JSON object literal and returns its handle
#[allow(unused)]
pub fn object(json: serde_json::Value) -> Object {
    match observable(json) {
        Ok(Value::Object(object)) => object,
        other => panic!("expected an object, got {other:?}"),
    }
}
