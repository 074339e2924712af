use super::{ReactiveOptions, Subscription, reactivable};
use std::fmt;

/// Keeps a reactive function alive and subscribed. Dropping it unsubscribes.
#[must_use = "the reaction stops as soon as the disposer is dropped"]
pub struct Disposer(Box<dyn Subscription>);

impl Disposer {
    pub fn new(subscription: impl Subscription + 'static) -> Self { Self(Box::new(subscription)) }

    /// Stops the reaction. Calling it again does nothing.
    pub fn unsubscribe(&self) { self.0.unsubscribe() }

    pub fn is_subscribed(&self) -> bool { self.0.is_subscribed() }
}

impl Drop for Disposer {
    fn drop(&mut self) { self.0.unsubscribe(); }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("Disposer").field("subscribed", &self.is_subscribed()).finish() }
}

/// Runs `f` now and again on the next tick after any field it read changes
pub fn autorun(f: impl Fn() + 'static) -> Disposer {
    let reaction = reactivable(f, ReactiveOptions::default().batched(true).named("autorun"));
    reaction.subscribe();
    reaction.run();
    Disposer::new(reaction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observe::observable, tick};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_reruns_on_flush() {
        let value = observable(json!({ "value": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let runs = Rc::new(Cell::new(0));

        let _disposer = {
            let runs = runs.clone();
            let object = object.clone();
            autorun(move || {
                object.get("value");
                runs.set(runs.get() + 1);
            })
        };
        assert_eq!(runs.get(), 1);

        object.set("value", 2).unwrap();
        object.set("value", 3).unwrap();
        assert_eq!(runs.get(), 1);
        tick::flush();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_disposer_stops_reaction() {
        let value = observable(json!({ "value": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let runs = Rc::new(Cell::new(0));

        let disposer = {
            let runs = runs.clone();
            let object = object.clone();
            autorun(move || {
                object.get("value");
                runs.set(runs.get() + 1);
            })
        };
        disposer.unsubscribe();
        disposer.unsubscribe();
        assert!(!disposer.is_subscribed());

        object.set("value", 2).unwrap();
        tick::flush();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_dropping_disposer_releases_fields() {
        let value = observable(json!({ "value": 1 })).unwrap();
        let object = value.as_object().unwrap().clone();
        let key = object.record().unwrap().key("value");

        let disposer = {
            let object = object.clone();
            autorun(move || {
                object.get("value");
            })
        };
        assert_eq!(crate::bus::listener_count(crate::bus::Channel::Change, &key), 1);
        drop(disposer);
        assert_eq!(crate::bus::listener_count(crate::bus::Channel::Change, &key), 0);
    }
}
