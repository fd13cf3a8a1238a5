//! # Event bus
//!
//! Multicast dispatcher mapping event kinds to ordered handler lists. Dispatch is synchronous: every
//! handler runs on the caller's thread, in registration order, against the same `&mut` arguments.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace};

use super::EventArgs;

/// Error returned by a failing handler
pub type SubscriberError = Box<dyn Error + Send + Sync>;

/// Handler callback signature
type Callback<T> = dyn Fn(&mut T) -> Result<(), SubscriberError> + Send + Sync;

/// What [`EventBus::dispatch`] does when a handler fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberErrorPolicy {
    /// Stop at the first failing handler and return its error to the call site
    #[default]
    Propagate,
    /// Log the failure and keep running the remaining handlers
    LogAndContinue,
}

/// Errors surfaced by [`EventBus::dispatch`]
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A handler returned an error under [`SubscriberErrorPolicy::Propagate`]
    #[error("subscriber `{owner}` of {event} failed: {source}")]
    Subscriber {
        /// Event kind being dispatched
        event: &'static str,
        /// Owner label of the failing handler
        owner: String,
        /// Error returned by the handler
        source: SubscriberError,
    },
}

/// A subscriber callback.
///
/// Handlers compare by identity: clones of one handler are the same handler, while two handlers
/// built from identical closures are not.
pub struct Handler<T> {
    /// The callback itself
    callback: Arc<Callback<T>>,
    /// Plugin (or other component) the handler belongs to
    owner: Option<Arc<str>>,
}

impl<T: EventArgs> Handler<T> {
    /// Wraps a fallible callback
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            owner: None,
        }
    }

    /// Wraps a callback that cannot fail
    pub fn infallible<F>(callback: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::new(move |ev| {
            callback(ev);
            Ok(())
        })
    }

    /// Labels the handler with the component that registered it
    pub fn owned_by(mut self, owner: impl Into<Arc<str>>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Owner label, if any
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Whether `other` wraps the same callback allocation
    fn same(&self, other: &Self) -> bool {
        // compare data pointers only, vtable pointers are not guaranteed unique
        Arc::as_ptr(&self.callback) as *const () == Arc::as_ptr(&other.callback) as *const ()
    }
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            owner: self.owner.clone(),
        }
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Process-wide event registry.
///
/// One bus is created per framework instance and injected wherever events are raised.
#[derive(Default)]
pub struct EventBus {
    /// Handler lists keyed by argument type
    handlers: RwLock<HashMap<TypeId, Box<dyn ErasedList>>>,
    /// Failure policy for handlers
    policy: SubscriberErrorPolicy,
}

impl EventBus {
    /// Creates an empty bus with the given failure policy
    pub fn new(policy: SubscriberErrorPolicy) -> Self {
        Self {
            handlers: RwLock::default(),
            policy,
        }
    }

    /// Failure policy of this bus
    pub fn policy(&self) -> SubscriberErrorPolicy {
        self.policy
    }

    /// Appends `handler` to the handlers of `T`. Subscribing a handler twice invokes it twice.
    pub fn subscribe<T: EventArgs>(&self, handler: Handler<T>) {
        debug!(
            event = T::NAME,
            owner = handler.owner().unwrap_or("-"),
            "subscribing handler"
        );
        let mut handlers = self.handlers.write().unwrap();
        let list = handlers
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<Handler<T>>::new()));
        if let Some(list) = list.as_any_mut().downcast_mut::<Vec<Handler<T>>>() {
            list.push(handler);
        }
    }

    /// Removes the first registration of `handler`. Returns `false` if it was not subscribed.
    pub fn unsubscribe<T: EventArgs>(&self, handler: &Handler<T>) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        let Some(list) = handlers
            .get_mut(&TypeId::of::<T>())
            .and_then(|l| l.as_any_mut().downcast_mut::<Vec<Handler<T>>>())
        else {
            return false;
        };
        match list.iter().position(|h| h.same(handler)) {
            Some(index) => {
                list.remove(index);
                debug!(event = T::NAME, "unsubscribed handler");
                true
            }
            None => false,
        }
    }

    /// Number of registrations for `T`
    pub fn handler_count<T: EventArgs>(&self) -> usize {
        self.snapshot::<T>().len()
    }

    /// Whether any handler is registered for the argument type `type_id`
    pub fn has_subscribers(&self, type_id: TypeId) -> bool {
        let handlers = self.handlers.read().unwrap();
        handlers.get(&type_id).is_some_and(|list| list.len() > 0)
    }

    /// Drops every registration
    pub fn clear(&self) {
        self.handlers.write().unwrap().clear();
        debug!("cleared all subscriptions");
    }

    /// Runs every handler of `T` in registration order.
    ///
    /// The handler list is snapshotted first, so handlers may subscribe, unsubscribe or dispatch
    /// re-entrantly; such changes only affect later dispatches.
    pub fn dispatch<T: EventArgs>(&self, ev: &mut T) -> Result<(), DispatchError> {
        let handlers = self.snapshot::<T>();
        trace!(event = T::NAME, handlers = handlers.len(), "dispatching");

        for handler in handlers {
            let Err(source) = (handler.callback)(ev) else {
                continue;
            };
            let owner = handler.owner().unwrap_or("anonymous").to_string();
            match self.policy {
                SubscriberErrorPolicy::Propagate => {
                    return Err(DispatchError::Subscriber {
                        event: T::NAME,
                        owner,
                        source,
                    })
                }
                SubscriberErrorPolicy::LogAndContinue => {
                    error!(event = T::NAME, %owner, error = %source, "subscriber failed");
                }
            }
        }
        Ok(())
    }

    /// Copies the current handler list of `T`
    fn snapshot<T: EventArgs>(&self) -> Vec<Handler<T>> {
        let handlers = self.handlers.read().unwrap();
        handlers
            .get(&TypeId::of::<T>())
            .and_then(|l| l.as_any().downcast_ref::<Vec<Handler<T>>>())
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = self.handlers.read().map(|h| h.len()).unwrap_or_default();
        f.debug_struct("EventBus")
            .field("kinds", &kinds)
            .field("policy", &self.policy)
            .finish()
    }
}

/// Handler list with its argument type erased
trait ErasedList: Send + Sync {
    /// Number of registrations
    fn len(&self) -> usize;
    #[allow(clippy::missing_docs_in_private_items)]
    fn as_any(&self) -> &dyn Any;
    #[allow(clippy::missing_docs_in_private_items)]
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: EventArgs> ErasedList for Vec<Handler<T>> {
    fn len(&self) -> usize {
        Vec::len(self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Minimal event used by the bus tests
    #[derive(Debug, Default)]
    struct Probe {
        /// Handlers that ran, in order
        seen: Vec<&'static str>,
        /// Value mutated by handlers
        value: i32,
    }
    impl EventArgs for Probe {
        const NAME: &'static str = "Probe";
    }

    #[test]
    /// Handlers run in registration order and share one instance
    fn test_order_and_shared_mutation() {
        let bus = EventBus::default();
        bus.subscribe(Handler::infallible(|ev: &mut Probe| {
            ev.value = 42;
            ev.seen.push("a");
        }));
        bus.subscribe(Handler::infallible(|ev: &mut Probe| {
            // A's mutation must be visible here
            assert_eq!(ev.value, 42);
            ev.seen.push("b");
        }));

        let mut ev = Probe::default();
        bus.dispatch(&mut ev).unwrap();
        assert_eq!(ev.seen, ["a", "b"]);
    }

    #[test]
    /// Duplicate subscriptions run twice and unsubscribe removes one registration at a time
    fn test_duplicates_and_unsubscribe() {
        let bus = EventBus::default();
        let handler = Handler::infallible(|ev: &mut Probe| ev.value += 1);
        bus.subscribe(handler.clone());
        bus.subscribe(handler.clone());
        assert_eq!(bus.handler_count::<Probe>(), 2);

        let mut ev = Probe::default();
        bus.dispatch(&mut ev).unwrap();
        assert_eq!(ev.value, 2);

        assert!(bus.unsubscribe(&handler));
        let mut ev = Probe::default();
        bus.dispatch(&mut ev).unwrap();
        assert_eq!(ev.value, 1);

        assert!(bus.unsubscribe(&handler));
        // not subscribed anymore, so this is a no-op
        assert!(!bus.unsubscribe(&handler));
        let mut ev = Probe::default();
        bus.dispatch(&mut ev).unwrap();
        assert_eq!(ev.value, 0);

        // an identical closure is a different handler
        bus.subscribe(Handler::infallible(|ev: &mut Probe| ev.value += 1));
        assert!(!bus.unsubscribe(&Handler::infallible(|ev: &mut Probe| ev.value += 1)));
    }

    #[test]
    /// The first failure stops the remaining handlers under `Propagate`
    fn test_propagate() {
        let bus = EventBus::new(SubscriberErrorPolicy::Propagate);
        bus.subscribe(Handler::new(|_: &mut Probe| Err("boom".into())).owned_by("BrokenPlugin"));
        bus.subscribe(Handler::infallible(|ev: &mut Probe| ev.value = 1));

        let mut ev = Probe::default();
        let err = bus.dispatch(&mut ev).unwrap_err();
        let DispatchError::Subscriber { event, owner, .. } = &err;
        assert_eq!(*event, "Probe");
        assert_eq!(owner, "BrokenPlugin");
        assert_eq!(ev.value, 0);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    /// Failures are logged and skipped under `LogAndContinue`
    fn test_log_and_continue() {
        let bus = EventBus::new(SubscriberErrorPolicy::LogAndContinue);
        bus.subscribe(Handler::new(|_: &mut Probe| Err("boom".into())));
        bus.subscribe(Handler::infallible(|ev: &mut Probe| ev.value = 1));

        let mut ev = Probe::default();
        bus.dispatch(&mut ev).unwrap();
        assert_eq!(ev.value, 1);
    }

    #[test]
    /// Subscribing from inside a handler only affects later dispatches
    fn test_reentrant_subscribe() {
        let bus = Arc::new(EventBus::default());
        let late_calls = Arc::new(AtomicUsize::new(0));

        let inner_bus = bus.clone();
        let inner_calls = late_calls.clone();
        bus.subscribe(Handler::infallible(move |_: &mut Probe| {
            let calls = inner_calls.clone();
            inner_bus.subscribe(Handler::infallible(move |_: &mut Probe| {
                calls.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        bus.dispatch(&mut Probe::default()).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        bus.dispatch(&mut Probe::default()).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);

        // break the reference cycle through the bus
        bus.clear();
    }

    #[test]
    fn test_has_subscribers_and_clear() {
        let bus = EventBus::default();
        assert!(!bus.has_subscribers(TypeId::of::<Probe>()));

        let handler = Handler::infallible(|_: &mut Probe| {});
        bus.subscribe(handler.clone());
        assert!(bus.has_subscribers(TypeId::of::<Probe>()));

        bus.unsubscribe(&handler);
        assert!(!bus.has_subscribers(TypeId::of::<Probe>()));

        bus.subscribe(handler);
        bus.clear();
        assert_eq!(bus.handler_count::<Probe>(), 0);
    }
}
