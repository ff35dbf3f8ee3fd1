use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use thiserror::Error;

use crate::bridge::{report, HostBridge};
use crate::events::ShimEvent;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),
    #[error("handler received malformed arguments: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HandlerResult = Result<(), HandlerError>;

type HandlerFn = dyn Fn(&[Value]) -> HandlerResult;

/// A subscriber callback.
///
/// Handlers compare by identity: a clone is equal to its original, two
/// handlers built from identical closures are not.
#[derive(Clone)]
pub struct Handler(Rc<HandlerFn>);

impl Handler {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&[Value]) -> HandlerResult + 'static,
    {
        Self(Rc::new(callback))
    }

    /// Wrap a callback that cannot fail.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&[Value]) + 'static,
    {
        Self::new(move |args| {
            callback(args);
            Ok(())
        })
    }

    pub fn call(&self, args: &[Value]) -> HandlerResult {
        (self.0)(args)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler")
            .field(&Rc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<ShimEvent, Vec<Registration>>,
}

impl Registry {
    fn contains(&self, event: &ShimEvent, id: SubscriptionId) -> bool {
        self.entries
            .get(event)
            .is_some_and(|regs| regs.iter().any(|reg| reg.id == id))
    }
}

/// Tells the host a `fire` is over, however delivery ended.
struct DeliveryGuard {
    host: Rc<dyn HostBridge>,
    name: String,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        self.host.event_finished(&self.name);
    }
}

/// Named-event registry shared by the page and the host.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventHub {
    registry: Rc<RefCell<Registry>>,
    host: Rc<dyn HostBridge>,
}

impl EventHub {
    pub fn new(host: Rc<dyn HostBridge>) -> Self {
        Self {
            registry: Rc::new(RefCell::new(Registry::default())),
            host,
        }
    }

    pub fn subscribe(&self, event: ShimEvent, handler: Handler) -> SubscriptionId {
        let mut registry = self.registry.borrow_mut();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        tracing::trace!(target: "hub", event = %event, "subscribe");
        registry
            .entries
            .entry(event)
            .or_default()
            .push(Registration { id, handler });
        id
    }

    /// Drop the first registration of `handler` for `event`.
    ///
    /// Returns whether anything was removed; unknown events and handlers are
    /// not an error.
    pub fn unsubscribe(&self, event: &ShimEvent, handler: &Handler) -> bool {
        let mut registry = self.registry.borrow_mut();
        let Some(registrations) = registry.entries.get_mut(event) else {
            return false;
        };
        let Some(index) = registrations.iter().position(|reg| &reg.handler == handler) else {
            return false;
        };
        registrations.remove(index);
        if registrations.is_empty() {
            registry.entries.remove(event);
        }
        tracing::trace!(target: "hub", event = %event, "unsubscribe");
        true
    }

    /// Deliver `args` to every handler registered for `event` when the call
    /// starts, in registration order, and return how many handlers ran.
    ///
    /// Handlers subscribed during delivery wait for the next `fire`; handlers
    /// unsubscribed during delivery are skipped. A failing handler is
    /// reported and does not stop the others. The host hears
    /// `event_finished` exactly once per call, even when a handler panics.
    pub fn fire(&self, event: &ShimEvent, args: &[Value]) -> usize {
        let _finished = DeliveryGuard {
            host: Rc::clone(&self.host),
            name: event.wire_name().into_owned(),
        };

        let snapshot: Vec<(SubscriptionId, Handler)> = self
            .registry
            .borrow()
            .entries
            .get(event)
            .map(|regs| {
                regs.iter()
                    .map(|reg| (reg.id, reg.handler.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, handler) in snapshot {
            if !self.registry.borrow().contains(event, id) {
                continue;
            }
            delivered += 1;
            if let Err(err) = handler.call(args) {
                report(
                    self.host.as_ref(),
                    &format!("listener for {event} failed: {err}"),
                );
            }
        }

        tracing::debug!(target: "hub", event = %event, delivered, "fired");
        delivered
    }

    pub fn listener_count(&self, event: &ShimEvent) -> usize {
        self.registry
            .borrow()
            .entries
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Forget every registration. Used when the overlay closes.
    pub fn clear(&self) {
        // Handlers may own clones of the session; drop them outside the borrow.
        let entries = std::mem::take(&mut self.registry.borrow_mut().entries);
        drop(entries);
    }

    pub fn downgrade(&self) -> WeakEventHub {
        WeakEventHub {
            registry: Rc::downgrade(&self.registry),
            host: Rc::downgrade(&self.host),
        }
    }
}

/// Non-owning hub handle for callbacks that live inside the hub itself.
#[derive(Clone)]
pub struct WeakEventHub {
    registry: Weak<RefCell<Registry>>,
    host: Weak<dyn HostBridge>,
}

impl WeakEventHub {
    pub fn upgrade(&self) -> Option<EventHub> {
        Some(EventHub {
            registry: self.registry.upgrade()?,
            host: self.host.upgrade()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    use serde_json::json;
    use url::Url;
    use uuid::Uuid;

    use super::*;
    use crate::bridge::BridgeError;
    use crate::events::TransactionId;

    #[derive(Default)]
    struct FinishedLog {
        finished: RefCell<Vec<String>>,
        logs: RefCell<Vec<String>>,
    }

    impl HostBridge for FinishedLog {
        fn send_app_message(
            &self,
            _payload: &str,
            _needs_transaction: bool,
        ) -> Result<Option<TransactionId>, BridgeError> {
            Ok(None)
        }
        fn app_stored_preset(&self) -> Option<String> {
            None
        }
        fn save_app_stored_preset(&self, _preset: &str) -> Result<(), BridgeError> {
            Ok(())
        }
        fn active_watch_info(&self) -> String {
            "{}".into()
        }
        fn app_uuid(&self) -> Uuid {
            Uuid::nil()
        }
        fn watch_token(&self) -> String {
            String::new()
        }
        fn close_activity(&self) {}
        fn event_finished(&self, event: &str) {
            self.finished.borrow_mut().push(event.to_string());
        }
        fn open_external(&self, _url: &Url) -> Result<(), BridgeError> {
            Ok(())
        }
        fn log(&self, message: &str) {
            self.logs.borrow_mut().push(message.to_string());
        }
    }

    fn hub() -> (EventHub, Rc<FinishedLog>) {
        let host = Rc::new(FinishedLog::default());
        (EventHub::new(host.clone()), host)
    }

    fn counter() -> (Handler, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        (Handler::from_fn(move |_| seen.set(seen.get() + 1)), calls)
    }

    #[test]
    fn fire_without_listeners_still_finishes() {
        let (hub, host) = hub();
        assert_eq!(hub.fire(&ShimEvent::Ready, &[]), 0);
        assert_eq!(*host.finished.borrow(), vec!["ready".to_string()]);
    }

    #[test]
    fn duplicate_registration_delivers_twice() {
        let (hub, _) = hub();
        let (handler, calls) = counter();
        hub.subscribe(ShimEvent::AppMessage, handler.clone());
        hub.subscribe(ShimEvent::AppMessage, handler.clone());
        hub.fire(&ShimEvent::AppMessage, &[json!({"a": 1})]);
        assert_eq!(calls.get(), 2);

        assert!(hub.unsubscribe(&ShimEvent::AppMessage, &handler));
        hub.fire(&ShimEvent::AppMessage, &[]);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let (hub, _) = hub();
        let (handler, _) = counter();
        assert!(!hub.unsubscribe(&ShimEvent::Named("nothing".into()), &handler));
        hub.subscribe(ShimEvent::Ready, handler);
        let (other, _) = counter();
        assert!(!hub.unsubscribe(&ShimEvent::Ready, &other));
        assert_eq!(hub.listener_count(&ShimEvent::Ready), 1);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let (hub, _) = hub();
        let order = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            hub.subscribe(
                ShimEvent::Ready,
                Handler::from_fn(move |_| order.borrow_mut().push(tag)),
            );
        }
        hub.fire(&ShimEvent::Ready, &[]);
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn handler_removed_mid_fire_is_skipped() {
        let (hub, _) = hub();
        let (victim, victim_calls) = counter();

        let remover = {
            let hub = hub.downgrade();
            let victim = victim.clone();
            Handler::from_fn(move |_| {
                if let Some(hub) = hub.upgrade() {
                    hub.unsubscribe(&ShimEvent::Ready, &victim);
                }
            })
        };

        hub.subscribe(ShimEvent::Ready, remover);
        hub.subscribe(ShimEvent::Ready, victim);
        assert_eq!(hub.fire(&ShimEvent::Ready, &[]), 1);
        assert_eq!(victim_calls.get(), 0);
    }

    #[test]
    fn handler_added_mid_fire_waits_for_next_fire() {
        let (hub, _) = hub();
        let (late, late_calls) = counter();
        let adder = {
            let hub = hub.downgrade();
            Handler::from_fn(move |_| {
                if let Some(hub) = hub.upgrade() {
                    hub.subscribe(ShimEvent::Ready, late.clone());
                }
            })
        };
        hub.subscribe(ShimEvent::Ready, adder);

        hub.fire(&ShimEvent::Ready, &[]);
        assert_eq!(late_calls.get(), 0);
        hub.fire(&ShimEvent::Ready, &[]);
        assert_eq!(late_calls.get(), 1);
    }

    #[test]
    fn failing_handler_does_not_stop_delivery() {
        let (hub, host) = hub();
        hub.subscribe(
            ShimEvent::Ready,
            Handler::new(|_| Err(HandlerError::Failed("boom".into()))),
        );
        let (handler, calls) = counter();
        hub.subscribe(ShimEvent::Ready, handler);

        assert_eq!(hub.fire(&ShimEvent::Ready, &[]), 2);
        assert_eq!(calls.get(), 1);
        assert_eq!(host.logs.borrow().len(), 1);
        assert_eq!(host.finished.borrow().len(), 1);
    }

    #[test]
    fn panicking_handler_still_finishes() {
        let (hub, host) = hub();
        hub.subscribe(
            ShimEvent::WebviewClosed,
            Handler::from_fn(|_| panic!("listener blew up")),
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            hub.fire(&ShimEvent::WebviewClosed, &[]);
        }));
        assert!(result.is_err());
        assert_eq!(*host.finished.borrow(), vec!["webviewclosed".to_string()]);
    }

    #[test]
    fn clear_drops_everything() {
        let (hub, _) = hub();
        let (handler, calls) = counter();
        hub.subscribe(ShimEvent::Ready, handler);
        hub.clear();
        assert_eq!(hub.listener_count(&ShimEvent::Ready), 0);
        hub.fire(&ShimEvent::Ready, &[]);
        assert_eq!(calls.get(), 0);
    }
}
