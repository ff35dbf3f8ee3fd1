use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::bridge::{BridgeError, HostBridge};
use crate::events::{ShimEvent, TransactionId};
use crate::hub::{EventHub, Handler};

/// ACK and NACK wrappers registered for one transaction.
type Watched = BTreeMap<TransactionId, (Handler, Handler)>;

/// Correlates outgoing app messages with the host's `ACK<id>` / `NACK<id>`
/// answers.
///
/// Pending transactions never time out. A message the host never answers
/// keeps its two wrapper subscriptions until [`TransactionTracker::clear`].
#[derive(Clone)]
pub struct TransactionTracker {
    hub: EventHub,
    host: Rc<dyn HostBridge>,
    watched: Rc<RefCell<Watched>>,
}

impl TransactionTracker {
    pub fn new(hub: EventHub, host: Rc<dyn HostBridge>) -> Self {
        Self {
            hub,
            host,
            watched: Rc::default(),
        }
    }

    /// Hand an already serialized payload to the host.
    ///
    /// Correlation is requested only when a callback is supplied. The
    /// returned id is whatever the host issued, if anything. An empty id
    /// cannot be answered and counts as none.
    pub fn begin(
        &self,
        payload: &str,
        on_ack: Option<Handler>,
        on_nack: Option<Handler>,
    ) -> Result<Option<TransactionId>, BridgeError> {
        let needs_transaction = on_ack.is_some() || on_nack.is_some();
        let issued = self
            .host
            .send_app_message(payload, needs_transaction)?
            .filter(|id| !id.as_str().is_empty());

        match issued {
            Some(id) if needs_transaction => {
                tracing::debug!(target: "transactions", id = %id, "awaiting acknowledgement");
                self.watch(id.clone(), on_ack, on_nack);
                Ok(Some(id))
            }
            issued => Ok(issued),
        }
    }

    fn watch(&self, id: TransactionId, on_ack: Option<Handler>, on_nack: Option<Handler>) {
        // The host reused an id that is still pending; the older callbacks
        // can no longer be told apart from the new ones.
        self.forget(&id);

        let settled = Rc::new(Cell::new(false));
        let teardown: Rc<dyn Fn()> = {
            let hub = self.hub.downgrade();
            let watched = Rc::downgrade(&self.watched);
            let id = id.clone();
            Rc::new(move || {
                if let (Some(hub), Some(watched)) = (hub.upgrade(), watched.upgrade()) {
                    TransactionTracker::unwatch(&hub, &watched, &id);
                }
            })
        };

        let ack = settle_once(on_ack, Rc::clone(&settled), Rc::clone(&teardown));
        let nack = settle_once(on_nack, settled, teardown);

        self.hub.subscribe(ShimEvent::Ack(id.clone()), ack.clone());
        self.hub.subscribe(ShimEvent::Nack(id.clone()), nack.clone());
        self.watched.borrow_mut().insert(id, (ack, nack));
    }

    /// Ids still waiting for the host to answer.
    pub fn pending(&self) -> Vec<TransactionId> {
        self.watched.borrow().keys().cloned().collect()
    }

    /// Abandon every pending transaction. Their callbacks are dropped
    /// without running.
    pub fn clear(&self) {
        let ids = self.pending();
        if !ids.is_empty() {
            tracing::debug!(
                target: "transactions",
                abandoned = ids.len(),
                "dropping pending transactions"
            );
        }
        for id in ids {
            self.forget(&id);
        }
    }

    fn forget(&self, id: &TransactionId) {
        Self::unwatch(&self.hub, &self.watched, id);
    }

    fn unwatch(hub: &EventHub, watched: &RefCell<Watched>, id: &TransactionId) {
        let taken = watched.borrow_mut().remove(id);
        if let Some((ack, nack)) = taken {
            hub.unsubscribe(&ShimEvent::Ack(id.clone()), &ack);
            hub.unsubscribe(&ShimEvent::Nack(id.clone()), &nack);
        }
    }
}

fn settle_once(
    callback: Option<Handler>,
    settled: Rc<Cell<bool>>,
    teardown: Rc<dyn Fn()>,
) -> Handler {
    Handler::new(move |args| {
        if settled.replace(true) {
            return Ok(());
        }
        let result = match &callback {
            Some(callback) => callback.call(args),
            None => Ok(()),
        };
        teardown();
        result
    })
}
