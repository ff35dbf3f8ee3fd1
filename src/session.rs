use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value};

use crate::bridge::{report, HostBridge, PageView};
use crate::error::ShimError;
use crate::events::{ShimEvent, TransactionId};
use crate::flow::{ConfigurationFlow, FlowOptions, FlowState, UiPhase};
use crate::gateway::MessageGateway;
use crate::hub::{EventHub, Handler};
use crate::transactions::TransactionTracker;

/// One run of a configuration page, from overlay open to overlay close.
///
/// The session stands in for the page's global `Pebble` object. Page-facing
/// methods never fail: problems turn into a diagnostic on the host and a
/// no-op. Cloning hands out another reference to the same session, which is
/// what page listeners capture when they need to call back in.
#[derive(Clone)]
pub struct OverlaySession {
    hub: EventHub,
    tracker: TransactionTracker,
    flow: Rc<ConfigurationFlow>,
    gateway: Rc<MessageGateway>,
    host: Rc<dyn HostBridge>,
}

impl OverlaySession {
    pub fn new(
        host: Rc<dyn HostBridge>,
        page: Rc<dyn PageView>,
        options: FlowOptions,
        return_scheme: &str,
    ) -> Self {
        let hub = EventHub::new(Rc::clone(&host));
        let tracker = TransactionTracker::new(hub.clone(), Rc::clone(&host));
        let flow = Rc::new(ConfigurationFlow::new(
            hub.clone(),
            tracker.clone(),
            Rc::clone(&host),
            Rc::clone(&page),
            options,
        ));
        let gateway = Rc::new(MessageGateway::new(
            hub.clone(),
            tracker.clone(),
            Rc::clone(&flow),
            Rc::clone(&host),
            page,
            return_scheme,
        ));
        tracing::info!(target: "shim", app = %host.app_uuid(), "overlay session opened");
        Self {
            hub,
            tracker,
            flow,
            gateway,
            host,
        }
    }

    // Page-facing API.

    pub fn add_event_listener(&self, name: &str, handler: Handler) {
        self.hub.subscribe(ShimEvent::parse(name), handler);
    }

    pub fn remove_event_listener(&self, name: &str, handler: &Handler) {
        self.hub.unsubscribe(&ShimEvent::parse(name), handler);
    }

    pub fn open_url(&self, url: &str) {
        self.swallow("openURL", self.gateway.open_url(url));
    }

    pub fn send_app_message<T>(
        &self,
        payload: &T,
        on_ack: Option<Handler>,
        on_nack: Option<Handler>,
    ) where
        T: Serialize + ?Sized,
    {
        self.swallow(
            "sendAppMessage",
            self.gateway.send_app_message(payload, on_ack, on_nack),
        );
    }

    pub fn get_active_watch_info(&self) -> Value {
        let raw = self.host.active_watch_info();
        match serde_json::from_str::<Value>(&raw) {
            Ok(info @ Value::Object(_)) => info,
            Ok(_) | Err(_) => {
                report(
                    self.host.as_ref(),
                    &format!("host returned malformed watch info: {raw}"),
                );
                Value::Object(JsonMap::new())
            }
        }
    }

    pub fn get_account_token(&self) -> String {
        String::new()
    }

    pub fn get_watch_token(&self) -> String {
        self.host.watch_token()
    }

    pub fn get_timeline_token(&self) -> String {
        String::new()
    }

    pub fn show_simple_notification_on_pebble(&self, title: &str, body: &str) {
        self.host
            .log(&format!("app wanted to show: {title} body: {body}"));
    }

    // Host and page-chrome entry points.

    /// Route an event the host fired by wire name.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> usize {
        self.hub.fire(&ShimEvent::parse(name), args)
    }

    pub fn script_loaded(&self, query: &str) {
        self.flow.script_loaded(query);
    }

    pub fn focus_regained(&self) {
        self.flow.focus_regained();
    }

    pub fn send_configuration(&self) {
        self.swallow("sendConfiguration", self.gateway.send_configuration());
    }

    pub fn parse_returned_pebblejs(&self, input: &str) {
        self.swallow(
            "parseReturnedPebbleJS",
            self.gateway.parse_returned_pebblejs(input),
        );
    }

    pub fn save_preset(&self) {
        self.swallow("savePreset", self.gateway.save_preset());
    }

    pub fn load_preset(&self) {
        self.swallow("loadPreset", self.gateway.load_preset());
    }

    pub fn does_not_support_configuration(&self) {
        self.flow.does_not_support_configuration();
    }

    pub fn close(&self) {
        self.flow.close();
    }

    // Inspection.

    pub fn phase(&self) -> UiPhase {
        self.flow.phase()
    }

    pub fn state(&self) -> FlowState {
        self.flow.state()
    }

    pub fn staged_configuration(&self) -> Option<String> {
        self.gateway.staged()
    }

    pub fn pending_transactions(&self) -> Vec<TransactionId> {
        self.tracker.pending()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    fn swallow(&self, call: &str, result: Result<(), ShimError>) {
        if let Err(err) = result {
            report(self.host.as_ref(), &format!("{call} failed: {err}"));
        }
    }
}
