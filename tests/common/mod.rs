#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pebble_config_shim::{
    BridgeError, FlowOptions, Handler, HostBridge, OverlaySession, PageView, TransactionId,
    UiPhase,
};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

pub const APP_UUID: &str = "6bf6215b-c97f-409e-8c31-4f55657222b4";

/// Host bridge that records every call.
pub struct RecordingHost {
    pub sent: RefCell<Vec<(String, bool)>>,
    pub finished: RefCell<Vec<String>>,
    pub logs: RefCell<Vec<String>>,
    pub opened: RefCell<Vec<Url>>,
    pub saved_presets: RefCell<Vec<String>>,
    pub closed: Cell<usize>,
    pub preset: RefCell<Option<String>>,
    pub watch_info: RefCell<String>,
    pub reject_sends: Cell<bool>,
    next_transaction: Cell<u32>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self {
            sent: RefCell::default(),
            finished: RefCell::default(),
            logs: RefCell::default(),
            opened: RefCell::default(),
            saved_presets: RefCell::default(),
            closed: Cell::new(0),
            preset: RefCell::new(None),
            watch_info: RefCell::new(
                r#"{"firmware":"v4.3","platform":"basalt","model":"pebble_time_black","language":"en"}"#
                    .to_string(),
            ),
            reject_sends: Cell::new(false),
            next_transaction: Cell::new(0),
        }
    }
}

impl RecordingHost {
    pub fn with_preset(preset: &str) -> Self {
        let host = Self::default();
        *host.preset.borrow_mut() = Some(preset.to_string());
        host
    }

    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(payload, _)| payload.clone()).collect()
    }

    pub fn finished_count(&self, event: &str) -> usize {
        self.finished.borrow().iter().filter(|name| *name == event).count()
    }
}

impl HostBridge for RecordingHost {
    fn send_app_message(
        &self,
        payload: &str,
        needs_transaction: bool,
    ) -> Result<Option<TransactionId>, BridgeError> {
        if self.reject_sends.get() {
            return Err(BridgeError::Rejected("watch disconnected".into()));
        }
        self.sent
            .borrow_mut()
            .push((payload.to_string(), needs_transaction));
        if !needs_transaction {
            return Ok(None);
        }
        let id = self.next_transaction.get() + 1;
        self.next_transaction.set(id);
        Ok(Some(TransactionId::new(id.to_string())))
    }

    fn app_stored_preset(&self) -> Option<String> {
        self.preset.borrow().clone()
    }

    fn save_app_stored_preset(&self, preset: &str) -> Result<(), BridgeError> {
        self.saved_presets.borrow_mut().push(preset.to_string());
        *self.preset.borrow_mut() = Some(preset.to_string());
        Ok(())
    }

    fn active_watch_info(&self) -> String {
        self.watch_info.borrow().clone()
    }

    fn app_uuid(&self) -> Uuid {
        Uuid::parse_str(APP_UUID).unwrap()
    }

    fn watch_token(&self) -> String {
        format!("gb{APP_UUID}")
    }

    fn close_activity(&self) {
        self.closed.set(self.closed.get() + 1);
    }

    fn event_finished(&self, event: &str) {
        self.finished.borrow_mut().push(event.to_string());
    }

    fn open_external(&self, url: &Url) -> Result<(), BridgeError> {
        self.opened.borrow_mut().push(url.clone());
        Ok(())
    }

    fn log(&self, message: &str) {
        self.logs.borrow_mut().push(message.to_string());
    }
}

/// Page view that records what would have been rendered.
#[derive(Default)]
pub struct RecordingPage {
    pub transcript: RefCell<Option<String>>,
    pub phases: RefCell<Vec<UiPhase>>,
    pub preset_controls: Cell<Option<bool>>,
    pub errors: RefCell<Vec<String>>,
    pub loaded: RefCell<Vec<String>>,
}

impl PageView for RecordingPage {
    fn set_transcript(&self, text: &str) {
        *self.transcript.borrow_mut() = Some(text.to_string());
    }

    fn show_phase(&self, phase: UiPhase) {
        self.phases.borrow_mut().push(phase);
    }

    fn set_preset_controls_visible(&self, visible: bool) {
        self.preset_controls.set(Some(visible));
    }

    fn show_error(&self, message: &str) {
        self.errors.borrow_mut().push(message.to_string());
    }

    fn load_in_place(&self, target: &str) {
        self.loaded.borrow_mut().push(target.to_string());
    }
}

pub struct Harness {
    pub host: Rc<RecordingHost>,
    pub page: Rc<RecordingPage>,
    pub session: OverlaySession,
    pub events: Rc<RefCell<Vec<(String, Vec<Value>)>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(RecordingHost::default(), FlowOptions::default())
    }

    pub fn with(host: RecordingHost, options: FlowOptions) -> Self {
        let host = Rc::new(host);
        let page = Rc::new(RecordingPage::default());
        let session = OverlaySession::new(host.clone(), page.clone(), options, "gadgetbridge");
        Self {
            host,
            page,
            session,
            events: Rc::default(),
        }
    }

    /// Record every delivery of `name` into `self.events`.
    pub fn watch(&self, name: &str) -> Handler {
        let events = Rc::clone(&self.events);
        let tag = name.to_string();
        let handler = Handler::from_fn(move |args| {
            events.borrow_mut().push((tag.clone(), args.to_vec()));
        });
        self.session.add_event_listener(name, handler.clone());
        handler
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}
