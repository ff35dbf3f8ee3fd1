use std::cell::Cell;
use std::rc::Rc;

use pebble_config_shim::appkeys::AppKeyMap;
use pebble_config_shim::storage::{KeyValueStore, SqliteStore};
use pebble_config_shim::{BridgeError, HostBridge, PageView, TransactionId, UiPhase};
use serde_json::json;
use url::Url;
use uuid::Uuid;

/// Host bridge that logs what a phone app would do.
pub struct ConsoleHost {
    app_uuid: Uuid,
    keys: Option<AppKeyMap>,
    storage: Rc<SqliteStore>,
    last_transaction: Cell<u32>,
}

impl ConsoleHost {
    pub fn new(app_uuid: Uuid, keys: Option<AppKeyMap>, storage: Rc<SqliteStore>) -> Self {
        Self {
            app_uuid,
            keys,
            storage,
            last_transaction: Cell::new(0),
        }
    }

    fn preset_key(&self) -> String {
        format!("{}_preset", self.app_uuid)
    }

    fn outgoing(&self, payload: &str) -> Result<String, BridgeError> {
        let Some(keys) = &self.keys else {
            return Ok(payload.to_string());
        };
        let translation = keys
            .translate(payload)
            .map_err(|err| BridgeError::Rejected(err.to_string()))?;
        for key in &translation.discarded {
            println!("discarded key {key}, not found in the app keys and not an integer");
        }
        serde_json::to_string(&translation.message)
            .map_err(|err| BridgeError::Rejected(err.to_string()))
    }
}

impl HostBridge for ConsoleHost {
    fn send_app_message(
        &self,
        payload: &str,
        needs_transaction: bool,
    ) -> Result<Option<TransactionId>, BridgeError> {
        let message = self.outgoing(payload)?;
        if !needs_transaction {
            println!("-> watch: {message}");
            return Ok(None);
        }
        let id = self.last_transaction.get() + 1;
        self.last_transaction.set(id);
        println!("-> watch: {message} (transaction {id}, answer with `ack {id}` or `nack {id}`)");
        Ok(Some(TransactionId::new(id.to_string())))
    }

    fn app_stored_preset(&self) -> Option<String> {
        match self.storage.get(&self.preset_key()) {
            Ok(preset) => preset,
            Err(err) => {
                tracing::error!(error = %err, "failed to read preset");
                None
            }
        }
    }

    fn save_app_stored_preset(&self, preset: &str) -> Result<(), BridgeError> {
        self.storage
            .set(&self.preset_key(), preset)
            .map_err(|err| BridgeError::Storage(err.to_string()))?;
        println!("presets stored");
        Ok(())
    }

    fn active_watch_info(&self) -> String {
        json!({
            "firmware": "v4.3",
            "platform": "basalt",
            "model": "pebble_time_black",
            "language": "en",
        })
        .to_string()
    }

    fn app_uuid(&self) -> Uuid {
        self.app_uuid
    }

    fn watch_token(&self) -> String {
        format!("gb{}", self.app_uuid)
    }

    fn close_activity(&self) {
        println!("overlay closed");
    }

    fn event_finished(&self, event: &str) {
        tracing::debug!(event, "event finished");
    }

    fn open_external(&self, url: &Url) -> Result<(), BridgeError> {
        println!("open in browser: {url}");
        Ok(())
    }

    fn log(&self, message: &str) {
        tracing::info!(target: "page", "{message}");
    }
}

/// Stand-in for the configuration page document.
pub struct ConsolePage;

impl PageView for ConsolePage {
    fn set_transcript(&self, text: &str) {
        println!("transcript: {text}");
    }

    fn show_phase(&self, phase: UiPhase) {
        println!("phase: {phase:?}");
    }

    fn set_preset_controls_visible(&self, visible: bool) {
        tracing::debug!(visible, "preset controls");
    }

    fn show_error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn load_in_place(&self, target: &str) {
        println!("load in place: {target}");
    }
}
