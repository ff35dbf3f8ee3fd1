use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::events::TransactionId;
use crate::flow::UiPhase;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("host rejected app message: {0}")]
    Rejected(String),
    #[error("host storage failure: {0}")]
    Storage(String),
}

/// Native side of the shim.
///
/// Calls are synchronous from the page's point of view; a host is free to
/// deliver the actual message later. Implementations use interior mutability
/// because the session shares one bridge between all of its parts.
pub trait HostBridge {
    /// Queue `payload` for the watch. When `needs_transaction` is set the host
    /// returns the id it will later answer with `ACK<id>` or `NACK<id>`.
    fn send_app_message(
        &self,
        payload: &str,
        needs_transaction: bool,
    ) -> Result<Option<TransactionId>, BridgeError>;

    fn app_stored_preset(&self) -> Option<String>;

    fn save_app_stored_preset(&self, preset: &str) -> Result<(), BridgeError>;

    /// JSON object describing the connected watch.
    fn active_watch_info(&self) -> String;

    fn app_uuid(&self) -> Uuid;

    fn watch_token(&self) -> String;

    /// Dismiss the configuration overlay.
    fn close_activity(&self);

    /// Delivery of `event` to the page is complete.
    fn event_finished(&self, event: &str);

    fn open_external(&self, url: &Url) -> Result<(), BridgeError>;

    /// Diagnostic sink.
    fn log(&self, message: &str);
}

/// The page document, as far as the shim needs to touch it.
pub trait PageView {
    /// Replace the visible transcript area with `text`.
    fn set_transcript(&self, text: &str);

    fn show_phase(&self, phase: UiPhase);

    fn set_preset_controls_visible(&self, visible: bool);

    /// User-visible diagnostic area.
    fn show_error(&self, message: &str);

    /// Navigate the embedded browsing context to `target`.
    fn load_in_place(&self, target: &str);
}

pub(crate) fn report(host: &dyn HostBridge, message: &str) {
    tracing::warn!(target: "shim", "{message}");
    host.log(message);
}
