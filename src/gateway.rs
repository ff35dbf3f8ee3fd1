use std::cell::RefCell;
use std::rc::Rc;

use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::bridge::{HostBridge, PageView};
use crate::error::ShimError;
use crate::events::ShimEvent;
use crate::flow::ConfigurationFlow;
use crate::hub::{EventHub, Handler};
use crate::transactions::TransactionTracker;

/// Marker a configuration page navigates to when it is done.
pub const RETURN_MARKER: &str = "pebblejs://close#";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReturnParseError {
    #[error("no pebblejs://close# marker found in returned text")]
    MissingMarker,
    #[error("returned payload is not valid UTF-8 once decoded")]
    Encoding,
    #[error("return link has no app id")]
    MissingSession,
    #[error("return link app id is not a UUID: {0}")]
    InvalidSession(String),
}

/// A deep link back from an external configuration site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnLink {
    pub app_uuid: Uuid,
    /// Query to reload the configuration page with.
    pub query: String,
}

impl ReturnLink {
    pub fn parse(url: &Url) -> Result<Self, ReturnParseError> {
        let host = url.host_str().ok_or(ReturnParseError::MissingSession)?;
        let app_uuid =
            Uuid::parse_str(host).map_err(|_| ReturnParseError::InvalidSession(host.to_string()))?;
        Ok(Self {
            app_uuid,
            query: url.query().unwrap_or_default().to_string(),
        })
    }
}

/// Outbound half of the shim: everything the page sends towards the host.
pub struct MessageGateway {
    hub: EventHub,
    tracker: TransactionTracker,
    flow: Rc<ConfigurationFlow>,
    host: Rc<dyn HostBridge>,
    page: Rc<dyn PageView>,
    return_scheme: String,
    staged: RefCell<Option<String>>,
}

impl MessageGateway {
    pub fn new(
        hub: EventHub,
        tracker: TransactionTracker,
        flow: Rc<ConfigurationFlow>,
        host: Rc<dyn HostBridge>,
        page: Rc<dyn PageView>,
        return_scheme: impl Into<String>,
    ) -> Self {
        Self {
            hub,
            tracker,
            flow,
            host,
            page,
            return_scheme: return_scheme.into(),
            staged: RefCell::new(None),
        }
    }

    pub fn staged(&self) -> Option<String> {
        self.staged.borrow().clone()
    }

    pub fn send_app_message<T>(
        &self,
        payload: &T,
        on_ack: Option<Handler>,
        on_nack: Option<Handler>,
    ) -> Result<(), ShimError>
    where
        T: Serialize + ?Sized,
    {
        if self.flow.is_closed() {
            return Err(ShimError::Closed);
        }
        let serialized = serde_json::to_string(payload)?;

        if self.flow.is_intercepting() {
            tracing::debug!(target: "gateway", payload = %serialized, "captured for review");
            self.stage(&serialized);
            return Ok(());
        }

        tracing::debug!(target: "gateway", payload = %serialized, "forwarding to host");
        self.tracker.begin(&serialized, on_ack, on_nack)?;
        Ok(())
    }

    /// Submit the staged configuration and hand control back to the host.
    pub fn send_configuration(&self) -> Result<(), ShimError> {
        if self.flow.is_closed() {
            return Err(ShimError::Closed);
        }
        let staged = self.staged().ok_or(ShimError::NothingStaged)?;
        self.host.send_app_message(&staged, false)?;
        tracing::info!(target: "gateway", "configuration submitted");
        self.flow.submitted();
        self.flow.close();
        Ok(())
    }

    /// http(s) pages open in the host's browser with a `return_to` link back;
    /// anything else replaces the page in place.
    pub fn open_url(&self, raw: &str) -> Result<(), ShimError> {
        if self.flow.is_closed() {
            return Err(ShimError::Closed);
        }
        if raw.starts_with(RETURN_MARKER) {
            return self.parse_returned_pebblejs(raw);
        }

        match Url::parse(raw) {
            Ok(mut url) if matches!(url.scheme(), "http" | "https") => {
                let return_to = format!(
                    "{}://{}?config=true&json=",
                    self.return_scheme,
                    self.host.app_uuid()
                );
                url.query_pairs_mut().append_pair("return_to", &return_to);
                self.host.open_external(&url)?;
                tracing::info!(target: "gateway", url = %url, "opened external configuration");
                self.flow.awaiting_external();
            }
            _ => {
                tracing::info!(
                    target: "gateway",
                    target_url = raw,
                    "loading configuration in place"
                );
                self.page.load_in_place(raw);
            }
        }
        Ok(())
    }

    /// Accept text ending in `pebblejs://close#<urlencoded payload>`, as
    /// pasted by a user coming back from an external site.
    pub fn parse_returned_pebblejs(&self, input: &str) -> Result<(), ShimError> {
        let response = match decode_return(input) {
            Ok(response) => response,
            Err(err) => {
                self.page.show_error(&err.to_string());
                return Err(err.into());
            }
        };

        self.flow.enter_review();
        self.hub
            .fire(&ShimEvent::WebviewClosed, &[json!({ "response": response })]);
        Ok(())
    }

    /// Persist the staged configuration as the app's preset.
    pub fn save_preset(&self) -> Result<(), ShimError> {
        let staged = self.staged().ok_or(ShimError::NothingStaged)?;
        self.host.save_app_stored_preset(&staged)?;
        Ok(())
    }

    /// Put the stored preset up for review as if the page had produced it.
    pub fn load_preset(&self) -> Result<(), ShimError> {
        if self.flow.is_closed() {
            return Err(ShimError::Closed);
        }
        let preset = self.host.app_stored_preset().ok_or(ShimError::NoPreset)?;
        self.flow.enter_review();
        self.stage(&preset);
        Ok(())
    }

    fn stage(&self, serialized: &str) {
        *self.staged.borrow_mut() = Some(serialized.to_string());
        self.page.set_transcript(serialized);
    }
}

pub fn decode_return(input: &str) -> Result<String, ReturnParseError> {
    let (_, encoded) = input
        .split_once(RETURN_MARKER)
        .ok_or(ReturnParseError::MissingMarker)?;
    percent_decode_str(encoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ReturnParseError::Encoding)
}
