use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

const ACK_PREFIX: &str = "ACK";
const NACK_PREFIX: &str = "NACK";

/// Opaque correlation token issued by the host for one in-flight app message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Every event the hub knows how to route.
///
/// Correlation events carry their transaction id as a field. On the wire
/// they are spelled `ACK<id>` / `NACK<id>`; [`ShimEvent::parse`] always maps
/// such names back to the typed variants, so a [`ShimEvent::Named`] can never
/// alias a correlation event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShimEvent {
    Ready,
    ShowConfiguration,
    WebviewClosed,
    AppMessage,
    Ack(TransactionId),
    Nack(TransactionId),
    Named(String),
}

impl ShimEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "ready" => return Self::Ready,
            "showConfiguration" => return Self::ShowConfiguration,
            "webviewclosed" => return Self::WebviewClosed,
            "appmessage" => return Self::AppMessage,
            _ => {}
        }

        // Anything under the reserved prefixes is a correlation event.
        if let Some(id) = name.strip_prefix(NACK_PREFIX).filter(|id| !id.is_empty()) {
            return Self::Nack(TransactionId::new(id));
        }
        if let Some(id) = name.strip_prefix(ACK_PREFIX).filter(|id| !id.is_empty()) {
            return Self::Ack(TransactionId::new(id));
        }

        Self::Named(name.to_string())
    }

    /// Name used when talking to the host.
    pub fn wire_name(&self) -> Cow<'_, str> {
        match self {
            Self::Ready => Cow::Borrowed("ready"),
            Self::ShowConfiguration => Cow::Borrowed("showConfiguration"),
            Self::WebviewClosed => Cow::Borrowed("webviewclosed"),
            Self::AppMessage => Cow::Borrowed("appmessage"),
            Self::Ack(id) => Cow::Owned(format!("{ACK_PREFIX}{id}")),
            Self::Nack(id) => Cow::Owned(format!("{NACK_PREFIX}{id}")),
            Self::Named(name) => Cow::Borrowed(name.as_str()),
        }
    }
}

impl fmt::Display for ShimEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_name())
    }
}

impl From<&str> for ShimEvent {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}
